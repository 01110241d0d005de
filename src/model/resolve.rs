//! First-match route resolution.
//!
//! A route matches a candidate when its `when` list is empty or any single
//! condition matches, and every guarded entry authorizes the caller's token.
//! Declaration order is the total order; ties break by position only —
//! this is not a best-match system.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::RouteConfig;
use crate::factory::Guard;

/// Returns the first matching route in declaration order, or `None` when
/// nothing matches (callers must then reject the stream attempt).
pub fn resolve_route<'a>(
    routes: &'a [RouteConfig],
    candidate: &Value,
    token: &str,
    guards: &HashMap<String, Arc<dyn Guard>>,
) -> Option<&'a RouteConfig> {
    routes.iter().find(|route| {
        let when_matches =
            route.when.is_empty() || route.when.iter().any(|c| condition_matches(c, candidate));
        when_matches && guards_authorize(route, token, guards)
    })
}

/// A condition matches when every one of its fields equals the candidate's
/// value for the same key. An empty condition object matches everything.
pub fn condition_matches(condition: &Value, candidate: &Value) -> bool {
    match condition {
        Value::Object(fields) => fields
            .iter()
            .all(|(key, expected)| candidate.get(key) == Some(expected)),
        _ => false,
    }
}

fn guards_authorize(
    route: &RouteConfig,
    token: &str,
    guards: &HashMap<String, Arc<dyn Guard>>,
) -> bool {
    route.guarded.iter().all(|guarded| {
        guards
            .get(&guarded.name)
            .map(|guard| guard.authorize(token, &guarded.roles))
            .unwrap_or(false)
    })
}
