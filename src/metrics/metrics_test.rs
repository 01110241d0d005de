use super::*;

#[test]
fn test_metric_registration_is_idempotent() {
    // A restarted metrics server re-registers every collector.
    register_custom_metrics();
    register_custom_metrics();

    let families = REGISTRY.gather();
    assert!(families
        .iter()
        .any(|family| family.get_name() == "reconfigurations_total"));
}
