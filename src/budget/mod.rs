mod ledger;
pub use ledger::*;
