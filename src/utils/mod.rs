mod fs;
mod net;
mod time;
pub use fs::*;
pub use net::*;
pub use time::*;
