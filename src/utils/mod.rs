pub mod config_loader;
pub mod constants;
pub mod numeric;
pub mod time;

pub use config_loader::*;
pub use constants::*;
pub use time::iso8601_from_unix;
