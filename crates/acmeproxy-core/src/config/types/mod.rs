mod acme;
mod config;
mod log_level;

pub use acme::*;
pub use config::*;
pub use log_level::*;
