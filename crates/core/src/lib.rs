pub mod config;
pub mod error;
pub mod status;

pub use config::ControllerConfig;
pub use error::*;
pub use status::*;
