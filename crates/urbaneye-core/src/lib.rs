pub mod config;
pub mod error;
pub mod types;

pub use config::UrbanEyeConfig;
pub use error::{Result, UrbanEyeError};
pub use types::*;
