pub mod config;
pub mod credibility;
pub mod error;
pub mod types;

pub use config::Config;
pub use credibility::classify_domain;
pub use error::VeriscopeError;
pub use types::*;
