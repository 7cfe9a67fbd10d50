pub mod access;
pub mod actions;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod logs;
pub mod mutations;
pub mod queries;
pub mod scopes;
pub mod types;

pub use access::AccessLayer;
pub use config::Config;
pub use error::ApiError;
