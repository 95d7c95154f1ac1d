pub mod alert;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inhibit;
pub mod matcher;
pub mod mute;
pub mod nflog;
pub mod notify;
pub mod provider;
pub mod route;
pub mod silence;
pub mod template;
pub mod types;

pub use error::{Error, Result};
