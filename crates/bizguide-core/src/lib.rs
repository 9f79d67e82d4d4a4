pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::GuideConfig;
pub use context::{GuideContext, SearchMode};
pub use error::{GuideError, Result};
pub use types::*;
