//! Platform catalog.
//!
//! Per-platform behaviour is data: probe template, strategy chain, parse
//! rule, rate limit and trust weight. Descriptors are validated when the
//! registry loads and never change afterwards.

mod descriptor;
mod parse;
mod registry;

pub use descriptor::{
    ApiEndpoint, Category, Difficulty, PlatformDescriptor, PlatformSpec, RateLimitPolicy,
};
pub use parse::{PageInput, ParseRule, Verdict};
pub use registry::PlatformRegistry;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read platform catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse platform catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("platform {platform} is invalid: {reason}")]
    Invalid { platform: String, reason: String },
    #[error("duplicate platform id {0}")]
    Duplicate(String),
    #[error("unknown platform {0}")]
    UnknownPlatform(String),
}
