pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliArgs;
pub use config::{RunConfig, RunMode};

pub use core::{etl::EtlEngine, pipeline::UploadPipeline};
pub use utils::error::{AirliftError, Result, StoreError};
