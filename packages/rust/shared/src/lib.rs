//! Shared types, error model, and configuration for BreachWatch.
//!
//! This crate is the foundation depended on by all other BreachWatch crates.
//! It provides:
//! - [`BreachWatchError`]: the unified error type
//! - Domain types ([`Finding`], [`IdentifierKind`], the per-stage outcomes)
//! - Configuration ([`AppConfig`], [`Credentials`], config loading)
//! - The fixed-delay [`RetryPolicy`] shared by every outbound call

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BreachSourceConfig, Credentials, DatabaseConfig, InventoryConfig, LoggingConfig,
    RetryConfig, SearchConfig, StoreCredentials, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{BreachWatchError, Result};
pub use retry::{RetryPolicy, with_retry};
pub use types::{
    AnnotationOutcome, BREACH_ANNOTATION, Finding, IdentifierKind, LookupOutcome, PersistReport,
    StoreKind, is_truthy,
};
