//! Configuration module for ytgrab.
//!
//! Provisioning settings loaded from defaults, a JSON file, and the environment.

mod settings;

pub use settings::{ProvisionConfig, ToolOverrides, APP_DIR_NAME, DEFAULT_RELEASE_API_URL};
