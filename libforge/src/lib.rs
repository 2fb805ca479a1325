//! SocialForge - integration and orchestration core for automated social
//! media publishing
//!
//! This library holds the provider fallback chains (text and image), the
//! platform abstraction layer with encrypted credential custody, the
//! publication lifecycle state machine, the metrics synchronization engine,
//! and the monetization growth projector.

pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod logging;
pub mod media;
pub mod monetization;
pub mod platforms;
pub mod providers;
pub mod service;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{ForgeError, Result};
pub use platforms::Publisher;
pub use types::{Account, ContentArtifact, PlatformKind, Publication, PublicationStatus};
pub use vault::CredentialVault;
