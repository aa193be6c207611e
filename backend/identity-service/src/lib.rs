/// Identity Service Library
///
/// Token issuance on top of `credential-engine` and user registration whose side effects
/// (welcome mail, user-created event) are delivered by the `transactional-outbox` relay.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `db`: Database repositories (users)
/// - `error`: Error types
/// - `models`: Data models
/// - `services`: Business logic (email, kafka, registration, tokens)
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use error::{IdentityError, Result};
