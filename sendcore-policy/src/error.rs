//! Error types for suppression and reputation tracking.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("suppression store error: {0}")]
    Store(String),
}
