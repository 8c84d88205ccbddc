//! Error type for the durable relational store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelationalError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("malformed JSON column: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelationalError>;
