//! The storage-agnostic spool interface.

use async_trait::async_trait;
use sendcore_common::context::Context;

use crate::types::SpooledMessageId;

/// A backing store for spooled messages.
///
/// Implementations persist a [`Context`] (envelope, raw data, and delivery
/// state) keyed by a generated [`SpooledMessageId`], and must be safe to
/// share across tasks (`Send + Sync`).
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Spools a new message, assigning and returning its id.
    ///
    /// # Errors
    /// Returns an error if the message cannot be persisted.
    async fn write(&self, context: &mut Context) -> crate::Result<SpooledMessageId>;

    /// Lists all message ids currently in the spool, oldest first.
    ///
    /// # Errors
    /// Returns an error if the spool cannot be enumerated.
    async fn list(&self) -> crate::Result<Vec<SpooledMessageId>>;

    /// Reads a message's context by id.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no such message exists.
    async fn read(&self, id: &SpooledMessageId) -> crate::Result<Context>;

    /// Overwrites an existing message's context in place.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no such message exists.
    async fn update(&self, id: &SpooledMessageId, context: &Context) -> crate::Result<()>;

    /// Removes a message from the spool.
    ///
    /// # Errors
    /// Returns [`crate::SpoolError::NotFound`] if no such message exists.
    async fn delete(&self, id: &SpooledMessageId) -> crate::Result<()>;
}
