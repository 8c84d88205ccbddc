//! Lifecycle wrapper around a [`BackingStore`].
//!
//! `Spool<S>` adds the bits a bare `BackingStore` doesn't need: directory
//! readiness checks for the file backend, and a `serve` loop that idles
//! until shutdown (the scheduler polls the store directly via `list`/`read`
//! rather than subscribing to filesystem events, so `serve` has nothing to
//! drive beyond honouring the signal).

use sendcore_common::Signal;
use tokio::sync::broadcast::Receiver;

use crate::{backends::file::FileBackingStore, r#trait::BackingStore};

/// Owns a backing store and its lifecycle (`init`/`serve`).
#[derive(Debug, Clone)]
pub struct Spool<S: BackingStore> {
    store: S,
}

impl<S: BackingStore> Spool<S> {
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }
}

impl Spool<FileBackingStore> {
    /// Ensures the spool directory exists and is writable.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or isn't usable.
    pub fn init(&mut self) -> crate::Result<()> {
        self.store.ensure_ready()
    }

    /// Idles until a shutdown signal arrives. New messages are discovered by
    /// the scheduler's periodic spool scan, not by this loop.
    ///
    /// # Errors
    /// Returns an error if the shutdown channel is closed unexpectedly.
    pub async fn serve(&self, mut shutdown: Receiver<Signal>) -> crate::Result<()> {
        loop {
            match shutdown.recv().await {
                Ok(Signal::Shutdown | Signal::Finalised) | Err(_) => return Ok(()),
            }
        }
    }
}

/// File-backed spool with lifecycle methods.
pub type FileSpool = Spool<FileBackingStore>;
