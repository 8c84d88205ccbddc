use std::{collections::HashMap, fmt::Debug, net::SocketAddr};

use serde::Deserialize;
use tokio::{net::TcpStream, sync::broadcast::Receiver};

use crate::{Signal, error::SessionError};

/// A running session for a single accepted connection.
pub trait SessionHandler {
    fn run(
        self,
        shutdown: Receiver<Signal>,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

/// A wire protocol a listener can accept connections for.
///
/// Implemented once per protocol (SMTP, the control socket, ...) and shared
/// across every listener bound for that protocol.
pub trait Protocol: Default + Send + Sync {
    type Session: SessionHandler + Send + Sync + 'static;
    type Args: Default + Clone + Debug + Send + Sync + for<'a> Deserialize<'a>;

    /// Short, human-readable name used in logs (`"SMTP"`, `"control"`, ...).
    fn ty() -> &'static str;

    /// Validates and normalises `args` once, before any connection is
    /// accepted (e.g. checking TLS certificate paths exist on disk).
    ///
    /// # Errors
    /// Returns [`crate::error::ProtocolError`] if `args` is invalid.
    fn validate(&mut self, args: &mut Self::Args) -> Result<(), crate::error::ProtocolError> {
        let _ = args;
        Ok(())
    }

    fn handle(
        &self,
        stream: TcpStream,
        address: SocketAddr,
        context: HashMap<String, String>,
        args: Self::Args,
    ) -> Self::Session;
}
