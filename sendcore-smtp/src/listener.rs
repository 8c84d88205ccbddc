use std::{collections::HashMap, net::SocketAddr};

use futures_util::future::join_all;
use sendcore_common::{
    Signal, internal,
    traits::protocol::{Protocol, SessionHandler},
};
use sendcore_tracing::traced;
use serde::Deserialize;
use tokio::net::TcpListener;

/// A single bound socket serving one protocol.
///
/// A [`crate::server::Server`] holds a `Vec` of these, one per
/// `[[listener]]` table in configuration.
#[derive(Deserialize)]
pub struct Listener<Proto: Protocol> {
    #[serde(skip)]
    handler: Proto,
    socket: SocketAddr,
    #[serde(default)]
    args: Proto::Args,
}

impl<Proto: Protocol> Listener<Proto> {
    /// Runs one-time validation of this listener's protocol arguments
    /// (e.g. confirming TLS certificate/key paths exist).
    ///
    /// # Errors
    /// Returns the underlying [`sendcore_common::error::ProtocolError`] if
    /// validation fails.
    pub fn init(&mut self) -> anyhow::Result<()> {
        self.handler
            .validate(&mut self.args)
            .map_err(anyhow::Error::from)
    }

    /// Mutable access to this listener's protocol arguments, so a caller can
    /// inject runtime-only collaborators (a spool handle, ...) after
    /// deserializing configuration.
    pub fn args_mut(&mut self) -> &mut Proto::Args {
        &mut self.args
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err))]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        internal!("Serving {} listener on {}", Proto::ty(), self.socket);
        let mut sessions = Vec::default();

        let (address, port) = (self.socket.ip(), self.socket.port());
        let listener = TcpListener::bind(self.socket).await?;

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(_)) {
                        internal!(level = INFO, "{} listener {}:{} received shutdown signal, finishing sessions ...", Proto::ty(), address, port);
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    tracing::debug!("Connection received on {}", self.socket);
                    let (stream, peer) = connection?;
                    let handler = self
                        .handler
                        .handle(stream, peer, HashMap::new(), self.args.clone());
                    let session_shutdown = shutdown.resubscribe();
                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = handler.run(session_shutdown).await {
                            internal!(level = ERROR, "Error: {err}");
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}

impl<Proto: Protocol> From<SocketAddr> for Listener<Proto> {
    fn from(socket: SocketAddr) -> Self {
        Self {
            handler: Proto::default(),
            socket,
            args: Proto::Args::default(),
        }
    }
}
