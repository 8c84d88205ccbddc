use std::sync::Arc;

use sendcore_common::Signal;
use sendcore_tracing::traced;
use serde::Deserialize;

use crate::{Smtp, listener::Listener};

/// One or more SMTP listeners run together under a single shutdown signal.
#[derive(Default, Deserialize)]
pub struct Server {
    #[serde(alias = "listener")]
    listeners: Vec<Listener<Smtp>>,
}

impl Server {
    /// # Errors
    /// Returns an error if any listener's protocol arguments fail validation.
    pub fn init(&mut self) -> anyhow::Result<()> {
        self.listeners.iter_mut().try_for_each(Listener::init)
    }

    /// Hands every listener a spool handle, so accepted messages can be
    /// persisted as soon as a `DATA` transaction completes.
    pub fn with_spool(&mut self, spool: Arc<dyn sendcore_store::BackingStore>) {
        for listener in &mut self.listeners {
            *listener.args_mut() = listener.args_mut().clone().with_spool(spool.clone());
        }
    }

    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "us"))]
    pub async fn serve(
        &self,
        shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        futures_util::future::join_all(
            self.listeners
                .iter()
                .map(|l| l.serve(shutdown.resubscribe())),
        )
        .await
        .into_iter()
        .try_for_each(|r| r)
    }
}
