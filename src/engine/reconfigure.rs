//! Session replacement
//!
//! Tears down the current session and binds a new one with different
//! operating parameters, keeping the registry's transfers and their user
//! intent (selection, running flags) across the swap.

use std::time::Instant;

use super::Engine;
use crate::error::EngineError;
use crate::session::SessionParams;
use crate::transfer::Transfer;

/// Highest port a session can bind
const MAX_PORT: i64 = 65535;

/// Reject parameters no session could run with
pub fn validate_params(params: &SessionParams) -> Result<(), EngineError> {
    if !(1..=MAX_PORT).contains(&params.incoming_port) {
        return Err(EngineError::InvalidParams(format!(
            "incoming port must be between 1 and {MAX_PORT}, got {}",
            params.incoming_port
        )));
    }
    if params.download_directory.as_os_str().is_empty() {
        return Err(EngineError::InvalidParams(
            "download directory must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl Engine {
    /// Replace the session with one built from `params`.
    ///
    /// Invalid parameters are rejected before anything is torn down. If the
    /// new session cannot be created the engine is left without one and
    /// every operation that needs it fails with `NoSession` until a later
    /// reconfigure succeeds. Concurrent calls run one after another.
    pub async fn reconfigure(&self, params: SessionParams) -> Result<Vec<Transfer>, EngineError> {
        validate_params(&params)?;

        let _gate = self.inner.reconfigure_gate.lock().await;
        let started = Instant::now();

        let old = {
            let mut registry = self.inner.registry.lock();
            registry.abort_waiters();
            for transfer in registry.transfers.values_mut() {
                transfer.detach();
            }
            registry.session.take()
        };

        if let Some(old) = old {
            old.shutdown().await;
            tracing::debug!(
                grace_ms = self.inner.grace_period.as_millis() as u64,
                "Previous session closed"
            );
            tokio::time::sleep(self.inner.grace_period).await;
        }

        let session = match self.inner.factory.create(&params).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    incoming_port = params.incoming_port,
                    error = %e,
                    "Failed to create torrent session"
                );
                return Err(EngineError::Session(e.to_string()));
            }
        };

        {
            let mut registry = self.inner.registry.lock();
            registry.session = Some(session);
            registry.params = Some(params.clone());
        }

        tracing::info!(
            incoming_port = params.incoming_port,
            download_directory = %params.download_directory.display(),
            auto_start = params.auto_start,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Torrent session configured"
        );

        self.refresh_all()
    }
}
