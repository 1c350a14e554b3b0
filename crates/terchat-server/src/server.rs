//! TCP accept loop.
//!
//! Sessions are capped by a semaphore; a client arriving while the server is
//! full gets a `ServerNotice` and is disconnected. Shutdown broadcasts
//! `Disconnect` to every online user, stops the accept loop and waits for the
//! remaining sessions to finish.

use std::sync::Arc;

use futures::SinkExt;
use terchat_shared::constants::replies;
use terchat_shared::{Record, RecordCodec};
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use crate::session::run_session;
use crate::state::AppState;

pub struct Server {
    state: AppState,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { state, shutdown }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Accept clients on `listener` until [`shutdown`](Self::shutdown) is
    /// called, then wait for every session to end.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let limit = Arc::new(Semaphore::new(self.state.config.max_sessions));
        let mut stop = self.shutdown.subscribe();
        let mut sessions = JoinSet::new();

        info!(
            addr = %listener.local_addr()?,
            max_sessions = self.state.config.max_sessions,
            "Listening for clients"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                        warn!(peer = %addr, "Session limit reached, refusing client");
                        sessions.spawn(refuse(stream, self.state.config.max_body));
                        continue;
                    };

                    info!(peer = %addr, "Client connected");
                    let state = self.state.clone();
                    let stop = self.shutdown.subscribe();
                    sessions.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = run_session(stream, state, stop).await {
                            debug!(peer = %addr, error = %e, "Session ended with error");
                        }
                        info!(peer = %addr, "Client disconnected");
                    });
                }
                _ = stop.changed() => break,
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        info!(remaining = sessions.len(), "Accept loop stopped, waiting for sessions");
        while sessions.join_next().await.is_some() {}
        Ok(())
    }

    /// Disconnect every online user and stop [`serve`](Self::serve).
    pub async fn shutdown(&self) {
        let notified = self.state.registry.shutdown_all().await;
        self.shutdown.send_replace(true);
        info!(notified, "Server shutting down");
    }
}

/// Tell a client the server is full, then close the stream.
async fn refuse<S>(stream: S, max_body: usize)
where
    S: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(stream, RecordCodec::new(max_body));
    if let Err(e) = sink.send(Record::notice(replies::SERVER_FULL)).await {
        debug!(error = %e, "Could not notify refused client");
    }
    let _ = sink.close().await;
}
