//! The accept loop over the local command socket.
//!
//! One logical message per connection: read until the peer half-closes,
//! strip trailing newlines, stamp "now", parse, dispatch, write one
//! reply of the form `<id>.<now_sec>.<payload>`, close. A `shutdown`
//! message answers `exiting` and ends the loop.

use std::path::Path;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use ckdb_core::{breakdown, Command, Timestamp};

use super::shutdown::ShutdownController;
use crate::entities::Store;
use crate::service::{dispatch, HandlerContext};
use crate::storage::Origin;

/// Listener failure: only socket setup and accept errors surface here.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the accept loop until shutdown.
///
/// A stale socket file from a previous run is unlinked before binding,
/// and the socket is unlinked again on the way out.
///
/// # Errors
///
/// Returns [`ListenerError`] when the socket cannot be bound or accept
/// fails.
pub async fn run(
    socket_path: &Path,
    store: Arc<Store>,
    pool: PgPool,
    controller: &ShutdownController,
) -> Result<(), ListenerError> {
    // Subscribe before the socket exists so a trigger can never land
    // between a client's first connect and the loop noticing.
    let mut shutdown_rx = controller.subscribe();

    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    info!("listening on {}", socket_path.display());
    let result = loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("shutdown signalled, leaving accept loop");
                break Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Err(err) => {
                        error!("failed to accept on listener socket: {err}");
                        break Err(ListenerError::Io(err));
                    }
                    Ok((stream, _addr)) => {
                        if !serve(stream, &store, &pool).await {
                            controller.trigger();
                            break Ok(());
                        }
                    }
                }
            }
        }
    };

    drop(listener);
    let _ = std::fs::remove_file(socket_path);
    result
}

/// Serve one connection. Returns `false` when the peer asked for
/// shutdown.
async fn serve(mut stream: UnixStream, store: &Store, pool: &PgPool) -> bool {
    let mut buf = Vec::new();
    if let Err(err) = stream.read_to_end(&mut buf).await {
        warn!("failed to get message in listener: {err}");
        return true;
    }
    // Stamp once the whole message has been read.
    let now = Timestamp::now();

    let text = String::from_utf8_lossy(&buf);
    let message = text.trim_end_matches(['\n', '\r']);
    if message.is_empty() {
        // An empty message gets no reply.
        warn!("empty message in listener");
        return true;
    }

    let (reply, keep_going) = match breakdown(message) {
        Err(err) => (format!("{}.{}.?", err.id(), now.sec), true),
        Ok(req) => match req.command {
            Command::Shutdown => {
                warn!("listener received shutdown message, terminating ckdb");
                (format!("{}.{}.exiting", req.id, now.sec), false)
            }
            Command::Ping => {
                debug!("listener received ping request");
                (format!("{}.{}.pong", req.id, now.sec), true)
            }
            _ => {
                let ctx = HandlerContext {
                    store,
                    pool,
                    now,
                    origin: Origin::new("ckdb", "listener", "127.0.0.1"),
                };
                let payload = dispatch(&req, &ctx).await;
                (format!("{}.{}.{payload}", req.id, now.sec), true)
            }
        },
    };

    if let Err(err) = stream.write_all(reply.as_bytes()).await {
        warn!("failed to send reply: {err}");
    }
    let _ = stream.shutdown().await;
    keep_going
}
