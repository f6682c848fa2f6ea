//! Line-delimited JSON-RPC TCP server. Each connection is read line by
//! line; each line spawns its own task so slow requests never block
//! others sharing the same connection. Responses are serialized back
//! through a mutex-guarded writer half.

use std::sync::Arc;

use broker_core::prelude::*;
use broker_core::telemetry::metrics;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};

use crate::protocol::{ApiRequest, ApiResponse, PARSE_ERROR_CODE};
use crate::router::Router;

pub struct ApiServer {
    router: Arc<Router>,
    port: u16,
}

impl ApiServer {
    pub fn new(router: Router, port: u16) -> Self {
        Self { router: Arc::new(router), port }
    }

    /// Accept connections until `shutdown` fires, then return once the
    /// listener is closed. In-flight connections are given no additional
    /// grace period beyond what their current line is already doing.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| Error::TransportFailure(format!("binding api port {}: {e}", self.port)))?;
        info!(port = self.port, "api server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "failed to accept api connection");
                            continue;
                        }
                    };
                    debug!(%peer, "api connection accepted");
                    let router = self.router.clone();
                    let connection_shutdown = shutdown.resubscribe();
                    tokio::spawn(async move {
                        handle_connection(socket, router, connection_shutdown).await;
                    });
                }
                _ = shutdown.recv() => {
                    info!("api server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    router: Arc<Router>,
    mut shutdown: broadcast::Receiver<()>,
) {
    metrics::API_CONNECTIONS.increment();
    let (read_half, write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let writer = Arc::new(Mutex::new(write_half));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "api connection read failure");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let router = router.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    let response = match serde_json::from_str::<ApiRequest>(&line) {
                        Ok(request) => router.dispatch(request).await,
                        Err(e) => ApiResponse::error(0, PARSE_ERROR_CODE, format!("invalid request: {e}")),
                    };
                    write_response(&writer, &response).await;
                });
            }
            _ = shutdown.recv() => break,
        }
    }

    metrics::API_CONNECTIONS.decrement();
}

async fn write_response(writer: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>, response: &ApiResponse) {
    let Ok(mut encoded) = serde_json::to_vec(response) else {
        error!("failed to serialize api response");
        return;
    };
    encoded.push(b'\n');

    let mut guard = writer.lock().await;
    if let Err(e) = guard.write_all(&encoded).await {
        warn!(error = %e, "failed to write api response");
    }
}
