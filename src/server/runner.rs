//! Server execution logic.

use std::sync::Arc;

use tokio::net::TcpListener;

use super::handler::handle_connection;
use super::signal::shutdown_signal;
use super::state::AppState;

/// Run the chat server until a shutdown signal arrives.
///
/// Failing to bind the listening port is the only fatal error; everything
/// after that is handled per connection.
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
/// * `state` - Shared application state
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Chat server listening on {}", listener.local_addr()?);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    serve(listener, state).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Accept loop over an already-bound listener.
///
/// Split out from [`run_server`] so tests can bind an ephemeral port and
/// drive the loop on their own task.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("Client connected: {}", peer);
                    tokio::spawn(handle_connection(state.clone(), stream, peer));
                }
                Err(e) => tracing::warn!("Failed to accept connection: {}", e),
            },
            _ = &mut shutdown => break,
        }
    }
}
