//! TCP accept loop for the binary mailbox protocol.

use crate::server::{CourierServer, RelayMetrics};
use crate::session::Session;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Accept relay connections forever, one task per connection.
///
/// A failed accept is logged and the loop carries on; a failing session
/// never affects other connections.
pub async fn serve(listener: TcpListener, server: Arc<CourierServer>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept relay connection: {}", e);
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }
        RelayMetrics::incr(&server.metrics().connections_total);

        let session = Session::new(server.clone(), stream, peer);
        // Spawn session handler - don't block the accept loop
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                tracing::warn!("Session from {} ended with error: {}", peer, e);
            }
        });
    }
}
