//! Per-connection session management.
//!
//! Each accepted relay connection gets a Session that tracks which identity
//! it registered and answers commands until the peer closes or sends a
//! malformed frame.

use crate::error::RelayError;
use crate::mailbox::ConnectionId;
use crate::server::{CourierServer, RelayMetrics};
use courier_types::wire::{self, Command, REPLY_NOT_REGISTERED, REPLY_OK};
use courier_types::Identity;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No REGISTER yet. SEND is accepted under the anonymous sender; FETCH is refused.
    Unregistered,
    /// Bound to an identity.
    Registered {
        /// The identity this connection speaks for.
        identity: Identity,
    },
}

/// A per-connection session.
pub struct Session<S> {
    server: Arc<CourierServer>,
    stream: BufReader<S>,
    peer: SocketAddr,
    connection: ConnectionId,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a new session for an accepted stream.
    pub fn new(server: Arc<CourierServer>, stream: S, peer: SocketAddr) -> Self {
        let connection = server.next_connection_id();
        Self {
            server,
            stream: BufReader::new(stream),
            peer,
            connection,
            state: SessionState::Unregistered,
        }
    }

    /// Run the session until the peer disconnects or a frame is malformed.
    ///
    /// The online marker is released on every exit path.
    pub async fn run(mut self) -> Result<(), RelayError> {
        tracing::info!("New connection {} from {}", self.connection, self.peer);

        let result = self.serve().await;

        // Cleanup
        if let SessionState::Registered { identity } = self.state {
            if self
                .server
                .mailboxes()
                .go_offline(&identity, self.connection)
                .await
            {
                tracing::debug!("{:?} went offline", identity);
            }
        }
        tracing::info!("Connection {} from {} closed", self.connection, self.peer);

        result
    }

    async fn serve(&mut self) -> Result<(), RelayError> {
        loop {
            let command = match wire::read_command(&mut self.stream).await {
                Ok(Some(command)) => command,
                Ok(None) => return Ok(()),
                Err(e) => {
                    RelayMetrics::incr(&self.server.metrics().protocol_errors);
                    tracing::warn!("Protocol error on connection {}: {}", self.connection, e);
                    return Err(e.into());
                }
            };

            tracing::debug!("Connection {}: {}", self.connection, command.name());
            match command {
                Command::Register(identity) => self.handle_register(identity).await?,
                Command::Send { recipient, payload } => {
                    self.handle_send(recipient, payload).await?
                }
                Command::Fetch => self.handle_fetch().await?,
            }
        }
    }

    async fn handle_register(&mut self, identity: Identity) -> Result<(), RelayError> {
        let mailboxes = self.server.mailboxes();

        if let SessionState::Registered { identity: previous } = self.state {
            if previous != identity {
                mailboxes.go_offline(&previous, self.connection).await;
            }
        }
        mailboxes.register(identity, self.connection).await;
        self.state = SessionState::Registered { identity };

        RelayMetrics::incr(&self.server.metrics().registrations_total);
        tracing::info!("Registered {:?} on connection {}", identity, self.connection);

        self.reply(&[REPLY_OK]).await
    }

    async fn handle_send(
        &mut self,
        recipient: Identity,
        payload: Vec<u8>,
    ) -> Result<(), RelayError> {
        let sender = match self.state {
            SessionState::Registered { identity } => identity,
            SessionState::Unregistered => Identity::ANONYMOUS,
        };
        let len = payload.len();
        let queued = self
            .server
            .mailboxes()
            .deposit(recipient, sender, payload)
            .await;

        let metrics = self.server.metrics();
        RelayMetrics::incr(&metrics.sends_total);
        metrics.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        tracing::debug!(
            "Queued {} bytes for {:?} from {:?} ({} waiting)",
            len,
            recipient,
            sender,
            queued
        );

        self.reply(&[REPLY_OK]).await
    }

    async fn handle_fetch(&mut self) -> Result<(), RelayError> {
        RelayMetrics::incr(&self.server.metrics().fetches_total);

        let SessionState::Registered { identity } = self.state else {
            tracing::warn!("FETCH before REGISTER on connection {}", self.connection);
            return self.reply(&[REPLY_NOT_REGISTERED]).await;
        };

        let envelopes = self.server.mailboxes().drain(&identity).await;
        let reply = wire::encode_fetch_reply(&envelopes);

        if !envelopes.is_empty() {
            let metrics = self.server.metrics();
            let bytes: usize = envelopes.iter().map(|e| e.payload.len()).sum();
            metrics
                .messages_delivered
                .fetch_add(envelopes.len() as u64, Ordering::Relaxed);
            metrics.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
            tracing::info!("Delivered {} messages to {:?}", envelopes.len(), identity);
        }

        self.reply(&reply).await
    }

    async fn reply(&mut self, bytes: &[u8]) -> Result<(), RelayError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteKeyStore;
    use courier_types::wire::{read_ack, read_fetch_reply, Envelope, FetchReply};
    use courier_types::WireError;
    use tokio::io::{AsyncReadExt, DuplexStream};

    async fn test_server() -> Arc<CourierServer> {
        let store = SqliteKeyStore::in_memory().await.unwrap();
        Arc::new(CourierServer::new(Config::default(), Arc::new(store)))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Spawn a session over an in-process pipe and return the client end.
    fn connect(
        server: &Arc<CourierServer>,
    ) -> (DuplexStream, tokio::task::JoinHandle<Result<(), RelayError>>) {
        let (client, server_end) = tokio::io::duplex(64 * 1024);
        let session = Session::new(server.clone(), server_end, peer());
        (client, tokio::spawn(session.run()))
    }

    async fn command(client: &mut DuplexStream, cmd: Command) {
        client.write_all(&cmd.encode()).await.unwrap();
    }

    async fn register(client: &mut DuplexStream, identity: Identity) {
        command(client, Command::Register(identity)).await;
        read_ack(client).await.unwrap();
    }

    async fn send(client: &mut DuplexStream, recipient: Identity, payload: &[u8]) {
        command(
            client,
            Command::Send {
                recipient,
                payload: payload.to_vec(),
            },
        )
        .await;
        read_ack(client).await.unwrap();
    }

    async fn fetch(client: &mut DuplexStream) -> FetchReply {
        command(client, Command::Fetch).await;
        read_fetch_reply(client).await.unwrap()
    }

    #[tokio::test]
    async fn send_then_fetch_in_order() {
        let server = test_server().await;
        let a = Identity::random();
        let b = Identity::random();

        let (mut alice, _) = connect(&server);
        let (mut bob, _) = connect(&server);
        register(&mut alice, a).await;
        register(&mut bob, b).await;

        send(&mut bob, a, b"m1").await;
        send(&mut bob, a, b"m2").await;

        assert_eq!(
            fetch(&mut alice).await,
            FetchReply::Messages(vec![
                Envelope::new(b, b"m1".to_vec()),
                Envelope::new(b, b"m2".to_vec()),
            ])
        );
        assert_eq!(fetch(&mut alice).await, FetchReply::Messages(Vec::new()));
    }

    #[tokio::test]
    async fn fetch_before_register_is_refused_and_connection_survives() {
        let server = test_server().await;
        let (mut client, _) = connect(&server);

        assert_eq!(fetch(&mut client).await, FetchReply::NotRegistered);

        let me = Identity::random();
        register(&mut client, me).await;
        assert_eq!(fetch(&mut client).await, FetchReply::Messages(Vec::new()));
    }

    #[tokio::test]
    async fn unregistered_sender_is_anonymous() {
        let server = test_server().await;
        let target = Identity::random();

        let (mut anon, _) = connect(&server);
        send(&mut anon, target, b"hi").await;

        let (mut owner, _) = connect(&server);
        register(&mut owner, target).await;
        match fetch(&mut owner).await {
            FetchReply::Messages(mail) => {
                assert_eq!(mail.len(), 1);
                assert!(mail[0].sender.is_anonymous());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn sender_comes_from_registration_not_frame() {
        let server = test_server().await;
        let a = Identity::random();
        let b = Identity::random();

        let (mut bob, _) = connect(&server);
        register(&mut bob, b).await;
        send(&mut bob, a, b"signed by b").await;

        let (mut alice, _) = connect(&server);
        register(&mut alice, a).await;
        let FetchReply::Messages(mail) = fetch(&mut alice).await else {
            panic!("expected messages");
        };
        assert_eq!(mail[0].sender, b);
    }

    #[tokio::test]
    async fn disconnect_clears_online_marker() {
        let server = test_server().await;
        let a = Identity::random();

        let (mut client, task) = connect(&server);
        register(&mut client, a).await;
        assert!(server.mailboxes().is_online(&a).await);

        drop(client);
        task.await.unwrap().unwrap();
        assert!(!server.mailboxes().is_online(&a).await);
    }

    #[tokio::test]
    async fn old_connection_closing_keeps_newer_marker() {
        let server = test_server().await;
        let a = Identity::random();

        let (mut first, first_task) = connect(&server);
        register(&mut first, a).await;
        let (mut second, _) = connect(&server);
        register(&mut second, a).await;

        drop(first);
        first_task.await.unwrap().unwrap();
        assert!(server.mailboxes().is_online(&a).await);
    }

    #[tokio::test]
    async fn reregister_moves_marker() {
        let server = test_server().await;
        let a = Identity::random();
        let b = Identity::random();

        let (mut client, _) = connect(&server);
        register(&mut client, a).await;
        register(&mut client, b).await;

        assert!(!server.mailboxes().is_online(&a).await);
        assert!(server.mailboxes().is_online(&b).await);
    }

    #[tokio::test]
    async fn unknown_command_ends_connection() {
        let server = test_server().await;
        let (mut client, task) = connect(&server);

        client.write_all(&[0x7F]).await.unwrap();
        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(RelayError::Protocol(WireError::UnknownCommand(0x7F)))
        ));

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        assert_eq!(server.metrics().protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn truncated_send_stores_nothing() {
        let server = test_server().await;
        let target = Identity::random();
        let (mut client, task) = connect(&server);

        let mut frame = Command::Send {
            recipient: target,
            payload: vec![1u8; 100],
        }
        .encode();
        frame.truncate(frame.len() - 10);
        client.write_all(&frame).await.unwrap();
        client.shutdown().await.unwrap();

        assert!(task.await.unwrap().is_err());
        assert_eq!(server.mailboxes().pending(&target).await, 0);
    }

    #[tokio::test]
    async fn metrics_count_traffic() {
        let server = test_server().await;
        let a = Identity::random();
        let (mut client, _) = connect(&server);

        register(&mut client, a).await;
        send(&mut client, a, b"12345").await;
        fetch(&mut client).await;

        let m = server.metrics();
        assert_eq!(m.registrations_total.load(Ordering::Relaxed), 1);
        assert_eq!(m.sends_total.load(Ordering::Relaxed), 1);
        assert_eq!(m.messages_delivered.load(Ordering::Relaxed), 1);
        assert_eq!(m.bytes_received.load(Ordering::Relaxed), 5);
        assert_eq!(m.bytes_sent.load(Ordering::Relaxed), 5);
    }
}
