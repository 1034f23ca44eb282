//! Mailbox relay client.
//!
//! One [`RelayClient`] wraps one connection. Commands are strictly
//! request/reply, so each call writes a frame and waits for its answer.

use crate::error::Result;
use courier_types::wire::{self, Command, FetchReply};
use courier_types::{Envelope, Identity};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Client for the binary mailbox protocol.
#[derive(Debug)]
pub struct RelayClient<S> {
    stream: BufReader<S>,
    identity: Option<Identity>,
}

impl RelayClient<TcpStream> {
    /// Open a TCP connection to the relay.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(courier_types::WireError::Io)?;
        stream
            .set_nodelay(true)
            .map_err(courier_types::WireError::Io)?;
        Ok(Self::from_stream(stream))
    }
}

impl<S> RelayClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-open stream.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            identity: None,
        }
    }

    /// Identity registered on this connection, if any.
    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    /// Bind this connection to `identity`.
    pub async fn register(&mut self, identity: Identity) -> Result<()> {
        self.write(&Command::Register(identity)).await?;
        wire::read_ack(&mut self.stream).await?;
        self.identity = Some(identity);
        tracing::debug!("Registered as {:?}", identity);
        Ok(())
    }

    /// Deposit `payload` in `recipient`'s mailbox.
    pub async fn send(&mut self, recipient: Identity, payload: &[u8]) -> Result<()> {
        self.write(&Command::Send {
            recipient,
            payload: payload.to_vec(),
        })
        .await?;
        wire::read_ack(&mut self.stream).await?;
        Ok(())
    }

    /// Drain this connection's mailbox.
    ///
    /// Returns [`FetchReply::NotRegistered`] if [`RelayClient::register`] was never called.
    pub async fn fetch(&mut self) -> Result<FetchReply> {
        self.write(&Command::Fetch).await?;
        Ok(wire::read_fetch_reply(&mut self.stream).await?)
    }

    /// Drain the mailbox, treating "not registered" as empty.
    pub async fn fetch_messages(&mut self) -> Result<Vec<Envelope>> {
        match self.fetch().await? {
            FetchReply::Messages(messages) => Ok(messages),
            FetchReply::NotRegistered => Ok(Vec::new()),
        }
    }

    async fn write(&mut self, command: &Command) -> Result<()> {
        let stream = self.stream.get_mut();
        stream
            .write_all(&command.encode())
            .await
            .map_err(courier_types::WireError::Io)?;
        stream.flush().await.map_err(courier_types::WireError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::wire::{encode_fetch_reply, read_command, REPLY_NOT_REGISTERED, REPLY_OK};

    #[tokio::test]
    async fn register_and_fetch_against_scripted_peer() {
        let (client_end, mut peer) = tokio::io::duplex(4096);
        let me = Identity::new([5u8; 32]);
        let friend = Identity::new([6u8; 32]);

        let script = tokio::spawn(async move {
            assert_eq!(read_command(&mut peer).await.unwrap(), Some(Command::Fetch));
            peer.write_all(&[REPLY_NOT_REGISTERED]).await.unwrap();

            assert_eq!(
                read_command(&mut peer).await.unwrap(),
                Some(Command::Register(me))
            );
            peer.write_all(&[REPLY_OK]).await.unwrap();

            assert_eq!(read_command(&mut peer).await.unwrap(), Some(Command::Fetch));
            let reply = encode_fetch_reply(&[Envelope::new(friend, b"hello".to_vec())]);
            peer.write_all(&reply).await.unwrap();
        });

        let mut client = RelayClient::from_stream(client_end);
        assert_eq!(client.fetch().await.unwrap(), FetchReply::NotRegistered);
        client.register(me).await.unwrap();
        assert_eq!(client.identity(), Some(me));
        assert_eq!(
            client.fetch_messages().await.unwrap(),
            vec![Envelope::new(friend, b"hello".to_vec())]
        );
        script.await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_ack_is_an_error() {
        let (client_end, mut peer) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let _ = read_command(&mut peer).await;
            peer.write_all(&[0x42]).await.unwrap();
        });

        let mut client = RelayClient::from_stream(client_end);
        assert!(client.send(Identity::random(), b"x").await.is_err());
    }
}
