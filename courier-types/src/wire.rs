//! Binary relay protocol.
//!
//! Every request starts with a one-byte command. Length fields are `u32`
//! big-endian.
//!
//! ```text
//! REGISTER  0x01 | identity[32]                         -> 0x00
//! SEND      0x02 | recipient[32] | len[4] | payload     -> 0x00
//! FETCH     0x03                                        -> count[4] | (sender[32] | len[4] | payload)*
//!                                                          or 0xFF when the connection never registered
//! ```
//!
//! Readers here are shared by the relay (commands) and the client (replies).

use crate::error::WireError;
use crate::ids::{Identity, IDENTITY_LEN};
use tokio::io::{AsyncRead, AsyncReadExt};

/// REGISTER command byte.
pub const CMD_REGISTER: u8 = 0x01;
/// SEND command byte.
pub const CMD_SEND: u8 = 0x02;
/// FETCH command byte.
pub const CMD_FETCH: u8 = 0x03;

/// Acknowledgement for REGISTER and SEND.
pub const REPLY_OK: u8 = 0x00;
/// FETCH on a connection that never registered.
pub const REPLY_NOT_REGISTERED: u8 = 0xFF;

/// Initial buffer reservation for payloads; the buffer grows with the bytes actually received.
const PAYLOAD_PREALLOC: usize = 64 * 1024;

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Bind the connection to an identity.
    Register(Identity),
    /// Deposit an opaque blob in a recipient's mailbox.
    Send {
        /// Mailbox owner.
        recipient: Identity,
        /// Ciphertext, never inspected.
        payload: Vec<u8>,
    },
    /// Drain the caller's mailbox.
    Fetch,
}

impl Command {
    /// Encode as a request frame.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Register(identity) => {
                let mut out = Vec::with_capacity(1 + IDENTITY_LEN);
                out.push(CMD_REGISTER);
                out.extend_from_slice(identity.as_bytes());
                out
            }
            Command::Send { recipient, payload } => {
                let mut out = Vec::with_capacity(1 + IDENTITY_LEN + 4 + payload.len());
                out.push(CMD_SEND);
                out.extend_from_slice(recipient.as_bytes());
                out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                out.extend_from_slice(payload);
                out
            }
            Command::Fetch => vec![CMD_FETCH],
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register(_) => "REGISTER",
            Command::Send { .. } => "SEND",
            Command::Fetch => "FETCH",
        }
    }
}

/// One delivered mailbox entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Registered identity of the sending connection, or [`Identity::ANONYMOUS`].
    pub sender: Identity,
    /// Opaque ciphertext.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(sender: Identity, payload: Vec<u8>) -> Self {
        Self { sender, payload }
    }
}

/// Server answer to FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchReply {
    /// The drained mailbox, in arrival order.
    Messages(Vec<Envelope>),
    /// The connection never sent REGISTER.
    NotRegistered,
}

/// Encode a FETCH reply carrying `envelopes`.
pub fn encode_fetch_reply(envelopes: &[Envelope]) -> Vec<u8> {
    let body: usize = envelopes
        .iter()
        .map(|e| IDENTITY_LEN + 4 + e.payload.len())
        .sum();
    let mut out = Vec::with_capacity(4 + body);
    out.extend_from_slice(&(envelopes.len() as u32).to_be_bytes());
    for envelope in envelopes {
        out.extend_from_slice(envelope.sender.as_bytes());
        out.extend_from_slice(&(envelope.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&envelope.payload);
    }
    out
}

/// Read the next command.
///
/// Returns `Ok(None)` when the peer closed cleanly between commands.
pub async fn read_command<R>(reader: &mut R) -> Result<Option<Command>, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut cmd = [0u8; 1];
    if reader.read(&mut cmd).await? == 0 {
        return Ok(None);
    }

    match cmd[0] {
        CMD_REGISTER => Ok(Some(Command::Register(read_identity(reader, "identity").await?))),
        CMD_SEND => {
            let recipient = read_identity(reader, "recipient").await?;
            let payload = read_payload(reader).await?;
            Ok(Some(Command::Send { recipient, payload }))
        }
        CMD_FETCH => Ok(Some(Command::Fetch)),
        other => Err(WireError::UnknownCommand(other)),
    }
}

/// Read a one-byte REGISTER/SEND acknowledgement.
pub async fn read_ack<R>(reader: &mut R) -> Result<(), WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut reply = [0u8; 1];
    reader
        .read_exact(&mut reply)
        .await
        .map_err(|e| WireError::from_read(e, "ack"))?;
    match reply[0] {
        REPLY_OK => Ok(()),
        other => Err(WireError::UnexpectedReply(other)),
    }
}

/// Read a FETCH reply.
pub async fn read_fetch_reply<R>(reader: &mut R) -> Result<FetchReply, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut count = [0u8; 4];
    reader
        .read_exact(&mut count[..1])
        .await
        .map_err(|e| WireError::from_read(e, "count"))?;
    if count[0] == REPLY_NOT_REGISTERED {
        return Ok(FetchReply::NotRegistered);
    }
    reader
        .read_exact(&mut count[1..])
        .await
        .map_err(|e| WireError::from_read(e, "count"))?;

    let count = u32::from_be_bytes(count) as usize;
    let mut envelopes = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let sender = read_identity(reader, "sender").await?;
        let payload = read_payload(reader).await?;
        envelopes.push(Envelope { sender, payload });
    }
    Ok(FetchReply::Messages(envelopes))
}

async fn read_identity<R>(reader: &mut R, field: &'static str) -> Result<Identity, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut bytes = [0u8; IDENTITY_LEN];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| WireError::from_read(e, field))?;
    Ok(Identity::new(bytes))
}

async fn read_payload<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len = [0u8; 4];
    reader
        .read_exact(&mut len)
        .await
        .map_err(|e| WireError::from_read(e, "length"))?;
    let len = u32::from_be_bytes(len) as usize;

    let mut payload = Vec::with_capacity(len.min(PAYLOAD_PREALLOC));
    let read = reader.take(len as u64).read_to_end(&mut payload).await?;
    if read != len {
        return Err(WireError::Truncated { field: "payload" });
    }
    Ok(payload)
}
