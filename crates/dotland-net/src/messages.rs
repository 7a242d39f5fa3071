//! Wire messages and their encoding.
//!
//! A message is encoded as `[protocol byte][postcard body]`, then packed
//! with a compression flag and sent as one frame. [`write_message`] and
//! [`read_message`] do all three steps.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use dotland_sync::{SequencedCommand, Snapshot, StateDelta};

use crate::compression::{CompressionConfig, CompressionError, pack, unpack};
use crate::framing::{FrameConfig, FrameError, read_frame, write_frame};

/// Wire-format revision. Bumped on any incompatible change to [`Message`].
pub const PROTOCOL_VERSION: u8 = 1;

/// Everything a client and server say to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Client → server, first message on a connection.
    Hello {
        /// Client build version, `"<major>.<minor>.<patch>"`.
        client_version: String,
        /// Display name.
        player_name: String,
    },
    /// Server → client, reply to an accepted `Hello`.
    Welcome {
        /// API version the server speaks.
        api_version: String,
        /// Initial state.
        snapshot: Snapshot,
    },
    /// Server → client, reply to a refused `Hello`. The server closes the
    /// connection afterwards.
    Refused {
        /// Human-readable reason.
        reason: String,
        /// API version the server speaks.
        api_version: String,
    },
    /// Client → server.
    Command(SequencedCommand),
    /// Server → client.
    Delta(StateDelta),
    /// Heartbeat.
    Ping {
        /// Sender clock in milliseconds.
        timestamp_ms: u64,
    },
    /// Heartbeat reply, echoing the ping's timestamp.
    Pong {
        /// Echoed timestamp.
        timestamp_ms: u64,
    },
    /// Either side, clean goodbye.
    Logout {
        /// Why the session ends.
        reason: String,
    },
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::Welcome { .. } => "Welcome",
            Self::Refused { .. } => "Refused",
            Self::Command(_) => "Command",
            Self::Delta(_) => "Delta",
            Self::Ping { .. } => "Ping",
            Self::Pong { .. } => "Pong",
            Self::Logout { .. } => "Logout",
        }
    }
}

/// Errors raised while encoding, decoding or transporting messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The body carried no protocol byte.
    #[error("message has no protocol byte")]
    Empty,

    /// The peer speaks another wire revision.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocol(u8),

    /// Postcard encoding or decoding failed.
    #[error("codec error: {0}")]
    Postcard(#[from] postcard::Error),

    /// The compression layer refused the payload.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// The framing layer failed.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl MessageError {
    /// Returns `true` if the peer simply went away.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Frame(FrameError::ConnectionClosed))
    }
}

/// Framing and compression settings shared by both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireConfig {
    /// Frame limits.
    pub frame: FrameConfig,
    /// Compression policy.
    pub compression: CompressionConfig,
}

/// Encodes a message body: protocol byte then postcard.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, MessageError> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a message body produced by [`encode_message`].
pub fn decode_message(data: &[u8]) -> Result<Message, MessageError> {
    let (&version, body) = data.split_first().ok_or(MessageError::Empty)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedProtocol(version));
    }
    Ok(postcard::from_bytes(body)?)
}

/// Encodes, packs and frames `msg`.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &Message,
    config: &WireConfig,
) -> Result<(), MessageError> {
    let body = encode_message(msg)?;
    let payload = pack(&body, &config.compression);
    write_frame(writer, &payload, &config.frame).await?;
    Ok(())
}

/// Reads one frame and decodes it.
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &WireConfig,
) -> Result<Message, MessageError> {
    let payload = read_frame(reader, &config.frame).await?;
    let body = unpack(&payload, config.frame.max_payload_size as usize)?;
    decode_message(&body)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use dotland_sync::{CommandKind, FieldPath, FieldValue};
    use dotland_world::{ContentPack, Grid, PlayerId, WorldState};
    use tokio::io::duplex;

    use super::*;

    fn snapshot(width: u32, height: u32) -> Snapshot {
        let content = Arc::new(ContentPack::builtin().into_tables().unwrap());
        let world = WorldState::new(Grid::new(width, height, content).unwrap());
        Snapshot {
            player_id: PlayerId(1),
            canonical_sequence: 4,
            ack_sequence: 0,
            world: world.to_snapshot(),
        }
    }

    #[test]
    fn test_body_starts_with_protocol_byte() {
        let msg = Message::Ping { timestamp_ms: 99 };
        let body = encode_message(&msg).unwrap();
        assert_eq!(body[0], PROTOCOL_VERSION);
        assert_eq!(decode_message(&body).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_foreign_protocol() {
        let mut body = encode_message(&Message::Pong { timestamp_ms: 1 }).unwrap();
        body[0] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            decode_message(&body),
            Err(MessageError::UnsupportedProtocol(v)) if v == PROTOCOL_VERSION + 1
        ));
        assert!(matches!(decode_message(&[]), Err(MessageError::Empty)));
        assert!(matches!(
            decode_message(&[PROTOCOL_VERSION, 0xFF]),
            Err(MessageError::Postcard(_))
        ));
    }

    #[tokio::test]
    async fn test_session_messages_survive_the_wire() {
        let (mut client, mut server) = duplex(1 << 16);
        let config = WireConfig::default();

        let mut fields = BTreeMap::new();
        fields.insert(FieldPath::PlayerX(PlayerId(1)), FieldValue::Coord(3));
        let sent = vec![
            Message::Hello {
                client_version: "0.1.0".into(),
                player_name: "dot".into(),
            },
            Message::Welcome {
                api_version: "0.1.0".into(),
                snapshot: snapshot(20, 50),
            },
            Message::Command(SequencedCommand {
                sequence: 1,
                timestamp: 5,
                kind: CommandKind::Move { x: 3, y: 0 },
            }),
            Message::Delta(StateDelta {
                canonical_sequence: 5,
                ack_sequence: 1,
                fields,
            }),
            Message::Logout {
                reason: "bye".into(),
            },
        ];
        for msg in &sent {
            write_message(&mut client, msg, &config).await.unwrap();
        }
        for expected in &sent {
            let received = read_message(&mut server, &config).await.unwrap();
            assert_eq!(&received, expected, "{} mangled", expected.kind());
        }
    }

    #[tokio::test]
    async fn test_closed_peer_is_reported() {
        let (client, mut server) = duplex(64);
        drop(client);
        let err = read_message(&mut server, &WireConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
