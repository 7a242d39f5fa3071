//! TCP transport for Dotland: framing, compression, the message set, and the
//! client and server connection loops.

pub mod compression;
pub mod framing;
pub mod messages;
pub mod tcp_client;
pub mod tcp_server;

pub use compression::{CompressionConfig, CompressionError, pack, unpack};
pub use framing::{FrameConfig, FrameError, read_frame, write_frame};
pub use messages::{
    Message, MessageError, PROTOCOL_VERSION, WireConfig, decode_message, encode_message,
    read_message, write_message,
};
pub use tcp_client::{
    ClientConfig, ClientError, ConnectionState, ConnectionStateWatch, GameClient,
};
pub use tcp_server::{ConnectionId, GameServer, IdGenerator, ServerConfig};
