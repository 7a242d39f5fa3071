//! Length-prefixed framing for TCP streams.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length excludes the prefix itself. Every payload starts with a
//! compression flag byte, so an empty frame is a protocol error.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Limits for the framing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Largest payload accepted or sent, in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1 << 20,
        }
    }
}

/// Errors raised while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds [`FrameConfig::max_payload_size`].
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Announced or attempted size.
        size: usize,
        /// Configured maximum.
        max: u32,
    },

    /// A frame with no payload.
    #[error("empty frame")]
    Empty,

    /// The peer closed the stream, possibly mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

/// Reads one frame and returns its payload.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let size = reader.read_u32_le().await?;
    if size > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: size as usize,
            max: config.max_payload_size,
        });
    }
    if size == 0 {
        return Err(FrameError::Empty);
    }

    let mut payload = vec![0u8; size as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes one frame. Prefix and payload go out in a single write.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    if payload.len() > config.max_payload_size as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: config.max_payload_size,
        });
    }
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_separately_and_in_order() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        for payload in [&b"first"[..], b"second", b"x"] {
            write_frame(&mut client, payload, &config).await.unwrap();
        }
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"second");
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_small_pipe_forces_partial_reads() {
        let (mut client, mut server) = duplex(8);
        let config = FrameConfig::default();
        let payload = vec![0xA5u8; 300];

        let expected = payload.clone();
        let writer_config = config.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload, &writer_config)
                .await
                .unwrap();
        });
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), expected);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[3, 0, 0, 0]).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        let received = read_frame(&mut server, &FrameConfig::default())
            .await
            .unwrap();
        assert_eq!(received, b"abc");
    }

    #[tokio::test]
    async fn test_size_limit_enforced_both_ways() {
        let (mut client, mut server) = duplex(64);
        let config = FrameConfig {
            max_payload_size: 16,
        };

        let result = write_frame(&mut client, &[1u8; 17], &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 17, .. })));

        client.write_all(&1024u32.to_le_bytes()).await.unwrap();
        let result = read_frame(&mut server, &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 1024, .. })));
    }

    #[tokio::test]
    async fn test_empty_frames_rejected() {
        let (mut client, mut server) = duplex(64);
        let config = FrameConfig::default();
        assert!(matches!(
            write_frame(&mut client, &[], &config).await,
            Err(FrameError::Empty)
        ));
        client.write_all(&0u32.to_le_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut server, &config).await,
            Err(FrameError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_closed_stream_detected() {
        let (mut client, mut server) = duplex(64);
        // Half a frame, then hang up.
        client.write_all(&[10, 0, 0, 0, 1, 2]).await.unwrap();
        drop(client);
        assert!(matches!(
            read_frame(&mut server, &FrameConfig::default()).await,
            Err(FrameError::ConnectionClosed)
        ));
    }
}
