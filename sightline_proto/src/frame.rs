use bytes::{Buf, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 4;
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Connection closed")]
    Closed,
    #[error("Connection closed mid-frame: {buffered} of {expected} bytes received")]
    Truncated { expected: usize, buffered: usize },
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Every framing error ends the connection; this tells a lost peer apart
    /// from a protocol violation.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Closed | FrameError::Truncated { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthOrder {
    #[default]
    Little,
    Big,
}

impl LengthOrder {
    fn encode(self, len: u32) -> [u8; HEADER_LEN] {
        match self {
            LengthOrder::Little => len.to_le_bytes(),
            LengthOrder::Big => len.to_be_bytes(),
        }
    }

    fn decode(self, header: [u8; HEADER_LEN]) -> u32 {
        match self {
            LengthOrder::Little => u32::from_le_bytes(header),
            LengthOrder::Big => u32::from_be_bytes(header),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FrameConfig {
    #[serde(default)]
    pub length_order: LengthOrder,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            length_order: LengthOrder::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Length-prefixed messages over a byte stream.
///
/// Each message is a 4-byte unsigned length followed by exactly that many
/// payload bytes. Reads accumulate into an internal buffer, so the stream may
/// deliver data in chunks of any size.
#[derive(Debug)]
pub struct FrameTransport<S> {
    stream: S,
    buffer: BytesMut,
    config: FrameConfig,
}

impl<S> FrameTransport<S> {
    pub fn new(stream: S, config: FrameConfig) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            config,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameTransport<S> {
    /// Reads the next complete message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between messages.
    /// A close in the middle of a header or payload is `FrameError::Truncated`;
    /// the partial bytes are discarded with the connection.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if !self.fill(HEADER_LEN).await? {
            if self.buffer.is_empty() {
                return Ok(None);
            }
            return Err(FrameError::Truncated {
                expected: HEADER_LEN,
                buffered: self.buffer.len(),
            });
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buffer[..HEADER_LEN]);
        let len = self.config.length_order.decode(header) as usize;
        if len > self.config.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.config.max_frame_len,
            });
        }
        self.buffer.advance(HEADER_LEN);

        if !self.fill(len).await? {
            return Err(FrameError::Truncated {
                expected: len,
                buffered: self.buffer.len(),
            });
        }

        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Writes one message and flushes it.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let too_large = FrameError::TooLarge {
            len: payload.len(),
            max: self.config.max_frame_len,
        };
        if payload.len() > self.config.max_frame_len {
            return Err(too_large);
        }
        let len = u32::try_from(payload.len()).map_err(|_| too_large)?;

        self.stream
            .write_all(&self.config.length_order.encode(len))
            .await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads until at least `needed` bytes are buffered. `false` means EOF
    /// came first.
    async fn fill(&mut self, needed: usize) -> Result<bool, FrameError> {
        while self.buffer.len() < needed {
            let missing = needed - self.buffer.len();
            self.buffer.reserve(missing.min(READ_CHUNK * 16));
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut message = (payload.len() as u32).to_le_bytes().to_vec();
        message.extend_from_slice(payload);
        message
    }

    async fn round_trip(payload: Vec<u8>, pipe_capacity: usize) -> Bytes {
        let (client, server) = duplex(pipe_capacity);
        let mut writer = FrameTransport::new(client, FrameConfig::default());
        let mut reader = FrameTransport::new(server, FrameConfig::default());

        let expected = payload.clone();
        let write = tokio::spawn(async move {
            writer.write_frame(&expected).await.unwrap();
            writer
        });

        let received = reader.read_frame().await.unwrap().unwrap();
        write.await.unwrap();
        received
    }

    #[tokio::test]
    async fn test_round_trip_one_byte_at_a_time() {
        let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
        let received = round_trip(payload.clone(), 1).await;
        assert_eq!(received.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn test_round_trip_whole_buffer() {
        let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 7) as u8).collect();
        let received = round_trip(payload.clone(), 2 * 1024 * 1024).await;
        assert_eq!(received.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn test_round_trip_empty_payload() {
        let received = round_trip(Vec::new(), 1).await;
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_reads_fragmented_header_and_payload() {
        let message = framed(b"hello");
        let stream = Builder::new()
            .read(&message[..1])
            .read(&message[1..3])
            .read(&message[3..6])
            .read(&message[6..])
            .build();
        let mut transport = FrameTransport::new(stream, FrameConfig::default());

        let frame = transport.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
        assert!(transport.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keeps_bytes_of_next_message() {
        let mut both = framed(b"first");
        both.extend(framed(b"second"));
        let stream = Builder::new().read(&both).build();
        let mut transport = FrameTransport::new(stream, FrameConfig::default());

        assert_eq!(transport.read_frame().await.unwrap().unwrap().as_ref(), b"first");
        assert_eq!(transport.read_frame().await.unwrap().unwrap().as_ref(), b"second");
        assert!(transport.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_inside_header_is_truncated() {
        let stream = Builder::new().read(&[5, 0]).build();
        let mut transport = FrameTransport::new(stream, FrameConfig::default());

        match transport.read_frame().await {
            Err(FrameError::Truncated { expected, buffered }) => {
                assert_eq!(expected, HEADER_LEN);
                assert_eq!(buffered, 2);
            }
            other => panic!("expected truncated header, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_inside_payload_is_truncated() {
        let message = framed(b"incomplete payload");
        let stream = Builder::new().read(&message[..10]).build();
        let mut transport = FrameTransport::new(stream, FrameConfig::default());

        let err = transport.read_frame().await.unwrap_err();
        assert!(err.is_disconnect());
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 18,
                buffered: 6
            }
        ));
    }

    #[tokio::test]
    async fn test_rejects_oversized_length() {
        let config = FrameConfig {
            max_frame_len: 8,
            ..FrameConfig::default()
        };
        let stream = Builder::new().read(&framed(b"way too long")[..4]).build();
        let mut transport = FrameTransport::new(stream, config);

        assert!(matches!(
            transport.read_frame().await,
            Err(FrameError::TooLarge { len: 12, max: 8 })
        ));
    }

    #[tokio::test]
    async fn test_write_rejects_oversized_payload() {
        let config = FrameConfig {
            max_frame_len: 2,
            ..FrameConfig::default()
        };
        let stream = Builder::new().build();
        let mut transport = FrameTransport::new(stream, config);

        assert!(matches!(
            transport.write_frame(b"abc").await,
            Err(FrameError::TooLarge { len: 3, max: 2 })
        ));
    }

    #[tokio::test]
    async fn test_big_endian_header() {
        let config = FrameConfig {
            length_order: LengthOrder::Big,
            ..FrameConfig::default()
        };
        let stream = Builder::new()
            .write(&[0, 0, 0, 3])
            .write(b"abc")
            .read(&[0, 0, 0, 2])
            .read(b"ok")
            .build();
        let mut transport = FrameTransport::new(stream, config);

        transport.write_frame(b"abc").await.unwrap();
        assert_eq!(transport.read_frame().await.unwrap().unwrap().as_ref(), b"ok");
    }
}
