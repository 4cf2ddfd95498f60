use crate::config::DetectionServerConfig;
use async_trait::async_trait;
use sightline_proto::{DecodeError, DetectionResult, FrameConfig, FrameError, FrameTransport};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    time::{sleep, timeout, Duration},
};
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DetectionClientError {
    #[error("Failed to connect to detection server: {0}")]
    ConnectionFailed(#[source] std::io::Error),
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),
    #[error("Maximum connection retries exceeded ({0} attempts).")]
    MaxRetriesExceeded(u32),
    #[error("Transport error: {0}")]
    Transport(#[from] FrameError),
    #[error("Invalid response: {0}")]
    Decode(#[from] DecodeError),
}

/// Sends one encoded frame and waits for its detections.
#[async_trait]
pub trait ObjectDetection: Send + Sync {
    async fn detect(&mut self, frame: &[u8]) -> Result<DetectionResult, DetectionClientError>;
}

/// Frame Transport client for the detection server. Requests are strictly
/// send-then-receive, so responses always match the frame just sent.
pub struct DetectionClient {
    address: String,
    frame_config: FrameConfig,
    connect_timeout: Duration,
    transport: Option<FrameTransport<TcpStream>>,
}

impl DetectionClient {
    /// Connects with exponential backoff and jitter.
    pub async fn connect(config: &DetectionServerConfig) -> Result<Self, DetectionClientError> {
        let address = config.get_address();
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);
        let max_retries = config.max_retries.max(1);

        for attempt in 1..=max_retries {
            match Self::open(&address, connect_timeout, config.transport).await {
                Ok(transport) => {
                    tracing::info!("Connected to detection server at {}", address);
                    return Ok(Self {
                        address,
                        frame_config: config.transport,
                        connect_timeout,
                        transport: Some(transport),
                    });
                }
                Err(e) => tracing::error!(
                    "Detection server connection attempt {}/{} failed: {}",
                    attempt,
                    max_retries,
                    e
                ),
            }

            if attempt < max_retries {
                let jitter = rand::random::<f32>() * 0.2 + 0.9;
                sleep(retry_delay.mul_f32(jitter)).await;
                retry_delay = (retry_delay * 2).min(max_retry_delay);
            }
        }

        Err(DetectionClientError::MaxRetriesExceeded(max_retries))
    }

    async fn open(
        address: &str,
        connect_timeout: Duration,
        frame_config: FrameConfig,
    ) -> Result<FrameTransport<TcpStream>, DetectionClientError> {
        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| DetectionClientError::ConnectTimeout(address.to_string()))?
            .map_err(DetectionClientError::ConnectionFailed)?;
        stream
            .set_nodelay(true)
            .map_err(DetectionClientError::ConnectionFailed)?;
        Ok(FrameTransport::new(stream, frame_config))
    }

    async fn round_trip(
        transport: &mut FrameTransport<TcpStream>,
        frame: &[u8],
    ) -> Result<DetectionResult, DetectionClientError> {
        transport.write_frame(frame).await?;
        let payload = transport.read_frame().await?.ok_or(FrameError::Closed)?;
        Ok(DetectionResult::from_bytes(&payload)?)
    }
}

#[async_trait]
impl ObjectDetection for DetectionClient {
    /// A failed request drops the connection; the next call reconnects once.
    #[instrument(skip(self, frame), fields(frame_len = frame.len()))]
    async fn detect(&mut self, frame: &[u8]) -> Result<DetectionResult, DetectionClientError> {
        let mut transport = match self.transport.take() {
            Some(transport) => transport,
            None => {
                tracing::info!("Reconnecting to detection server at {}", self.address);
                Self::open(&self.address, self.connect_timeout, self.frame_config).await?
            }
        };

        let result = Self::round_trip(&mut transport, frame).await;
        if result.is_ok() {
            self.transport = Some(transport);
        }
        result
    }
}
