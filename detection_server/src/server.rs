use crate::{
    config::Config,
    detector::Detector,
    distance::DistanceEstimator,
    inference::{InferenceService, ProcessError},
    labels::ClassLabels,
    ort_service::OrtDetector,
};
use sightline_proto::{FrameConfig, FrameError, FrameTransport};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    signal,
    sync::broadcast,
};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("Failed to initialize detector: {0}")]
    Detector(String),
    #[error("Failed to load labels: {0}")]
    Labels(String),
}

#[derive(Error, Debug)]
enum ConnectionError {
    #[error("Transport error: {0}")]
    Transport(#[from] FrameError),
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessError),
}

/// Sequential accept loop: one client is served at a time, a second client
/// waits in the listen backlog until the first disconnects.
pub struct DetectionServer<D: Detector> {
    listener: TcpListener,
    inference_service: InferenceService<D>,
    frame_config: FrameConfig,
}

impl<D: Detector> DetectionServer<D> {
    pub async fn bind(
        addr: &str,
        inference_service: InferenceService<D>,
        frame_config: FrameConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr.to_string(), e))?;
        Ok(Self {
            listener,
            inference_service,
            frame_config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        match self.local_addr() {
            Ok(addr) => tracing::info!("Detection server listening on {}", addr),
            Err(e) => tracing::warn!("Detection server listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if self.handle_client(stream, addr, &mut shutdown_rx).await {
                                break;
                            }
                        }
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        tracing::info!("Detection server shutting down");
    }

    /// Serves one client until it disconnects. Returns `true` when shutdown
    /// was requested while the client was connected.
    async fn handle_client(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        tracing::info!("Connected by {}", addr);
        let mut transport = FrameTransport::new(stream, self.frame_config);

        let shutdown = tokio::select! {
            result = self.serve(&mut transport) => {
                if let Err(e) = result {
                    tracing::error!("Exception with client {}: {}", addr, e);
                }
                false
            }
            _ = shutdown_rx.recv() => true,
        };

        drop(transport);
        tracing::info!("Client {} disconnected", addr);
        shutdown
    }

    async fn serve(&self, transport: &mut FrameTransport<TcpStream>) -> Result<(), ConnectionError> {
        while let Some(payload) = transport.read_frame().await? {
            let result = self.inference_service.process_frame(&payload).await?;
            tracing::debug!("{}", result.inference_output);
            transport.write_frame(&result.to_bytes()).await?;
        }
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), ServerError> {
    let labels = ClassLabels::from_config(&config.labels).map_err(ServerError::Labels)?;
    let detector =
        OrtDetector::new(&config.model, labels).map_err(|e| ServerError::Detector(e.to_string()))?;
    let inference_service = InferenceService::new(detector, DistanceEstimator::new(&config.distance));

    let addr = config.server.get_address();
    let server = DetectionServer::bind(&addr, inference_service, config.transport).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown");
        let _ = shutdown_tx.send(());
    });

    server.run(shutdown_rx).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
