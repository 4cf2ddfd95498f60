use crate::{
    camera::{Camera, CameraError},
    config::{Config, PipelineConfig},
    detection_client::{DetectionClient, ObjectDetection},
    pipeline::{AnalysisWorker, CapturePipeline, FrameSource},
    server::{SharedState, StatusServer},
    services::{AzureVisionClient, GeminiClient},
    signal::SharedSignal,
    speech::AzureSpeech,
    telemetry::Metrics,
    voice::VoiceAssistant,
};
use std::sync::Arc;
use tokio::{signal, sync::broadcast, task::JoinHandle};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new()?);
    let signal = SharedSignal::new();

    // One speech client serves recognition and the synthesizer both loops share.
    let speech = Arc::new(AzureSpeech::new(&config.speech)?);
    let vision = Arc::new(AzureVisionClient::new(&config.vision)?);
    let generator = Arc::new(GeminiClient::new(&config.generative)?);

    let camera = Camera::open(&config.camera).await;
    let detector: Option<Box<dyn ObjectDetection>> = match &camera {
        Err(_) => None,
        Ok(_) => match DetectionClient::connect(&config.detection_server).await {
            Ok(client) => Some(Box::new(client)),
            Err(e) => {
                tracing::error!("Server connection failed: {}", e);
                None
            }
        },
    };

    let (shutdown_tx, _) = broadcast::channel(1);

    let server = StatusServer::new(
        &config.server,
        SharedState {
            metrics: metrics.clone(),
            signal: signal.clone(),
        },
    )
    .await?;
    let server_handle = server.run(shutdown_tx.subscribe());

    let worker = AnalysisWorker::new(
        vision.clone(),
        vision,
        detector,
        speech.clone(),
        signal.clone(),
        metrics.clone(),
        config.pipeline.clone(),
    );
    let pipeline_handle = spawn_vision(
        camera,
        worker,
        signal.clone(),
        metrics.clone(),
        config.pipeline,
        shutdown_tx.subscribe(),
    );

    let assistant = VoiceAssistant::new(
        speech.clone(),
        speech,
        generator,
        signal,
        metrics,
        &config.voice,
    );
    let voice_shutdown_rx = shutdown_tx.subscribe();
    let voice_handle = tokio::spawn(async move { assistant.run(voice_shutdown_rx).await });

    shutdown_signal().await;
    tracing::info!("Shutting down…");

    let _ = shutdown_tx.send(());
    if let Err(e) = voice_handle.await {
        tracing::error!("Voice loop failed: {}", e);
    }
    if let Some(handle) = pipeline_handle {
        match handle.await {
            Ok(processed) => tracing::info!("Vision pipeline analyzed {} frames", processed),
            Err(e) => tracing::error!("Vision pipeline failed: {}", e),
        }
    }
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Status server failed: {}", e),
        Err(e) => tracing::error!("Status server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

/// Starts the capture pipeline. Without a camera the node keeps running
/// voice-only and `None` is returned.
fn spawn_vision<S: FrameSource + 'static>(
    camera: Result<S, CameraError>,
    worker: AnalysisWorker,
    signal: SharedSignal,
    metrics: Arc<Metrics>,
    settings: PipelineConfig,
    shutdown_rx: broadcast::Receiver<()>,
) -> Option<JoinHandle<u64>> {
    match camera {
        Ok(source) => {
            let pipeline = CapturePipeline::new(source, signal, metrics, settings);
            Some(tokio::spawn(pipeline.run(worker, shutdown_rx)))
        }
        Err(e) => {
            tracing::error!("Failed to initialize camera, vision disabled: {}", e);
            None
        }
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{
        metrics, settings, worker, CountingSource, RecordingAnalyzer, RecordingSynthesizer,
    };
    use tokio::time::{timeout, Duration};

    fn analysis_worker(signal: &SharedSignal) -> AnalysisWorker {
        worker(
            Arc::new(RecordingAnalyzer::default()),
            None,
            Arc::new(RecordingSynthesizer::default()),
            signal.clone(),
        )
    }

    #[tokio::test]
    async fn test_missing_camera_skips_vision() {
        let signal = SharedSignal::new();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_vision::<CountingSource>(
            Err(CameraError::NotOpened(0)),
            analysis_worker(&signal),
            signal,
            metrics(),
            settings(),
            shutdown_rx,
        );

        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_camera_runs_pipeline() {
        let signal = SharedSignal::new();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_vision(
            Ok(CountingSource::new(41)),
            analysis_worker(&signal),
            signal,
            metrics(),
            settings(),
            shutdown_rx,
        )
        .expect("pipeline started");

        let processed = timeout(Duration::from_secs(2), handle)
            .await
            .expect("source exhausted")
            .unwrap();
        assert_eq!(processed, 3);
    }
}
