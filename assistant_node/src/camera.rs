use crate::config::CameraConfig;
use crate::cv_utils::{CvUtilsError, ImageConverter};
use crate::pipeline::FrameSource;
use opencv::{core::Mat, prelude::*, videoio};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera {0} could not be opened")]
    NotOpened(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Camera returned an empty frame")]
    EmptyFrame,
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(#[from] CvUtilsError),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::OpenCvError(err)
    }
}

#[derive(Debug)]
pub struct Camera {
    capture: videoio::VideoCapture,
}

impl Camera {
    pub async fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let mut capture = videoio::VideoCapture::new(config.device_index, videoio::CAP_ANY)
            .map_err(CameraError::OpenCameraFailed)?;
        if !capture.is_opened()? {
            return Err(CameraError::NotOpened(config.device_index));
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, f64::from(config.frame_width))?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, f64::from(config.frame_height))?;

        // Let exposure settle before the first sampled frame.
        tokio::time::sleep(Duration::from_millis(config.warmup_ms)).await;

        tracing::info!(
            "Camera {} opened at {}x{}",
            config.device_index,
            config.frame_width,
            config.frame_height
        );
        Ok(Self { capture })
    }
}

impl FrameSource for Camera {
    type Frame = Mat;

    fn capture(&mut self) -> Result<Option<Mat>, CameraError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed {
            return Ok(None);
        }
        if frame.empty() {
            return Err(CameraError::EmptyFrame);
        }
        Ok(Some(frame))
    }

    fn encode(&self, frame: &Mat) -> Result<Vec<u8>, CameraError> {
        Ok(ImageConverter::encode_mat_to_jpg(frame)?)
    }

    fn release(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release camera: {}", e);
        } else {
            tracing::info!("Camera released");
        }
    }
}
