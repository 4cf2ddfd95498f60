use opencv::{
    core::{Mat, Vector},
    imgcodecs,
    prelude::*,
};
use thiserror::Error;

const JPEG_QUALITY: i32 = 90;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("Refusing to encode an empty frame")]
    EmptyFrame,
}

pub struct ImageConverter;

impl ImageConverter {
    pub fn encode_mat_to_jpg(frame: &Mat) -> Result<Vec<u8>, CvUtilsError> {
        if frame.empty() {
            return Err(CvUtilsError::EmptyFrame);
        }
        let params = Vector::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, JPEG_QUALITY]);
        let mut buf = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", frame, &mut buf, &params)
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        Ok(buf.into())
    }
}
