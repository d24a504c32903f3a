use crate::detector::Detection;
use crate::labels::ClassCatalog;
use opencv::{
    core::{Mat, Point, Rect, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("OpenCV decode error: {0}")]
    DecodeFailed(opencv::Error),
    #[error("Image contains no data")]
    EmptyImage,
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

pub struct CvImage {
    pub mat: Mat,
}

impl CvImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CvUtilsError> {
        let mat = imgcodecs::imdecode(&Vector::from_slice(bytes), imgcodecs::IMREAD_COLOR)
            .map_err(CvUtilsError::DecodeFailed)?;
        if mat.empty() {
            return Err(CvUtilsError::EmptyImage);
        }
        Ok(Self { mat })
    }

    pub fn to_jpg(&self) -> Result<Vec<u8>, CvUtilsError> {
        encode_mat_to_jpg(&self.mat)
    }

    pub fn annotate(
        &mut self,
        detections: &[Detection],
        catalog: &ClassCatalog,
    ) -> Result<&mut Self, CvUtilsError> {
        for detection in detections {
            let x1 = detection.x1 as i32;
            let y1 = detection.y1 as i32;
            let x2 = detection.x2 as i32;
            let y2 = detection.y2 as i32;
            let class_label = catalog
                .name(detection.class_id as usize)
                .unwrap_or("unknown");
            let label = format!("{}: {:.2}", class_label, detection.confidence);

            let color = Scalar::new(0.0, 255.0, 0.0, 0.0);

            imgproc::rectangle(
                &mut self.mat,
                Rect::new(x1, y1, x2 - x1, y2 - y1),
                color,
                2,
                imgproc::LINE_8,
                0,
            )
            .map_err(CvUtilsError::from)?;

            imgproc::put_text(
                &mut self.mat,
                &label,
                Point::new(x1, y1 - 5),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                color,
                1,
                imgproc::LINE_AA,
                false,
            )
            .map_err(CvUtilsError::from)?;
        }
        Ok(self)
    }
}

pub fn encode_mat_to_jpg(mat: &Mat) -> Result<Vec<u8>, CvUtilsError> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".jpg", mat, &mut buf, &Vector::new())
        .map_err(CvUtilsError::EncodeFrameFailed)?;
    Ok(buf.into())
}
