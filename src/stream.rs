use crate::camera::{FrameFeed, FrameSource};
use bytes::Bytes;
use futures::stream;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;

pub const FRAME_BOUNDARY: &str = "frame";

#[derive(Clone)]
pub struct VideoStream {
    camera: Arc<FrameSource>,
    stream_delay_ms: u64,
}

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

impl VideoStream {
    pub fn new(camera: Arc<FrameSource>, stream_delay_ms: u64) -> Self {
        Self {
            camera,
            stream_delay_ms,
        }
    }

    /// Multipart stream of the most recent frames. Ends when the camera has
    /// produced no frame yet; clients reconnect once the device is up.
    pub fn generate_stream(self) -> impl futures::Stream<Item = Result<Bytes, VideoStreamError>> {
        let delay = self.stream_delay_ms;

        stream::unfold(self.camera, move |camera| async move {
            sleep(Duration::from_millis(delay)).await;
            match camera.latest_frame() {
                Some(frame) => {
                    let part_header = format!(
                        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        FRAME_BOUNDARY,
                        frame.jpeg.len()
                    );
                    let mut body = part_header.into_bytes();
                    body.extend_from_slice(&frame.jpeg);
                    body.extend_from_slice(b"\r\n");
                    Some((Ok::<_, VideoStreamError>(Bytes::from(body)), camera))
                }
                None => None,
            }
        })
    }
}
