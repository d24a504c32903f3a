use crate::config::CameraConfig;
use crate::cv_utils::{self, CvUtilsError};
use opencv::{core::Mat, prelude::*, videoio};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::{sync::broadcast, task::JoinHandle, time::sleep};

/// One captured camera image, already JPEG-encoded. Cloning copies the pixel
/// buffer, so readers never alias the acquisition loop's storage.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: u64,
}

/// Read-side view of the camera used by the orchestrator and the HTTP layer.
pub trait FrameFeed: Send + Sync + 'static {
    fn is_open(&self) -> bool;
    fn latest_frame(&self) -> Option<Frame>;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CameraStatus {
    pub ok: bool,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Disconnected,
    Connecting,
    Open,
    Degraded(u32),
}

struct FrameStats {
    width: u32,
    height: u32,
    fps: f64,
    window_frames: u32,
    window_start: Instant,
}

const FPS_WINDOW: Duration = Duration::from_secs(2);

impl FrameStats {
    fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            fps: 0.0,
            window_frames: 0,
            window_start: Instant::now(),
        }
    }

    fn note(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.window_frames += 1;

        let elapsed = self.window_start.elapsed();
        if elapsed >= FPS_WINDOW {
            self.fps = self.window_frames as f64 / elapsed.as_secs_f64();
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Owns the camera device through a background acquisition loop. The device
/// handle lives inside the loop task; everything shared is the latest-frame
/// slot, the connection state and the rolling statistics.
pub struct FrameSource {
    config: CameraConfig,
    latest: RwLock<Option<Frame>>,
    state: Mutex<DeviceState>,
    stats: Mutex<FrameStats>,
}

impl FrameSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            latest: RwLock::new(None),
            state: Mutex::new(DeviceState::Disconnected),
            stats: Mutex::new(FrameStats::new()),
        }
    }

    pub fn start(self: &Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move { source.run(shutdown_rx).await })
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut capture: Option<videoio::VideoCapture> = None;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Camera acquisition received shutdown signal");
                    break;
                }
                _ = self.step(&mut capture) => {}
            }
        }

        if let Some(mut cap) = capture.take() {
            if let Err(e) = cap.release() {
                tracing::warn!("Failed to release camera device: {}", e);
            }
        }
        self.set_state(DeviceState::Disconnected);
        tracing::info!("Camera acquisition stopped");
    }

    async fn step(&self, capture: &mut Option<videoio::VideoCapture>) {
        if capture.is_none() {
            self.set_state(DeviceState::Connecting);
            match self.open_device() {
                Ok(cap) => {
                    tracing::info!("Camera {} opened", self.config.index);
                    self.set_state(DeviceState::Open);
                    *capture = Some(cap);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to open camera {}: {}, retrying in {}ms",
                        self.config.index,
                        e,
                        self.config.reconnect_delay_ms
                    );
                    self.set_state(DeviceState::Disconnected);
                    sleep(Duration::from_millis(self.config.reconnect_delay_ms)).await;
                    return;
                }
            }
        }

        let Some(cap) = capture.as_mut() else { return };

        match self.grab(cap) {
            Ok(()) => {}
            Err(e) => {
                tracing::debug!("Frame grab failed: {}", e);
                let missed = self.note_miss();
                if missed >= self.config.missed_frame_threshold {
                    tracing::warn!(
                        "Missed {} consecutive frames, forcing device reopen",
                        missed
                    );
                    if let Some(mut cap) = capture.take() {
                        let _ = cap.release();
                    }
                    self.set_state(DeviceState::Disconnected);
                }
            }
        }

        sleep(Duration::from_millis(self.config.get_poll_delay_ms())).await;
    }

    fn open_device(&self) -> Result<videoio::VideoCapture, opencv::Error> {
        let mut cap = videoio::VideoCapture::new(self.config.index, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(opencv::Error::new(
                opencv::core::StsError,
                format!("camera {} did not open", self.config.index),
            ));
        }
        // keep the driver queue shallow so reads stay close to live
        if let Err(e) = cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0) {
            tracing::debug!("Camera does not support buffer size control: {}", e);
        }
        Ok(cap)
    }

    fn grab(&self, cap: &mut videoio::VideoCapture) -> Result<(), CvUtilsError> {
        let mut mat = Mat::default();
        if !cap.read(&mut mat)? || mat.empty() {
            return Err(CvUtilsError::EmptyImage);
        }

        let width = mat.cols().max(0) as u32;
        let height = mat.rows().max(0) as u32;
        let jpeg = cv_utils::encode_mat_to_jpg(&mat)?;

        self.store_frame(Frame {
            jpeg,
            width,
            height,
            captured_at_ms: now_ms(),
        });
        Ok(())
    }

    pub(crate) fn store_frame(&self, frame: Frame) {
        self.stats.lock().note(frame.width, frame.height);
        *self.latest.write() = Some(frame);
        self.set_state(DeviceState::Open);
    }

    fn note_miss(&self) -> u32 {
        let mut state = self.state.lock();
        let missed = match *state {
            DeviceState::Degraded(n) => n.saturating_add(1),
            _ => 1,
        };
        *state = DeviceState::Degraded(missed);
        missed
    }

    fn set_state(&self, next: DeviceState) {
        *self.state.lock() = next;
    }

    pub fn status(&self) -> CameraStatus {
        let stats = self.stats.lock();
        CameraStatus {
            ok: self.is_open(),
            width: stats.width,
            height: stats.height,
            fps: stats.fps,
        }
    }
}

impl FrameFeed for FrameSource {
    fn is_open(&self) -> bool {
        matches!(
            *self.state.lock(),
            DeviceState::Open | DeviceState::Degraded(_)
        )
    }

    fn latest_frame(&self) -> Option<Frame> {
        self.latest.read().clone()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
