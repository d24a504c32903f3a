use crate::config::SerialConfig;
use crate::orchestrator::CaptureOrchestrator;
use crate::planner::CommandCode;
use crate::telemetry::Metrics;
use std::io::ErrorKind;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tokio_serial::SerialPortBuilderExt;

/// Inbound serial token that starts an automatic capture cycle.
pub const TRIGGER_TOKEN: &str = "yell";

/// Any async byte stream can stand in for the serial port, which lets tests
/// drive the link through `tokio::io::duplex`.
pub trait SerialIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialIO for T {}

pub type DynSerial = Box<dyn SerialIO>;

/// Owns the serial channel to the signal controller. A supervised background
/// task holds the read half and listens for trigger tokens; the write half
/// sits behind a mutex so the trigger auto-reply and explicit `send` calls
/// never interleave partial writes.
pub struct TriggerLink {
    config: SerialConfig,
    writer: Mutex<Option<WriteHalf<DynSerial>>>,
    connected: AtomicBool,
    metrics: Arc<Metrics>,
}

impl TriggerLink {
    pub fn new(config: SerialConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Writes one newline-terminated command token. Returns false instead of
    /// erroring while the link is down.
    pub async fn send(&self, command: CommandCode) -> bool {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            tracing::debug!("Serial send of {} skipped, link disconnected", command);
            return false;
        };

        let line = format!("{}\n", command);
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Serial write of {} failed: {}", command, e);
                false
            }
        }
    }

    pub fn start(
        self: &Arc<Self>,
        orchestrator: Arc<CaptureOrchestrator>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let link = self.clone();
        tokio::spawn(async move { link.run(orchestrator, shutdown_rx).await })
    }

    async fn run(
        &self,
        orchestrator: Arc<CaptureOrchestrator>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let Some(port_path) = self.config.port.clone() else {
            tracing::info!("No serial port configured, trigger link disabled");
            return;
        };

        loop {
            match open_serial(&port_path, self.config.baud_rate).await {
                Ok(stream) => {
                    let reader = self.attach(Box::new(stream)).await;
                    tracing::info!("Serial port {} open, listening for triggers", port_path);
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            self.detach().await;
                            tracing::info!("Trigger link stopped");
                            return;
                        }
                        _ = self.listen(reader, &orchestrator) => {
                            self.detach().await;
                            tracing::warn!("Serial channel {} closed, reconnecting", port_path);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to open serial port {}: {}", port_path, e);
                }
            }

            let jitter = rand::random::<f32>() * 0.2 + 0.9;
            let delay = Duration::from_millis(self.config.reconnect_delay_ms).mul_f32(jitter);
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Trigger link stopped");
                    return;
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn attach(&self, stream: DynSerial) -> BufReader<ReadHalf<DynSerial>> {
        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);
        BufReader::new(read_half)
    }

    async fn detach(&self) {
        *self.writer.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Reads inbound lines until the channel closes. Transient read errors
    /// keep the loop alive; EOF or a hard I/O error returns to the caller,
    /// which tears the connection down and schedules a reconnect.
    async fn listen<R: AsyncBufRead + Unpin>(
        &self,
        mut reader: R,
        orchestrator: &Arc<CaptureOrchestrator>,
    ) {
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => return,
                Ok(_) => self.handle_line(line.trim(), orchestrator).await,
                Err(e) => match e.kind() {
                    ErrorKind::Interrupted
                    | ErrorKind::TimedOut
                    | ErrorKind::WouldBlock
                    | ErrorKind::InvalidData => {
                        tracing::debug!("Transient serial read error: {}", e);
                    }
                    _ => {
                        tracing::warn!("Serial read failed: {}", e);
                        return;
                    }
                },
            }
        }
    }

    async fn handle_line(&self, line: &str, orchestrator: &CaptureOrchestrator) {
        if !line.eq_ignore_ascii_case(TRIGGER_TOKEN) {
            if !line.is_empty() {
                tracing::debug!("Ignoring serial input {:?}", line);
            }
            return;
        }

        tracing::info!("Trigger token received, starting capture");
        self.metrics.record_trigger();

        let command = match orchestrator.capture_with_defaults().await {
            Ok(result) => result.plan.command,
            Err(e) => {
                tracing::warn!("Triggered capture failed: {}, answering {}", e, CommandCode::M0);
                CommandCode::M0
            }
        };

        if !self.send(command).await {
            tracing::warn!("Failed to answer trigger with {}", command);
        }
    }
}

async fn open_serial(port_path: &str, baud_rate: u32) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;

    let port_path = port_path.to_string();
    tokio::task::spawn_blocking(move || {
        tokio_serial::new(&port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!("Failed to open serial port {}", port_path))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}
