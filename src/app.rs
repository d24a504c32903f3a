use crate::camera::{FrameFeed, FrameSource};
use crate::config::Config;
use crate::detector::Detector;
use crate::labels::ClassCatalog;
use crate::orchestrator::CaptureOrchestrator;
use crate::results::ResultStore;
use crate::serial_link::TriggerLink;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;
use crate::yolo::OrtDetector;

use std::{error::Error, sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast, task::JoinHandle};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let metrics = Arc::new(Metrics::new());
    let catalog = Arc::new(ClassCatalog::load(config.detector.labels_path.as_deref()));

    let detector: Arc<dyn Detector> = match OrtDetector::new(&config.detector) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize detector: {:?}", e);
            return Err(e);
        }
    };

    let camera = Arc::new(FrameSource::new(config.camera.clone()));
    let frames: Arc<dyn FrameFeed> = camera.clone();
    let store = Arc::new(ResultStore::new(&config.results));
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        frames,
        detector,
        catalog,
        store.clone(),
        config.media.clone(),
        &config.detector,
        metrics.clone(),
    ));
    let link = Arc::new(TriggerLink::new(config.serial.clone(), metrics.clone()));

    let (shutdown_tx, _) = broadcast::channel(1);

    let camera_handle = camera.start(shutdown_tx.subscribe());
    let link_handle = link.start(orchestrator.clone(), shutdown_tx.subscribe());
    let sampler_handle = spawn_fps_sampler(
        camera.clone(),
        metrics.clone(),
        shutdown_tx.subscribe(),
    );

    let state = SharedState {
        camera,
        orchestrator,
        store,
        link,
        stream_delay_ms: config.camera.get_stream_delay_ms(),
        metrics,
    };
    let server = HttpServer::new(state, &config.server).await?;
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
    let _ = tokio::join!(camera_handle, link_handle, sampler_handle);

    Ok(())
}

fn spawn_fps_sampler(
    camera: Arc<FrameSource>,
    metrics: Arc<Metrics>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    metrics.record_camera_fps(camera.status().fps);
                }
            }
        }
    })
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
