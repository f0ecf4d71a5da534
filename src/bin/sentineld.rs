//! sentineld - safety-object detection daemon
//!
//! This daemon:
//! 1. Loads configuration (SENTINEL_CONFIG + SENTINEL_* overrides)
//! 2. Loads the model and labels when configured, else runs synthetic detections
//! 3. Pulls frames from a capture thread and offers them to the orchestrator
//! 4. Logs frame reports and alerts
//! 5. On Ctrl-C drains the in-flight frame, ends the session and prints stats

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use safety_sentinel::{
    load_labels, select_strategy, FrameOutcome, FrameSource, InferenceEngine, ModelArtifact,
    ModelBundle, Orchestrator, PipelineEvent, SentinelConfig, SourceConfig, SyntheticSource,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SentinelConfig::load()?;
    let bundle = match load_bundle(&config) {
        Ok(bundle) => bundle,
        Err(e) => {
            log::warn!("model unavailable: {:#}", e);
            None
        }
    };
    let strategy = select_strategy(engine(), bundle.as_ref(), &config);
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), strategy));

    let events = orchestrator.subscribe();
    let reporter = thread::spawn(move || {
        for event in events {
            if let PipelineEvent::Frame(report) = event {
                log::info!(
                    "frame #{}: {} detections in {} ms (interval {} ms{})",
                    report.sequence,
                    report.results.len(),
                    report.latency_ms,
                    report.interval_ms,
                    if report.synthetic { ", synthetic" } else { "" }
                );
                for result in &report.results {
                    log::debug!(
                        "  {} {} {:.2} [{:.2},{:.2},{:.2},{:.2}]",
                        result.id,
                        result.label,
                        result.confidence,
                        result.bounding_box.left,
                        result.bounding_box.top,
                        result.bounding_box.right,
                        result.bounding_box.bottom
                    );
                }
            }
        }
    });

    let fps = match std::env::var("SENTINEL_SOURCE_FPS") {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|fps| *fps > 0)
            .ok_or_else(|| anyhow!("SENTINEL_SOURCE_FPS must be a positive integer"))?,
        Err(_) => 10,
    };
    let source_config = SourceConfig {
        origin: std::env::var("SENTINEL_SOURCE").unwrap_or_else(|_| "stub://camera".into()),
        target_fps: fps,
        ..SourceConfig::default()
    };
    let period = source_config.frame_period();
    let mut source = SyntheticSource::new(source_config)?;
    source.connect()?;

    orchestrator.start_session();

    let stop = Arc::new(AtomicBool::new(false));
    let capture = {
        let stop = Arc::clone(&stop);
        let orchestrator = Arc::clone(&orchestrator);
        thread::spawn(move || -> Result<()> {
            let mut processed = 0u64;
            while !stop.load(Ordering::SeqCst) {
                let Some(frame) = source.next_frame()? else {
                    break;
                };
                if let FrameOutcome::Processed(_) = orchestrator.process_frame(&frame) {
                    processed += 1;
                }
                thread::sleep(period);
            }
            let stats = source.stats();
            log::info!(
                "capture stopped: {} frames captured from {}, {} processed",
                stats.frames_captured,
                stats.origin,
                processed
            );
            Ok(())
        })
    };

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("sentineld running, waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, draining in-flight frame...");
    stop.store(true, Ordering::SeqCst);

    let record = orchestrator.end_session();
    capture
        .join()
        .map_err(|_| anyhow!("capture thread panicked"))??;

    let stats = orchestrator.current_stats();
    let metrics = orchestrator.performance_metrics();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    if let Some(record) = record {
        log::info!(
            "session lasted {} ms over {} frames; {} frames skipped",
            record.duration_ms,
            record.frames,
            orchestrator.skipped_frames()
        );
    }

    drop(orchestrator);
    let _ = reporter.join();
    Ok(())
}

fn load_bundle(config: &SentinelConfig) -> Result<Option<ModelBundle>> {
    let Some(model_path) = &config.engine.model_path else {
        return Ok(None);
    };
    let artifact = ModelArtifact::from_path(
        model_path,
        config.detection.input_shape(),
        config.detection.output_shape(),
    )?;
    let labels = match &config.engine.labels_path {
        Some(path) => load_labels(path)?,
        None => Vec::new(),
    };
    Ok(Some(ModelBundle { artifact, labels }))
}

#[cfg(feature = "backend-tract")]
fn engine() -> Option<Box<dyn InferenceEngine>> {
    Some(Box::new(safety_sentinel::TractEngine::new()))
}

#[cfg(not(feature = "backend-tract"))]
fn engine() -> Option<Box<dyn InferenceEngine>> {
    log::info!("built without backend-tract; no inference engine available");
    None
}
