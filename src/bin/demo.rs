//! demo - end-to-end run of the model-backed pipeline against a replay engine

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use safety_sentinel::detect::{InferenceError, Stage};
use safety_sentinel::{
    select_strategy, FixedMemoryProbe, Frame, FrameOutcome, ManualClock, ModelArtifact,
    ModelBundle, Orchestrator, PipelineEvent, ReplayEngine, SentinelConfig, Tensor,
};

/// Class ids the bundled default model maps to safety objects.
const MAPPED_CLASS_IDS: &[usize] = &[39, 0, 84, 73, 47, 25, 67];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frames to offer to the pipeline.
    #[arg(long, default_value_t = 20)]
    frames: u32,
    /// Run in enhanced mode (tighter thresholds, multi-scale ensemble).
    #[arg(long)]
    enhanced: bool,
    /// Seed for the scripted model outputs.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Script a resource-exhaustion failure every N inferences (0 = never).
    #[arg(long, default_value_t = 0)]
    exhaust_every: u32,
    /// Extra latency per frame in milliseconds.
    #[arg(long, default_value_t = 30)]
    latency_ms: u64,
    /// Print the event stream as JSON lines.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.frames == 0 {
        return Err(anyhow!("frames must be >= 1"));
    }

    let mut config = SentinelConfig::default();
    config.session.enhanced_mode = args.enhanced;
    config.validate()?;

    stage("script replay engine");
    let shape = config.detection.output_shape();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let outputs = (0..8)
        .map(|_| scripted_output(&mut rng, &shape))
        .collect::<Result<Vec<_>, _>>()?;
    let mut engine = ReplayEngine::new(Vec::new());
    for step in 0..(args.frames as usize * 3) {
        let exhausted = args.exhaust_every > 0 && (step + 1) % args.exhaust_every as usize == 0;
        if exhausted {
            engine.push_error(InferenceError::resource_exhausted(
                Stage::Inference,
                "scripted allocation failure",
            ));
        } else {
            engine.push_output(outputs[step % outputs.len()].clone());
        }
    }

    stage("load model into engine");
    let artifact = ModelArtifact::new(
        format!("demo-model:{}", args.seed).into_bytes(),
        config.detection.input_shape(),
        shape,
    )?;
    let bundle = ModelBundle {
        artifact,
        labels: Vec::new(),
    };
    let strategy = select_strategy(Some(Box::new(engine)), Some(&bundle), &config);

    let clock = ManualClock::new(0);
    let orchestrator = Orchestrator::new(config, strategy)
        .with_clock(Arc::new(clock.clone()))
        .with_memory_probe(Arc::new(FixedMemoryProbe::new(0)));
    let events = orchestrator.subscribe();

    stage("run session");
    orchestrator.start_session();
    let frame = Frame::filled(320, 240, [96, 110, 120]);
    let (mut processed, mut rejected, mut aborted) = (0u32, 0u32, 0u32);
    for _ in 0..args.frames {
        match orchestrator.process_frame(&frame) {
            FrameOutcome::Processed(_) => processed += 1,
            FrameOutcome::Rejected(_) => rejected += 1,
            FrameOutcome::Aborted { .. } => aborted += 1,
        }
        // a second frame right behind the first is always shed
        if let FrameOutcome::Rejected(_) = orchestrator.process_frame(&frame) {
            rejected += 1;
        }
        clock.advance(orchestrator.current_interval_ms() + args.latency_ms);
    }
    let record = orchestrator.end_session();

    stage("results");
    for event in events.try_iter() {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match event {
            PipelineEvent::Frame(report) => {
                println!(
                    "frame #{:>3}  interval={:>4} ms  detections={}",
                    report.sequence,
                    report.interval_ms,
                    report.results.len()
                );
                for r in &report.results {
                    println!(
                        "    {:<24} {:<20} {:>5.1}%  [{:.2}, {:.2}, {:.2}, {:.2}]",
                        r.id,
                        r.label,
                        r.confidence * 100.0,
                        r.bounding_box.left,
                        r.bounding_box.top,
                        r.bounding_box.right,
                        r.bounding_box.bottom
                    );
                }
            }
            PipelineEvent::Alert(alert) => {
                println!("alert [{}] {}", alert.severity, alert.message);
            }
        }
    }

    println!();
    println!("processed={} rejected={} aborted={}", processed, rejected, aborted);
    println!("safety percentage: {}%", orchestrator.safety_percentage());
    println!("overall accuracy: {:.1}%", orchestrator.overall_accuracy());
    println!(
        "missing critical: {:?}",
        orchestrator
            .missing_critical_items()
            .iter()
            .map(|c| c.display_name())
            .collect::<Vec<_>>()
    );
    if record.is_none() {
        log::warn!("session was not running at shutdown");
    }
    for (i, past) in orchestrator.history().iter().enumerate() {
        println!(
            "history[{}]: {} ms, {} frames, {} final detections, classes {:?}",
            i,
            past.duration_ms,
            past.frames,
            past.detections.len(),
            past.unique_classes
                .iter()
                .map(|c| c.display_name())
                .collect::<Vec<_>>()
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&orchestrator.performance_metrics())?
    );
    Ok(())
}

/// Output tensor with a few detections of mapped classes, one unmapped
/// candidate, and one slot below the objectness floor.
fn scripted_output(rng: &mut StdRng, shape: &[usize]) -> Result<Tensor, InferenceError> {
    let stride = shape.last().copied().unwrap_or(5);
    let slots: usize = shape[..shape.len() - 1].iter().product();
    let mut data = vec![0.0f32; slots * stride];
    let mut put = |slot: usize, geometry: [f32; 4], objectness: f32, class: usize, score: f32| {
        if slot >= slots || 5 + class >= stride {
            return;
        }
        let row = &mut data[slot * stride..(slot + 1) * stride];
        row[..4].copy_from_slice(&geometry);
        row[4] = objectness;
        row[5 + class] = score;
    };

    let count = rng.gen_range(2..5);
    for slot in 0..count {
        let class = MAPPED_CLASS_IDS[rng.gen_range(0..MAPPED_CLASS_IDS.len())];
        let geometry = [
            rng.gen_range(0.15..0.85),
            rng.gen_range(0.15..0.85),
            rng.gen_range(0.1..0.3),
            rng.gen_range(0.1..0.3),
        ];
        put(slot, geometry, rng.gen_range(0.8..0.99), class, rng.gen_range(0.75..0.99));
    }
    put(count, [0.5, 0.5, 0.2, 0.2], 0.95, 12, 0.95);
    put(count + 1, [0.3, 0.3, 0.2, 0.2], 0.1, 39, 0.99);
    Tensor::new(shape.to_vec(), data)
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}
