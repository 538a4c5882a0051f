use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, bounded, never, select, Receiver};
use log::info;

use tanktwin::alerts::{AlertProcessor, CountingSink, JsonLinesSink, RecordSink};
use tanktwin::config::TwinConfig;
use tanktwin::tags::MemoryTagStore;
use tanktwin::telemetry::{ChannelPublisher, Message};
use tanktwin::twin::{CancellationSource, CancellationToken, Orchestrator};

#[derive(Parser, Debug)]
#[command(
    name = "tanktwin",
    version,
    about = "Real-time digital twin of three-tank cascade plants"
)]
struct Args {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for a blank line on stdin
    #[arg(long)]
    duration: Option<f64>,

    /// Seed for the reference randomizer
    #[arg(long)]
    seed: Option<u64>,

    /// Keep the initial references fixed
    #[arg(long)]
    no_randomizer: bool,

    /// Publish levels and run the alert consumer
    #[arg(long)]
    telemetry: bool,

    /// Append level records to this file as JSON lines
    #[arg(long)]
    records: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,
}

/// Fires once stdin reaches EOF or a blank line is entered
fn stdin_stop() -> Receiver<()> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if !line.trim().is_empty() => continue,
                _ => break,
            }
        }
        let _ = tx.send(());
    });
    rx
}

fn spawn_consumer<S>(
    processor: AlertProcessor<S>,
    rx: Receiver<Message>,
    token: CancellationToken,
) -> Result<JoinHandle<(u64, u64)>>
where
    S: RecordSink + 'static,
{
    let mut processor = processor;
    thread::Builder::new()
        .name("alerts".to_string())
        .spawn(move || {
            processor.consume(&rx, &token);
            processor.counts()
        })
        .context("failed to start alert consumer")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TwinConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TwinConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.reference.seed = Some(seed);
    }
    if args.no_randomizer {
        config.reference.randomize = false;
    }
    if args.telemetry || args.records.is_some() {
        config.telemetry.enabled = true;
    }

    if args.dump_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let store = Arc::new(MemoryTagStore::with_points(
        config.store.endpoint.clone(),
        config.op_timeout(),
        config.all_tags(),
    ));

    let mut orchestrator = Orchestrator::new(config.clone())?;
    let consumer_source = CancellationSource::new();
    let mut consumer = None;

    if config.telemetry.enabled {
        let (publisher, rx) = ChannelPublisher::channel();
        orchestrator = orchestrator.with_publisher(Arc::new(publisher));

        let band = config.telemetry.alarm;
        let prefix = config.telemetry.alert_topic_prefix.clone();
        let token = consumer_source.token();
        consumer = Some(match &args.records {
            Some(path) => {
                let sink = JsonLinesSink::create(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                spawn_consumer(AlertProcessor::new(band, sink, prefix), rx, token)?
            }
            None => spawn_consumer(AlertProcessor::new(band, CountingSink::default(), prefix), rx, token)?,
        });
    }

    let twin = orchestrator.start(store)?;

    // With a fixed duration stdin is ignored, so closed stdin does not end the run
    let (timeout, stop) = match args.duration {
        Some(seconds) => (after(Duration::from_secs_f64(seconds.max(0.0))), never()),
        None => {
            info!("Running; press Enter on an empty line to stop");
            (never(), stdin_stop())
        }
    };
    select! {
        recv(timeout) -> _ => info!("Run duration elapsed"),
        recv(stop) -> _ => info!("Stop requested"),
    }

    for plant in 0..twin.plant_count() {
        if let Some(snapshot) = twin.snapshot(plant) {
            let h = tanktwin::plant::levels(&snapshot.state);
            info!(
                "plant {}: levels [{:.3}, {:.3}, {:.3}] reference [{:.3}, {:.3}, {:.3}]",
                plant + 1,
                h[0],
                h[1],
                h[2],
                snapshot.reference[0],
                snapshot.reference[1],
                snapshot.reference[2]
            );
        }
    }

    let report = twin.shutdown();
    println!("{report}");

    // The bridge held the only publisher, so the consumer drains and exits
    if let Some(handle) = consumer {
        match handle.join() {
            Ok((processed, failed)) => {
                println!("alert consumer: {processed} messages processed, {failed} failed")
            }
            Err(_) => anyhow::bail!("alert consumer panicked"),
        }
    }

    if report.any_panicked() {
        anyhow::bail!("one or more tasks panicked");
    }
    Ok(())
}
