//! cam-feeder: replays captured CAM frames onto the broker topic.
//!
//! Supports:
//! - Replaying a classic pcap or a hex-lines file, CAM-sized frames only,
//!   each distinct frame once, at a fixed pace
//! - Generating synthetic traffic around the map centre

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cam_core::config;
use cam_core::frame::LinkLayer;

mod capture;
mod publish;
mod synth;

use publish::{BrokerSettings, MqttPublisher, Publisher};

#[derive(Parser)]
#[command(
    name = "cam-feeder",
    version,
    about = "CAM capture replay and synthetic traffic"
)]
struct Cli {
    #[command(flatten)]
    broker: BrokerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BrokerArgs {
    /// MQTT broker host
    #[arg(long, global = true, env = "CAM_BROKER_HOST")]
    broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long, global = true, env = "CAM_BROKER_PORT")]
    broker_port: Option<u16>,

    /// Topic to publish envelopes on
    #[arg(long, global = true, env = "CAM_TOPIC")]
    topic: Option<String>,

    /// Print envelopes instead of publishing
    #[arg(long, global = true)]
    dry_run: bool,

    /// Delay between messages
    #[arg(long, global = true, default_value = "500")]
    interval_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay frames from a pcap or hex-lines file
    Replay {
        /// Path to .pcap or text file with one hex frame per line
        file: PathBuf,

        /// Expected GeoNetworking payload length of a CAM frame
        #[arg(long, default_value = "89")]
        payload_len: usize,

        /// Publish frames of any payload length
        #[arg(long, conflicts_with = "payload_len")]
        any_length: bool,

        /// Hex lines carry Ethernet frames (pcap files declare their own link type)
        #[arg(long)]
        ethernet: bool,
    },

    /// Publish synthetic CAMs for stations circling the map centre
    Synth {
        /// Number of stations
        #[arg(long, default_value = "3")]
        stations: u32,

        /// Messages per station; 0 runs until Ctrl-C
        #[arg(long, default_value = "0")]
        count: u64,

        /// Circle radius in metres
        #[arg(long, default_value = "20")]
        radius_m: f64,

        /// Messages per lap
        #[arg(long, default_value = "40")]
        steps_per_lap: u32,
    },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let config = config::load_config();

    let publisher = if cli.broker.dry_run {
        Publisher::DryRun
    } else {
        let settings = BrokerSettings {
            host: cli.broker.broker_host.unwrap_or(config.broker.host),
            port: cli.broker.broker_port.unwrap_or(config.broker.port),
            topic: cli.broker.topic.unwrap_or(config.broker.topic),
            client_id: "cam-feeder".into(),
        };
        tracing::info!(host = %settings.host, port = settings.port, topic = %settings.topic, "publishing");
        Publisher::Mqtt(MqttPublisher::connect(settings))
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, stopping");
            stop_tx.send_replace(true);
        }
    });

    let interval = Duration::from_millis(cli.broker.interval_ms);
    let result = match cli.command {
        Commands::Replay {
            file,
            payload_len,
            any_length,
            ethernet,
        } => {
            let link = if ethernet {
                LinkLayer::Ethernet
            } else {
                LinkLayer::Ieee80211
            };
            let payload_len = (!any_length).then_some(payload_len);
            cmd_replay(file, link, payload_len, interval, publisher, stop_rx).await
        }
        Commands::Synth {
            stations,
            count,
            radius_m,
            steps_per_lap,
        } => {
            let params = synth::SynthParams {
                stations,
                center: config.map.defaults().center,
                radius_m,
                steps_per_lap,
                interval_ms: cli.broker.interval_ms,
            };
            cmd_synth(params, count, interval, publisher, stop_rx).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum FeederError {
    #[error(transparent)]
    Capture(#[from] capture::CaptureError),
    #[error(transparent)]
    Publish(#[from] publish::PublishError),
}

/// Sleep for `interval`; `false` if shutdown was requested meanwhile.
async fn pace(interval: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        Ok(_) = stop.wait_for(|s| *s) => false,
    }
}

async fn cmd_replay(
    file: PathBuf,
    link: LinkLayer,
    payload_len: Option<usize>,
    interval: Duration,
    mut publisher: Publisher,
    mut stop: watch::Receiver<bool>,
) -> Result<(), FeederError> {
    let capture = capture::read_capture(&file, link)?;
    let selection = capture::select_cam_frames(&capture, payload_len);
    tracing::info!(
        file = %file.display(),
        read = capture.frames.len(),
        selected = selection.frames.len(),
        wrong_length = selection.wrong_length,
        duplicates = selection.duplicates,
        unparseable = selection.unparseable,
        "capture loaded"
    );

    let mut sent = 0usize;
    for frame in &selection.frames {
        publisher.publish(frame).await?;
        sent += 1;
        tracing::debug!(raw_len = frame.len(), "frame published");
        if !pace(interval, &mut stop).await {
            break;
        }
    }

    publisher.close().await?;
    tracing::info!(sent, "replay finished");
    Ok(())
}

async fn cmd_synth(
    params: synth::SynthParams,
    count: u64,
    interval: Duration,
    mut publisher: Publisher,
    mut stop: watch::Receiver<bool>,
) -> Result<(), FeederError> {
    tracing::info!(stations = params.stations, "generating synthetic traffic");

    let mut step = 0u64;
    while count == 0 || step < count {
        for frame in synth::synth_step(&params, step) {
            publisher.publish(&frame).await?;
        }
        step += 1;
        if !pace(interval, &mut stop).await {
            break;
        }
    }

    publisher.close().await?;
    tracing::info!(steps = step, "synthetic traffic stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_args() {
        let cli = Cli::parse_from(["cam-feeder", "replay", "cap.pcap", "--dry-run", "--interval-ms", "0"]);
        assert!(cli.broker.dry_run);
        assert_eq!(cli.broker.interval_ms, 0);
        match cli.command {
            Commands::Replay {
                payload_len,
                any_length,
                ..
            } => {
                assert_eq!(payload_len, 89);
                assert!(!any_length);
            }
            _ => panic!("expected replay"),
        }
    }

    #[tokio::test]
    async fn test_pace_stops_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(pace(Duration::ZERO, &mut rx).await);
        tx.send_replace(true);
        assert!(!pace(Duration::from_secs(60), &mut rx).await);
    }

    #[tokio::test]
    async fn test_replay_dry_run() {
        let frame = cam_core::encode::CamFrameBuilder::new(5, 45.0, 7.6).build();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.txt");
        std::fs::write(&path, cam_core::types::hex_encode(&frame)).unwrap();

        let (_tx, rx) = watch::channel(false);
        cmd_replay(
            path,
            LinkLayer::Ieee80211,
            None,
            Duration::ZERO,
            Publisher::DryRun,
            rx,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_synth_dry_run_bounded() {
        let params = synth::SynthParams {
            stations: 2,
            center: [45.0, 7.6],
            radius_m: 10.0,
            steps_per_lap: 8,
            interval_ms: 0,
        };
        let (_tx, rx) = watch::channel(false);
        cmd_synth(params, 3, Duration::ZERO, Publisher::DryRun, rx)
            .await
            .unwrap();
    }
}
