//! cam: CLI + web server for live CAM trajectory tracking.

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::{mpsc, watch};

use cam_core::config::{self, Config};
use cam_core::decode::Decoder;
use cam_core::frame::LinkLayer;
use cam_core::store::{Retention, TrajectoryStore};
use cam_core::types::{hex_decode, StationId};
use cam_core::view::{speed_label, TrajectoryView};

mod error;
mod ingest;
mod logging;
mod transport;
mod web;

use ingest::Pipeline;
use transport::{ChannelTransport, MqttSettings, MqttTransport};

#[derive(Parser)]
#[command(name = "cam", version, about = "CAM decoder and live trajectory tracker")]
struct Cli {
    /// Config file (default: ~/.cam-tracker/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the broker and serve the live map
    Serve(ServeArgs),

    /// Decode hex frames from a file and print a station table
    Decode {
        /// Path to file containing hex frames or {"raw": ...} envelopes, one per line ("-" for stdin)
        file: PathBuf,

        /// Print every decoded record instead of the summary table
        #[arg(short, long)]
        raw: bool,

        /// Frames carry an Ethernet header instead of 802.11
        #[arg(long)]
        ethernet: bool,
    },

    /// Show the effective configuration, or write it to disk
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// MQTT broker host
    #[arg(long, env = "CAM_BROKER_HOST")]
    broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "CAM_BROKER_PORT")]
    broker_port: Option<u16>,

    /// Topic carrying {"raw": "<hex>"} envelopes
    #[arg(long, env = "CAM_TOPIC")]
    topic: Option<String>,

    /// Dashboard bind address
    #[arg(long, env = "CAM_HTTP_HOST")]
    host: Option<String>,

    /// Dashboard port
    #[arg(long, env = "CAM_HTTP_PORT")]
    port: Option<u16>,

    /// Keep at most this many positions per station
    #[arg(long)]
    max_points: Option<usize>,

    /// Drop positions older than this many seconds behind each station's newest
    #[arg(long)]
    max_age_secs: Option<u64>,

    /// Frames carry an Ethernet header instead of 802.11
    #[arg(long)]
    ethernet: bool,

    /// Skip the broker; accept frames only through POST /api/v1/frames
    #[arg(long, conflicts_with = "stdin")]
    no_broker: bool,

    /// Read envelopes from stdin, one per line, instead of the broker
    #[arg(long)]
    stdin: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    match cli.command {
        Commands::Serve(args) => cmd_serve(config, args).await,
        Commands::Decode { file, raw, ethernet } => cmd_decode(file, raw, link_layer(ethernet)),
        Commands::Config { write } => cmd_config(&config, cli.config, write),
    }
}

fn link_layer(ethernet: bool) -> LinkLayer {
    if ethernet {
        LinkLayer::Ethernet
    } else {
        LinkLayer::Ieee80211
    }
}

fn apply_overrides(mut config: Config, args: &ServeArgs) -> Config {
    if let Some(v) = &args.broker_host {
        config.broker.host = v.clone();
    }
    if let Some(v) = args.broker_port {
        config.broker.port = v;
    }
    if let Some(v) = &args.topic {
        config.broker.topic = v.clone();
    }
    if let Some(v) = &args.host {
        config.dashboard.host = v.clone();
    }
    if let Some(v) = args.port {
        config.dashboard.port = v;
    }
    if args.max_points.is_some() {
        config.store.max_points = args.max_points;
    }
    if args.max_age_secs.is_some() {
        config.store.max_age_secs = args.max_age_secs;
    }
    config
}

/// Resolves once the shutdown flag flips to `true`.
async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn cmd_serve(config: Config, args: ServeArgs) -> ExitCode {
    let config = apply_overrides(config, &args);
    let retention = config.store.retention();
    if retention != Retention::Unbounded {
        tracing::info!(?retention, "trajectory retention enabled");
    }

    let listener = match web::bind(&config.dashboard.host, config.dashboard.port).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(
                host = %config.dashboard.host,
                port = config.dashboard.port,
                "dashboard bind failed: {e}"
            );
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(TrajectoryStore::with_retention(retention));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&store),
        Decoder::new(link_layer(args.ethernet)),
        Duration::from_millis(config.decoder.timeout_ms),
    ));
    let state = Arc::new(web::AppState {
        pipeline: Arc::clone(&pipeline),
        view: TrajectoryView::new(store, config.map.defaults()),
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    {
        let stop_tx = Arc::clone(&stop_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received");
                stop_tx.send_replace(true);
            }
        });
    }

    let mut web_task = tokio::spawn(web::serve(
        state,
        listener,
        shutdown_signal(stop_rx.clone()),
    ));

    let source = if args.no_broker {
        IngestSource::HttpOnly
    } else if args.stdin {
        IngestSource::Stdin
    } else {
        IngestSource::Broker(MqttSettings {
            host: config.broker.host.clone(),
            port: config.broker.port,
            topic: config.broker.topic.clone(),
            client_id: config.broker.client_id.clone(),
        })
    };
    let ingest = run_ingest(source, pipeline, stop_rx);
    tokio::pin!(ingest);

    // whichever side ends first takes the other one down with it
    let (ingest_ok, web_result) = tokio::select! {
        ok = &mut ingest => {
            stop_tx.send_replace(true);
            (ok, (&mut web_task).await)
        }
        result = &mut web_task => {
            tracing::error!("dashboard stopped, shutting down ingest");
            stop_tx.send_replace(true);
            (ingest.await, result)
        }
    };

    let web_ok = match web_result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("dashboard failed: {e}");
            false
        }
        Err(e) => {
            tracing::error!("dashboard task panicked: {e}");
            false
        }
    };

    if ingest_ok && web_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Where `serve` takes its messages from.
enum IngestSource {
    /// HTTP ingest only.
    HttpOnly,
    /// Envelope lines on stdin.
    Stdin,
    Broker(MqttSettings),
}

/// Run the ingest side until it ends or shutdown is requested; `false` on a
/// fatal transport error.
async fn run_ingest(
    source: IngestSource,
    pipeline: Arc<Pipeline>,
    stop_rx: watch::Receiver<bool>,
) -> bool {
    let result = match source {
        IngestSource::HttpOnly => {
            tracing::info!("broker disabled, HTTP ingest only");
            shutdown_signal(stop_rx).await;
            return true;
        }
        IngestSource::Stdin => {
            let mut transport = stdin_transport();
            let result =
                ingest::run(&mut transport, pipeline, shutdown_signal(stop_rx.clone())).await;
            if result.is_ok() && !*stop_rx.borrow() {
                tracing::info!("stdin closed, serving recorded trajectories until ctrl-c");
                shutdown_signal(stop_rx).await;
            }
            result
        }
        IngestSource::Broker(settings) => match MqttTransport::connect(settings).await {
            Ok(mut transport) => {
                ingest::run(&mut transport, pipeline, shutdown_signal(stop_rx)).await
            }
            Err(e) => Err(e),
        },
    };
    if let Err(e) = &result {
        tracing::error!("ingest stopped: {e}");
    }
    result.is_ok()
}

/// Feed stdin lines into an in-process transport.
///
/// A plain thread, not `spawn_blocking`: a read blocked on stdin must not hold
/// up runtime shutdown.
fn stdin_transport() -> ChannelTransport {
    let (tx, transport) = ChannelTransport::channel(64);
    std::thread::spawn(move || forward_lines(io::stdin().lock(), &tx));
    transport
}

fn forward_lines(input: impl BufRead, tx: &mpsc::Sender<Vec<u8>>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if tx.blocking_send(line.as_bytes().to_vec()).is_err() {
            break;
        }
    }
}

/// Per-station summary built from decoded records.
struct StationSummary {
    station_type: u8,
    latitude: f64,
    longitude: f64,
    speed: Option<f64>,
    messages: u32,
}

#[derive(Default)]
struct DecodeSummary {
    stations: BTreeMap<StationId, StationSummary>,
    failures: BTreeMap<&'static str, u64>,
    total_frames: u64,
    decoded_frames: u64,
}

fn cmd_decode(file: PathBuf, raw: bool, link: LinkLayer) -> ExitCode {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        match std::fs::File::open(&file) {
            Ok(f) => Box::new(io::BufReader::new(f)),
            Err(e) => {
                eprintln!("Error opening {}: {e}", file.display());
                return ExitCode::FAILURE;
            }
        }
    };

    let summary = decode_lines(reader, Decoder::new(link), raw);
    if !raw {
        print_summary(&summary);
    }
    ExitCode::SUCCESS
}

/// Decode hex frames or envelopes, one per line. With `raw`, each result is
/// printed as it is decoded.
fn decode_lines(reader: impl BufRead, decoder: Decoder, raw: bool) -> DecodeSummary {
    let mut summary = DecodeSummary::default();

    for line in reader.lines() {
        let Ok(line) = line else { continue };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        summary.total_frames += 1;

        let bytes = if line.starts_with('{') {
            ingest::parse_envelope(line.as_bytes()).ok()
        } else {
            hex_decode(line)
        };
        let Some(bytes) = bytes else {
            *summary.failures.entry("invalid_input").or_default() += 1;
            continue;
        };

        match decoder.decode(&bytes) {
            Ok(rec) => {
                summary.decoded_frames += 1;
                if raw {
                    println!("{rec:?}");
                }
                let entry = summary
                    .stations
                    .entry(rec.station_id)
                    .or_insert(StationSummary {
                        station_type: rec.station_type,
                        latitude: rec.latitude,
                        longitude: rec.longitude,
                        speed: rec.speed,
                        messages: 0,
                    });
                entry.station_type = rec.station_type;
                entry.latitude = rec.latitude;
                entry.longitude = rec.longitude;
                entry.speed = rec.speed;
                entry.messages += 1;
            }
            Err(e) => {
                if raw {
                    println!("error: {e}");
                }
                *summary.failures.entry(e.category()).or_default() += 1;
            }
        }
    }

    summary
}

fn print_summary(summary: &DecodeSummary) {
    println!();
    println!(
        "Frames: {} read, {} decoded, {} stations",
        summary.total_frames,
        summary.decoded_frames,
        summary.stations.len()
    );
    for (category, count) in &summary.failures {
        println!("  {category}: {count}");
    }
    println!();

    if summary.stations.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Station", "Type", "Lat", "Lon", "Speed", "Msgs"]);

    let mut sorted: Vec<_> = summary.stations.iter().collect();
    sorted.sort_by_key(|(_, s)| std::cmp::Reverse(s.messages));

    for (id, s) in sorted {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(s.station_type),
            Cell::new(format!("{:.7}", s.latitude)),
            Cell::new(format!("{:.7}", s.longitude)),
            Cell::new(speed_label(s.speed)),
            Cell::new(s.messages),
        ]);
    }

    println!("{table}");
}

fn cmd_config(config: &Config, path: Option<PathBuf>, write: bool) -> ExitCode {
    if !write {
        println!("{config:#?}");
        return ExitCode::SUCCESS;
    }

    let result = match path {
        Some(path) => config::save_config_to(config, &path).map(|()| path),
        None => config::save_config(config),
    };
    match result {
        Ok(path) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error writing config: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cam_core::types::hex_encode;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "cam",
            "serve",
            "--broker-host",
            "mqtt.lab",
            "--port",
            "8080",
            "--max-points",
            "50",
        ]);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = apply_overrides(Config::default(), &args);
        assert_eq!(config.broker.host, "mqtt.lab");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.dashboard.port, 8080);
        assert_eq!(config.store.retention(), Retention::MaxPoints(50));
    }

    #[test]
    fn test_decode_command_parses() {
        let cli = Cli::parse_from(["cam", "decode", "-", "--raw", "--ethernet"]);
        match cli.command {
            Commands::Decode { file, raw, ethernet } => {
                assert_eq!(file, PathBuf::from("-"));
                assert!(raw);
                assert_eq!(link_layer(ethernet), LinkLayer::Ethernet);
            }
            _ => panic!("expected decode"),
        }
    }

    #[test]
    fn test_decode_lines_summary() {
        use cam_core::encode::CamFrameBuilder;

        let a = hex_encode(&CamFrameBuilder::new(7, 45.05, 7.66).speed(Some(5.0)).build());
        let b = hex_encode(&CamFrameBuilder::new(8, 45.0, 7.6).build());
        let text = format!(
            "# capture\n{a}\n{{\"raw\": \"{b}\"}}\n{a}\nnot-hex\n8800\n"
        );

        let summary = decode_lines(text.as_bytes(), Decoder::default(), false);
        assert_eq!(summary.total_frames, 5);
        assert_eq!(summary.decoded_frames, 3);
        assert_eq!(summary.stations[&7].messages, 2);
        assert_eq!(summary.stations[&7].speed, Some(5.0));
        assert_eq!(summary.stations[&8].messages, 1);
        assert_eq!(summary.failures["invalid_input"], 1);
        assert_eq!(summary.failures["malformed_frame"], 1);
    }

    #[test]
    fn test_config_write_to_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut cfg = Config::default();
        cfg.dashboard.port = 6000;

        let _ = cmd_config(&cfg, Some(path.clone()), true);
        assert_eq!(config::load_config_from(&path).dashboard.port, 6000);
    }

    #[test]
    fn test_stdin_conflicts_with_no_broker() {
        assert!(Cli::try_parse_from(["cam", "serve", "--stdin", "--no-broker"]).is_err());
        let cli = Cli::parse_from(["cam", "serve", "--stdin"]);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.stdin);
    }

    #[test]
    fn test_forward_lines_skips_blank_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines("{\"raw\":\"00\"}\n\n  \n{\"raw\":\"01\"}  \n".as_bytes(), &tx);
        assert_eq!(rx.try_recv().unwrap(), br#"{"raw":"00"}"#.to_vec());
        assert_eq!(rx.try_recv().unwrap(), br#"{"raw":"01"}"#.to_vec());
        assert!(rx.try_recv().is_err());
    }

    fn test_pipeline() -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::new(TrajectoryStore::new()),
            Decoder::default(),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn test_http_only_ingest_ends_on_shutdown() {
        let (_tx, rx) = watch::channel(true);
        assert!(run_ingest(IngestSource::HttpOnly, test_pipeline(), rx).await);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_ingest() {
        let (_tx, rx) = watch::channel(false);
        let source = IngestSource::Broker(MqttSettings {
            host: "127.0.0.1".into(),
            port: 1,
            topic: "cam/packets".into(),
            client_id: "test".into(),
        });
        assert!(!run_ingest(source, test_pipeline(), rx).await);
    }

    #[tokio::test]
    async fn test_shutdown_signal_resolves() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(shutdown_signal(rx));
        tx.send_replace(true);
        waiter.await.unwrap();
    }
}
