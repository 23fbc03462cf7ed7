use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::Value;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docket::common::SystemClock;
use docket::config::{parse_peers, Config};
use docket::network::http_api::run_http_api;
use docket::{ClusterNode, HttpTransport, MemoryStore};

/// Plain-text log sink that starts a new file once `limit` bytes are
/// written. Older generations are kept as `<base>.1` (newest) up to
/// `<base>.<keep>`.
struct RotatingLog {
    base: PathBuf,
    limit: u64,
    keep: u32,
    file: File,
    written: u64,
}

impl RotatingLog {
    fn open(base: impl Into<PathBuf>, limit: u64, keep: u32) -> io::Result<Self> {
        let base = base.into();
        let file = OpenOptions::new().create(true).append(true).open(&base)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            base,
            limit,
            keep: keep.max(1),
            file,
            written,
        })
    }

    fn generation(&self, n: u32) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        // The oldest generation falls off the end.
        for n in (1..self.keep).rev() {
            let from = self.generation(n);
            if from.exists() {
                std::fs::rename(&from, self.generation(n + 1))?;
            }
        }
        std::fs::rename(&self.base, self.generation(1))?;
        self.file = File::create(&self.base)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

struct LogSettings {
    file: Option<PathBuf>,
    max_size_bytes: u64,
    max_files: u32,
}

impl LogSettings {
    fn from_env() -> Self {
        let max_size_mb = std::env::var("DOCKET_LOG_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);
        Self {
            file: std::env::var_os("DOCKET_LOG_FILE").map(PathBuf::from),
            max_size_bytes: max_size_mb * 1024 * 1024,
            max_files: std::env::var("DOCKET_LOG_MAX_FILES")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(3),
        }
    }
}

/// Route `log` records into `tracing`, print them to stderr and, when a log
/// file is configured, also append them to a rotated plain-text file.
/// Safe to call more than once; later calls leave the first setup in place.
fn init_logging(settings: &LogSettings) {
    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let mut open_error = None;
    let file_layer = settings.file.as_deref().and_then(|path| {
        match RotatingLog::open(path, settings.max_size_bytes, settings.max_files) {
            Ok(sink) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .with_writer(Mutex::new(sink)),
            ),
            Err(e) => {
                open_error = Some((path.to_path_buf(), e));
                None
            }
        }
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if let Some((path, e)) = open_error {
        warn!("Logging to stderr only, cannot open {}: {}", path.display(), e);
    } else if !installed {
        warn!("Logging already initialized, keeping the existing setup");
    }
}

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Leader election, clock sync and write replication for a fixed set of nodes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one cluster node
    Node {
        /// JSON config file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Unique positive id for this node
        #[arg(short, long)]
        id: Option<u64>,

        /// Address to listen on, e.g. 127.0.0.1:4001
        #[arg(short, long)]
        address: Option<String>,

        /// Comma-separated peers (id=host:port)
        #[arg(short, long)]
        peers: Option<String>,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Query or poke a running node
    Admin {
        #[command(subcommand)]
        cmd: AdminCmd,
    },
}

#[derive(Subcommand)]
enum AdminCmd {
    /// Print the cluster status table as seen by the node
    Status {
        /// Node HTTP address, e.g. 127.0.0.1:4001
        #[arg(long)]
        http: String,
    },
    /// Print the node's health record
    Health {
        #[arg(long)]
        http: String,
    },
    /// Start an election on the node and print the outcome
    Elect {
        #[arg(long)]
        http: String,
    },
    /// Dump Prometheus metrics
    Metrics {
        #[arg(long)]
        http: String,
    },
}

fn node_config(
    config: Option<PathBuf>,
    id: Option<u64>,
    address: Option<String>,
    peers: Option<String>,
    name: Option<String>,
) -> anyhow::Result<Config> {
    let mut cfg = match config {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(id) = id {
        cfg.node_id = id;
    }
    if let Some(address) = address {
        cfg.address = address;
    }
    if let Some(peers) = peers {
        cfg.peers = parse_peers(&peers)?;
    }
    if name.is_some() {
        cfg.name = name;
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn run_node(cfg: Config) -> anyhow::Result<()> {
    let bind_addr = tokio::net::lookup_host(&cfg.address)
        .await
        .with_context(|| format!("resolving {}", cfg.address))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {}", cfg.address))?;

    let directory = cfg.directory();
    let store = Arc::new(MemoryStore::new(
        directory.all_peers().iter().map(|n| n.id),
    ));
    let node = Arc::new(ClusterNode::new(
        &cfg,
        Arc::new(HttpTransport::new()),
        store.clone(),
        store,
        Arc::new(SystemClock),
    ));

    info!(
        "Starting docket node {} at {} with {} peers",
        cfg.node_id,
        cfg.address,
        cfg.peers.len()
    );
    let tasks = node.start();

    let result = run_http_api(bind_addr, Arc::clone(&node)).await;
    for task in tasks {
        task.abort();
    }
    result?;
    Ok(())
}

async fn admin(cmd: AdminCmd) -> anyhow::Result<()> {
    let client = HttpTransport::new();
    match cmd {
        AdminCmd::Status { http } => {
            let body: Value = client.get_json(&http, "/servers").await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        AdminCmd::Health { http } => {
            let body: Value = client.get_json(&http, "/health").await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        AdminCmd::Elect { http } => {
            let body: Value = client
                .post_json(&http, "/election/start", &serde_json::json!({}))
                .await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        AdminCmd::Metrics { http } => {
            let body = client.get_text(&http, "/metrics").await?;
            println!("{}", body);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_settings = LogSettings::from_env();
    init_logging(&log_settings);
    if let Some(path) = &log_settings.file {
        info!("Also logging to {}", path.display());
    }

    let cli = Cli::parse();

    match cli.command {
        Command::Node {
            config,
            id,
            address,
            peers,
            name,
        } => {
            let cfg = node_config(config, id, address, peers, name)?;
            if cfg.peers.is_empty() {
                warn!("Node {} has no peers and will lead alone", cfg.node_id);
            }
            run_node(cfg).await
        }
        Command::Admin { cmd } => admin(cmd).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_rolls_over_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("node.log");
        let mut sink = RotatingLog::open(&base, 16, 2).unwrap();

        sink.write_all(b"first line 0123\n").unwrap();
        sink.write_all(b"second line\n").unwrap();
        sink.write_all(b"third line\n").unwrap();
        sink.flush().unwrap();

        let gen1 = dir.path().join("node.log.1");
        let gen2 = dir.path().join("node.log.2");
        assert_eq!(std::fs::read_to_string(&base).unwrap(), "third line\n");
        assert_eq!(std::fs::read_to_string(&gen1).unwrap(), "second line\n");
        assert_eq!(std::fs::read_to_string(&gen2).unwrap(), "first line 0123\n");
        assert!(!dir.path().join("node.log.3").exists());
    }

    #[test]
    fn file_logging_writes_records_and_tolerates_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            file: Some(dir.path().join("docket.log")),
            max_size_bytes: 1024 * 1024,
            max_files: 2,
        };

        init_logging(&settings);
        init_logging(&settings);
        info!("file sink marker 7731");

        let written = std::fs::read_to_string(dir.path().join("docket.log")).unwrap();
        assert!(written.contains("file sink marker 7731"));
        assert!(!written.contains("\u{1b}["));
    }
}
