//! Command-line entry point: wires a capture input/output pair into
//! storage through `sipgrep_capture::CaptureManager`, polls for changes,
//! and renders the call table. The interactive TUI a terminal frontend
//! would normally drive is out of scope here — this prints snapshots
//! instead, the same way a headless/batch run of that frontend would.

mod config;
mod render;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use sipgrep_capture::{CaptureManager, FileOutput, LiveInput, OfflineInput, RemoteInput, RemoteOutput};
use sipgrep_storage::{Storage, StorageConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sipgrep", version, about = "SIP/SDP traffic analyzer")]
pub(crate) struct Cli {
    /// Capture on a live interface (mutually exclusive with --input-file).
    #[arg(short = 'i', long)]
    pub interface: Option<String>,

    /// Read an existing pcap/pcap-ng file instead of a live interface.
    #[arg(short = 'I', long = "input-file")]
    pub input_file: Option<PathBuf>,

    /// Write every decoded packet back out to a pcap file.
    #[arg(short = 'O', long = "output-file")]
    pub output_file: Option<PathBuf>,

    /// TOML configuration file; CLI flags override its values.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// BPF filter expression, installed on every live input at attach time.
    #[arg(short = 'f', long = "bpf")]
    pub bpf_filter: Option<String>,

    /// Listen for HEP-encapsulated frames on this address.
    #[arg(long = "hep-listen")]
    pub hep_listen: Option<SocketAddr>,

    /// Forward accepted packets to this address as a HEPv3 envelope.
    #[arg(long = "hep-forward")]
    pub hep_forward: Option<SocketAddr>,

    /// Display filter applied to the call list (same grammar as the
    /// interactive filter bar: `<column>:<term>`, `~` for regex, `-` to
    /// negate a clause, bare terms OR-matched across Call-ID/From/To).
    #[arg(long)]
    pub filter: Option<String>,

    /// `storage.memory_limit` override, in bytes.
    #[arg(long = "memory-limit")]
    pub memory_limit: Option<u64>,

    /// `storage.filter.methods` override, comma-separated.
    #[arg(long = "filter-methods")]
    pub filter_methods: Option<String>,

    /// `storage.filter.payload` override, a regex.
    #[arg(long = "filter-payload")]
    pub filter_payload: Option<String>,

    /// `storage.match.invite` override.
    #[arg(long = "match-invite")]
    pub match_invite: bool,

    /// `capture.limit` override: maximum retained calls.
    #[arg(long = "capture-limit")]
    pub capture_limit: Option<u64>,

    /// Print a decode-summary (accepted/skipped per dissector layer) after
    /// the run instead of a final call table.
    #[arg(long)]
    pub stats: bool,

    /// Dump the final call table as JSON instead of a text table.
    #[arg(long = "dump-json")]
    pub dump_json: bool,

    /// Exit after this many milliseconds (0 = run until an offline input
    /// drains or the process is interrupted).
    #[arg(long = "run-for-ms", default_value_t = 0)]
    pub run_for_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut raw_config: HashMap<String, String> = match &cli.config {
        Some(path) => config::load_toml(path)?,
        None => HashMap::new(),
    };
    config::apply_cli_overrides(&mut raw_config, &cli);

    let storage = Arc::new(Storage::new(StorageConfig::from_map(&raw_config)));
    let manager = Arc::new(CaptureManager::new(storage.clone()));

    match (&cli.interface, &cli.input_file) {
        (Some(device), None) => manager.add_input(Box::new(LiveInput::new(device.clone())))?,
        (None, Some(path)) => manager.add_input(Box::new(OfflineInput::new(path.clone())))?,
        (Some(_), Some(_)) => bail!("--interface and --input-file are mutually exclusive"),
        (None, None) if cli.hep_listen.is_none() => {
            bail!("one of --interface, --input-file or --hep-listen is required")
        }
        (None, None) => {}
    }
    if let Some(addr) = cli.hep_listen {
        manager.add_input(Box::new(RemoteInput::new(addr)))?;
    }
    if let Some(expr) = &cli.bpf_filter {
        manager.set_filter(expr).context("invalid BPF filter")?;
    }
    if let Some(path) = &cli.output_file {
        manager.add_output(Box::new(FileOutput::create(path.clone())?));
    }
    if let Some(addr) = cli.hep_forward {
        manager.add_output(Box::new(RemoteOutput::connect(addr)?));
    }
    if let Some(expr) = &cli.filter {
        storage.set_filter(expr);
    }

    manager.start()?;
    info!("capture started");

    let started = Instant::now();
    let mut last_generation = storage.calls_changed();
    loop {
        std::thread::sleep(Duration::from_millis(200));

        let generation = storage.calls_changed();
        if generation != last_generation {
            last_generation = generation;
            if !cli.stats && !cli.dump_json {
                render::print_table(&storage.displayed_calls());
            }
        }

        if cli.run_for_ms != 0 && started.elapsed().as_millis() as u64 >= cli.run_for_ms {
            break;
        }
        if !manager.any_active() {
            break;
        }
    }
    manager.stop();

    if cli.dump_json {
        render::print_json(&storage.displayed_calls())?;
    } else if cli.stats {
        let (accepted, skipped) = manager.dissect_stats();
        println!("decoded: {accepted} accepted, {skipped} skipped");
    } else {
        render::print_table(&storage.displayed_calls());
    }

    Ok(())
}
