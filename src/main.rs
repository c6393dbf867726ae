//! devtunnel: launch an app on a device and cycle a debugger through it.
//!
//! ```text
//! devtunnel <device_ip> <bundle_id> [pairing_file]
//!
//!   pairing credential ─▶ TcpProvider ─▶ tunnel ─▶ RSD lookup
//!       ─▶ process control: launch suspended ─▶ debugserver: attach, detach
//! ```
#![deny(unused_must_use)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use devtunnel::adapters::tcp_provider::{TcpProvider, device_endpoint};
use devtunnel::config::ClientConfig;
use devtunnel::pairing::PairingCredential;
use devtunnel::{logging, workflow};

#[derive(Parser)]
#[command(name = "devtunnel")]
#[command(version)]
#[command(about = "Launch an app suspended, attach the debugserver to it, then detach")]
struct Cli {
    /// Device IPv4 address
    device_ip: String,

    /// Bundle identifier of the app to launch
    bundle_id: String,

    /// Pairing credential file (JSON)
    #[arg(default_value = "pairing_file.json")]
    pairing_file: PathBuf,

    /// Client configuration file (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level);

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };

    let pairing = PairingCredential::read(&cli.pairing_file)
        .with_context(|| format!("reading pairing file {}", cli.pairing_file.display()))?;
    let endpoint = device_endpoint(&cli.device_ip, config.control_port)
        .with_context(|| format!("parsing device address {:?}", cli.device_ip))?;

    let provider = TcpProvider::new(endpoint, pairing, &config);
    let report = workflow::launch_and_debug(&provider, &cli.bundle_id, &config)
        .with_context(|| format!("launch-and-debug of {} on {}", cli.bundle_id, endpoint))?;

    info!("main: session complete");
    println!("RSD port:        {}", report.rsd_port);
    println!("Launched pid:    {}", report.pid);
    println!(
        "Attach response: {}",
        report.attach_response.as_deref().unwrap_or("<empty>")
    );
    for (i, response) in report.detach_responses.iter().enumerate() {
        println!(
            "Detach #{}:       {}",
            i + 1,
            response.as_deref().unwrap_or("<empty>")
        );
    }
    Ok(())
}
