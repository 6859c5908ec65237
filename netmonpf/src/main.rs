use std::process::ExitCode;

use anyhow::{Context, Result};
use aya::include_bytes_aligned;
use clap::Parser;
use log::{info, warn};
use netmonpf::{
    AyaProbeLoader, TelemetryFacade, ToolRequest, ToolResponse, probes::bump_memlock_rlimit,
    settings::Settings,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(about = "Inbound packet rate and outbound TCP connections from kernel probes")]
struct Opt {
    /// `incoming` (packets per second) or `outgoing` (next TCP connection)
    operation: String,

    /// Network interface to attach to; defaults to NET_IFACE
    #[clap(short, long, default_value = "")]
    interface: String,

    /// Seconds to sample for `incoming`
    #[clap(short, long)]
    duration: Option<u64>,

    /// Print the tool response as JSON
    #[clap(long)]
    json: bool,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opt.verbose { "info" } else { "warn" }),
    )
    .init();

    let settings = Settings::new().context("Failed to load settings")?;
    bump_memlock_rlimit();

    // build.rs compiles netmonpf-ebpf and drops the object in OUT_DIR.
    let loader = AyaProbeLoader::new(include_bytes_aligned!(concat!(
        env!("OUT_DIR"),
        "/netmonpf"
    )));
    let facade = TelemetryFacade::new(loader, settings.to_facade_config());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received signal, stopping..");
                on_interrupt.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    let request = ToolRequest {
        operation: opt.operation,
        interface: opt.interface,
        duration: opt.duration,
    };
    let response: ToolResponse = facade.handle_request(&request, &cancel).await;

    if opt.json {
        println!("{}", serde_json::to_string(&response)?);
    } else if response.is_error {
        eprintln!("{}", response.text);
    } else {
        println!("{}", response.text);
    }

    Ok(if response.is_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
