//! # labelwire CLI
//!
//! Command-line interface for Niimbot-style thermal label printers.
//!
//! ## Usage
//!
//! ```bash
//! # Print today's date on the loaded label (width from the roll's RFID tag)
//! labelwire print --query-label --device 03:00:00:12:34:56
//!
//! # Print text, or tomorrow's date
//! labelwire print "Leftovers"
//! labelwire print --date tomorrow
//!
//! # Print an image on a 30mm label, without touching a printer
//! labelwire print --image logo.png --barcode 6972842743596 --dry-run
//!
//! # Query the printer
//! labelwire status
//! labelwire heartbeat
//!
//! # Run the HTTP API with the once-a-day date printer
//! labelwire serve --listen 0.0.0.0:8080 --auto-print
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use labelwire::{
    LabelwireError,
    autoprint::{AutoPrintConfig, AutoPrinter, LabelDate, date_label},
    printer::{
        CancelToken, CoordinatorConfig, JobOptions, LabelContent, PrintJobCoordinator,
        PrintResult, PrinterConfig, PrinterSession, SessionConfig,
    },
    protocol::Command,
    server::{self, AppState, ServerConfig},
    transport::{LoopbackConnector, LoopbackDevice, RfcommConnector, rfcomm::DEFAULT_DEVICE},
    width::{CachedWidthResolver, CloudTemplateLookup, FixedWidth, JsonFileCache, WidthResolver},
};

/// Address used for the in-memory printer
const LOOPBACK_ADDRESS: &str = "loopback";

/// labelwire - Thermal label printer utility
#[derive(Parser, Debug)]
#[command(name = "labelwire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Printer MAC address or RFCOMM device path
    #[arg(long, global = true, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Label width cache file
    #[arg(long, global = true, value_name = "FILE")]
    width_cache: Option<PathBuf>,

    /// Use this label width (mm) for every label code instead of looking it up
    #[arg(long, global = true, value_name = "MM")]
    label_width: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a label
    Print {
        /// Label text (defaults to a date label)
        text: Option<String>,

        /// Date to print when no text is given: today or tomorrow
        #[arg(long, default_value = "today")]
        date: LabelDate,

        /// Print an image file instead of text
        #[arg(long, value_name = "FILE", conflicts_with = "text")]
        image: Option<PathBuf>,

        /// Label code used to look up the label width
        #[arg(long)]
        barcode: Option<String>,

        /// Read the label code from the loaded roll's RFID tag (otherwise
        /// the print head width is used unless --barcode is given)
        #[arg(long, conflicts_with = "barcode")]
        query_label: bool,

        /// Label height in rows
        #[arg(long)]
        height: Option<u32>,

        /// Send to an in-memory printer and report the bytes
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the loaded label and printer status
    Status,

    /// Check the printer is alive
    Heartbeat,

    /// Run the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,

        /// Print today's date once a day whenever the printer is reachable
        #[arg(long)]
        auto_print: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LabelwireError> {
    let cli = Cli::parse();
    let query_timeout = Duration::from_secs(2);

    match &cli.command {
        Commands::Print {
            text,
            date,
            image,
            barcode,
            query_label,
            height,
            dry_run,
        } => {
            let content = match (image, text) {
                (Some(path), _) => {
                    let image = image::open(path).map_err(|e| {
                        LabelwireError::Image(format!("Failed to open {}: {}", path.display(), e))
                    })?;
                    LabelContent::Bitmap(image)
                }
                (None, Some(text)) => LabelContent::Text(text.clone()),
                (None, None) => LabelContent::Text(date_label(date.resolve())),
            };
            let options = JobOptions {
                barcode: barcode.clone(),
                query_label: *query_label,
                height: *height,
            };

            let device = dry_run.then(LoopbackDevice::new);
            let coordinator = build_coordinator(&cli, device.clone()).await?;
            let address = if device.is_some() {
                LOOPBACK_ADDRESS
            } else {
                cli.device.as_str()
            };
            coordinator.session().connect(address).await?;

            let result = coordinator
                .print(content, &options, &CancelToken::new())
                .await;
            coordinator.session().disconnect().await;

            match result {
                PrintResult::Success { job_id, rows } => {
                    println!("Printed {} rows (job {})", rows, job_id);
                }
                PrintResult::Failure { reason, .. } => {
                    return Err(LabelwireError::Job(reason.to_string()));
                }
            }

            if let Some(device) = device {
                report_dry_run(&device);
            }
        }

        Commands::Status => {
            let session = connect_session(&cli).await?;
            match session.get_device_status(query_timeout).await? {
                Some(label) => {
                    println!("Label:   {}", label.barcode);
                    println!("Serial:  {}", label.serial);
                    println!("Used:    {}/{}", label.used_len, label.total_len);
                    println!("Type:    {}", label.label_type);
                    println!("Tag:     {}", label.uuid);
                }
                None => println!("Label:   (none detected)"),
            }
            let status = session.heartbeat(query_timeout).await?;
            println!("Power:   {}", show(status.power_level));
            println!("Paper:   {}", show(status.paper_state));
            println!("Lid:     {}", show(status.closing_state));
            session.disconnect().await;
        }

        Commands::Heartbeat => {
            let session = connect_session(&cli).await?;
            let status = session.heartbeat(query_timeout).await?;
            println!("Printer is alive ({:?})", status);
            session.disconnect().await;
        }

        Commands::Serve { listen, auto_print } => {
            let coordinator = Arc::new(build_coordinator(&cli, None).await?);
            let mut state = AppState::new(
                ServerConfig::new(cli.device.clone(), listen.clone()),
                coordinator.clone(),
            );
            if *auto_print {
                let auto = AutoPrinter::new(coordinator, AutoPrintConfig::new(cli.device.clone()));
                state = state.with_auto_print(Arc::new(auto));
            }
            server::serve(Arc::new(state)).await?;
        }
    }

    Ok(())
}

/// Session over RFCOMM, or over `device` when given.
fn build_session(device: Option<LoopbackDevice>) -> Arc<PrinterSession> {
    let session = match device {
        Some(device) => PrinterSession::new(LoopbackConnector::new(device), SessionConfig::default()),
        None => PrinterSession::new(RfcommConnector, SessionConfig::default()),
    };
    Arc::new(session)
}

async fn connect_session(cli: &Cli) -> Result<Arc<PrinterSession>, LabelwireError> {
    let session = build_session(None);
    session.connect(&cli.device).await?;
    Ok(session)
}

async fn build_coordinator(
    cli: &Cli,
    device: Option<LoopbackDevice>,
) -> Result<PrintJobCoordinator, LabelwireError> {
    let resolver = build_resolver(cli).await?;
    Ok(PrintJobCoordinator::new(
        build_session(device),
        resolver,
        CoordinatorConfig {
            printer: PrinterConfig::D110,
            ..CoordinatorConfig::default()
        },
    ))
}

/// Cache-then-cloud lookup, or a fixed width when `--label-width` is given.
async fn build_resolver(cli: &Cli) -> Result<Arc<dyn WidthResolver>, LabelwireError> {
    if let Some(mm) = cli.label_width {
        return Ok(Arc::new(FixedWidth(mm)));
    }

    let path = cli.width_cache.clone().unwrap_or_else(default_cache_path);
    debug!(path = %path.display(), "using width cache");
    let cache = JsonFileCache::open(&path)
        .await
        .map_err(|e| LabelwireError::Config(e.to_string()))?;
    let cloud = CloudTemplateLookup::new().map_err(|e| LabelwireError::Config(e.to_string()))?;
    Ok(Arc::new(CachedWidthResolver::new(cache, cloud)))
}

/// `$XDG_CACHE_HOME/labelwire/widths.json`, falling back to `~/.cache`.
fn default_cache_path() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("labelwire").join("widths.json")
}

/// Summarize what the in-memory printer received.
fn report_dry_run(device: &LoopbackDevice) {
    let raw = device.raw_bytes();
    let packets = device.received();
    info!(bytes = raw.len(), packets = packets.len(), "dry run complete");

    println!("Dry run: {} packets, {} bytes", packets.len(), raw.len());
    for p in packets.iter().filter(|p| p.command != Command::PrintBitmapRow.id()) {
        println!("  0x{:02x} {:02x?}", p.command, p.payload);
    }
    let first_row = packets
        .iter()
        .find(|p| p.command == Command::PrintBitmapRow.id())
        .and_then(|p| p.to_bytes().ok());
    if let Some(frame) = first_row {
        let hex: Vec<String> = frame.iter().map(|b| format!("{:02x}", b)).collect();
        println!("  first row: {}", hex.join(" "));
    }
}

fn show(value: Option<u8>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_query_label_is_opt_in() {
        let cli = Cli::try_parse_from(["labelwire", "print", "Milk"]).unwrap();
        let Commands::Print { query_label, barcode, .. } = cli.command else {
            panic!("expected print");
        };
        assert!(!query_label);
        assert_eq!(barcode, None);

        let cli = Cli::try_parse_from(["labelwire", "print", "--query-label"]).unwrap();
        assert!(matches!(cli.command, Commands::Print { query_label: true, .. }));
    }

    #[test]
    fn test_query_label_conflicts_with_barcode() {
        let parsed = Cli::try_parse_from([
            "labelwire",
            "print",
            "--query-label",
            "--barcode",
            "6972842743596",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_global_device_after_subcommand() {
        let cli = Cli::try_parse_from(["labelwire", "status", "--device", "/dev/rfcomm1"]).unwrap();
        assert_eq!(cli.device, "/dev/rfcomm1");
        assert!(matches!(cli.command, Commands::Status));
    }
}
