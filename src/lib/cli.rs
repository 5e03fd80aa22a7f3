use std::path::PathBuf;

use clap::Parser;
use once_cell::sync::OnceCell;
use tracing::*;

use crate::{
    parser::{FieldLayout, RecordLayout},
    server::{DEFAULT_PORT, ServerConfig},
};

static MANAGER: OnceCell<Manager> = OnceCell::new();

struct Manager {
    clap_matches: Args,
}

#[derive(Debug, Parser)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION")
)]
pub struct Args {
    /// Sets the IP address the telemetry server listens on
    #[arg(long, default_value = "0.0.0.0")]
    address: std::net::IpAddr,

    /// Sets the TCP port the telemetry server listens on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// The time (in seconds) without any received line after which a session is finalized.
    /// Negative values disable the timeout.
    #[arg(long, default_value = "3", allow_negative_numbers = true)]
    inactivity_timeout: i16,

    /// Layout of the data records.
    ///
    /// plain: timestamp,quantity
    ///
    /// prefixed: identifier,timestamp,quantity[,checksum]
    #[arg(long, default_value = "prefixed")]
    record_layout: RecordLayout,

    /// Overrides the zero-based position of the timestamp field of the selected layout
    #[arg(long)]
    timestamp_field: Option<usize>,

    /// Overrides the zero-based position of the quantity field of the selected layout
    #[arg(long)]
    quantity_field: Option<usize>,

    /// Specifies the CSV file to which the session averages are appended.
    #[arg(long, default_value = "Results.csv")]
    results_path: PathBuf,

    /// Turns all log categories up to Debug, for more information check RUST_LOG env variable.
    #[arg(short, long)]
    verbose: bool,

    /// Turns all log categories up to Trace to the log file, for more information check RUST_LOG env variable.
    #[arg(long)]
    enable_tracing_level_log_file: bool,

    /// Specifies the path in which the logs will be stored.
    #[arg(long, default_value = "./logs")]
    log_path: Option<String>,
}

/// Constructs our manager, Should be done inside main
#[instrument(level = "debug")]
pub fn init() {
    let expanded_args = std::env::args()
        .map(|arg| {
            // Fall back to the unexpanded argument if expansion fails
            shellexpand::env(&arg.clone())
                .inspect_err(|_| {
                    warn!("Failed expanding arg: {arg:?}, using the non-expanded instead.")
                })
                .unwrap_or_else(|_| arg.into())
                .into_owned()
        })
        .collect::<Vec<String>>();

    init_with(Args::parse_from(expanded_args));
}

/// Constructs our manager, Should be done inside main
/// Note: differently from init(), this doesn't expand env variables
#[instrument(level = "debug")]
pub fn init_with(args: Args) {
    MANAGER.get_or_init(|| Manager { clap_matches: args });
}

/// Local accessor to the parsed Args, falls back to the defaults if init was never called
fn args() -> &'static Args {
    &MANAGER
        .get_or_init(|| Manager {
            clap_matches: Args::parse_from([env!("CARGO_PKG_NAME")]),
        })
        .clap_matches
}

/// Checks if the verbosity parameter was used
#[instrument(level = "debug")]
pub fn is_verbose() -> bool {
    args().verbose
}

#[instrument(level = "debug")]
pub fn is_tracing() -> bool {
    args().enable_tracing_level_log_file
}

#[instrument(level = "debug")]
pub fn log_path() -> String {
    let log_path = PathBuf::from(args().log_path.clone().unwrap_or_else(|| "./logs".into()));

    std::fs::canonicalize(&log_path)
        .inspect_err(|_| {
            warn!("Failed canonicalizing path: {log_path:?}, using the non-canonized instead.")
        })
        .unwrap_or(log_path)
        .display()
        .to_string()
}

#[instrument(level = "debug")]
pub fn command_line_string() -> String {
    std::env::args().collect::<Vec<String>>().join(" ")
}

/// Returns a pretty string of the current Args struct
#[instrument(level = "debug")]
pub fn command_line() -> String {
    format!("{:#?}", args())
}

#[instrument(level = "debug")]
pub fn server_config() -> ServerConfig {
    args().server_config()
}

impl Args {
    fn local_addr(&self) -> String {
        std::net::SocketAddr::new(self.address, self.port).to_string()
    }

    fn inactivity_timeout(&self) -> Option<std::time::Duration> {
        if self.inactivity_timeout < 0 {
            return None;
        }

        Some(std::time::Duration::from_secs(self.inactivity_timeout as u64))
    }

    fn layout(&self) -> FieldLayout {
        let preset = FieldLayout::from(self.record_layout);

        FieldLayout::new(
            self.timestamp_field.unwrap_or(preset.timestamp_index),
            self.quantity_field.unwrap_or(preset.quantity_index),
        )
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            local_addr: self.local_addr(),
            inactivity_timeout: self.inactivity_timeout(),
            layout: self.layout(),
            results_path: self.results_path.clone(),
        }
    }
}
