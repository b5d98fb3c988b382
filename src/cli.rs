use clap::Parser;

/// infiloc: passive detector for location-tracking traffic.
///
/// Opens a packet source (live interface or saved capture), extracts DNS
/// query names and TLS SNI hostnames, and records any that belong to known
/// location-tracking services.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "infiloc",
    version,
    about   = "Passive on-device detector for location-tracking traffic",
    long_about = None,
)]
pub struct Cli {
    // ── Packet source ────────────────────────────────────────────────────────

    /// Network interface to capture on.
    ///
    /// If omitted (and no --read file is given), libpcap's default device is
    /// used.
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    pub interface: Option<String>,

    /// Replay packets from a saved PCAP file instead of a live interface.
    ///
    /// The tunnel stops on its own once the file is exhausted.
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    pub pcap_file: Option<String>,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Write log output to this file in addition to stdout.
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    // ── Storage / control ────────────────────────────────────────────────────

    /// Shared defaults file holding the detection history.
    ///
    /// Without it the history lives in memory for this session only.
    #[arg(long = "store", value_name = "PATH")]
    pub store: Option<String>,

    /// Serve the control protocol on this localhost address (e.g. 127.0.0.1:7878).
    #[arg(long = "control-addr", value_name = "ADDR")]
    pub control_addr: Option<String>,

    // ── Lifecycle timings ────────────────────────────────────────────────────

    /// Delay between network configuration retries, in milliseconds.
    #[arg(long = "retry-delay-ms", value_name = "MS", default_value_t = 2000)]
    pub retry_delay_ms: u64,

    /// Seconds between read-loop health checks.
    #[arg(long = "health-interval", value_name = "SECS", default_value_t = 30)]
    pub health_interval: u64,
}
