use std::time::Duration;

/// Maximum number of detections retained in the persisted history.
///
/// The log is FIFO: once this many entries exist, every new detection pushes
/// the oldest one out. 100 entries is enough for the host application to show
/// a meaningful recent-activity list without the shared store growing without
/// bound on a device that talks to a tracker all day.
pub const DETECTION_CAPACITY: usize = 100;

/// Number of configuration retries before a start attempt is declared fatal.
///
/// The first attempt is not counted; with the default of 3, `start()` gives up
/// on the fourth consecutive failure.
pub const MAX_RETRIES: u32 = 3;

/// Fixed delay between configuration attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Period of the read-loop health check while the tunnel is running.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on packets handed to the classifier per batch.
pub const BATCH_SIZE: usize = 64;

/// Key under which the detection log is stored in the shared defaults.
pub const DETECTIONS_KEY: &str = "tunnel_detections";

/// Name of the in-process event published for every detection.
pub const DETECTION_EVENT: &str = "InfiLocDetection";

/// IP protocol number for TCP; TCP payloads are offered to the SNI parser.
pub const IPPROTO_TCP: u8 = 6;

/// IP protocol number for UDP; UDP payloads are offered to the DNS parser.
pub const IPPROTO_UDP: u8 = 17;
