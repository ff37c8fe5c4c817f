//! Default values applied when an environment variable is absent.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Listen on every interface.
pub const DEFAULT_BIND_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
/// HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 6991;
/// Directory downloads are written below.
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
/// Sessions idle for longer than this are evicted.
pub const DEFAULT_EVICTION_THRESHOLD: Duration = Duration::from_secs(12 * 60 * 60);
/// Period of the cleanup sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Transcoder executable looked up on `PATH`.
pub const DEFAULT_TRANSCODER_PATH: &str = "ffmpeg";
