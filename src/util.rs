use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const TARGETS_FILE: &str = "FLEETWATCH_TARGETS_FILE";

const DEFAULT_TARGETS_FILE: &str = "config/targets.json";

pub fn get_targets_file() -> PathBuf {
    std::env::var(TARGETS_FILE).map_or(PathBuf::from(DEFAULT_TARGETS_FILE), PathBuf::from)
}

const DATA_DIR: &str = "FLEETWATCH_DATA_DIR";
const STATE_FILE: &str = "FLEETWATCH_STATE_FILE";

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_STATE_FILE_NAME: &str = "fleetwatch-state.json";

/// `FLEETWATCH_STATE_FILE`, or `fleetwatch-state.json` inside `FLEETWATCH_DATA_DIR`
pub fn get_state_file() -> PathBuf {
    if let Ok(path) = std::env::var(STATE_FILE) {
        return PathBuf::from(path);
    }
    let data_dir = std::env::var(DATA_DIR).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    PathBuf::from(data_dir).join(DEFAULT_STATE_FILE_NAME)
}

const POLL_INTERVAL: &str = "FLEETWATCH_POLL_INTERVAL_SECONDS";

pub fn get_poll_interval(default: Duration) -> Duration {
    let from_env = std::env::var(POLL_INTERVAL);
    from_env.map_or(default, |res| {
        res.parse().map(Duration::from_secs).unwrap_or(default)
    })
}

const HTTP_TIMEOUT: &str = "FLEETWATCH_HTTP_TIMEOUT_SECONDS";

pub fn get_http_timeout(default: Duration) -> Duration {
    let from_env = std::env::var(HTTP_TIMEOUT);
    from_env.map_or(default, |res| {
        res.parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(default)
    })
}

const API_ADDR: &str = "FLEETWATCH_API_ADDR";

const DEFAULT_API_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);

pub fn get_api_addr() -> SocketAddr {
    let default = SocketAddr::from(DEFAULT_API_ADDR);
    let addr_from_env = std::env::var(API_ADDR);
    addr_from_env.map_or(default, |res| res.parse().unwrap_or(default))
}

/// Interprets `1/true/yes/on` (any case) as true
pub fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
