//! Build and runtime information for `/_/status`.

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Captured once at startup.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub started_at: SystemTime,
    started: Instant,
    pub hostname: String,
    pub work_dir: Option<PathBuf>,
}

impl BuildInfo {
    pub fn capture() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            started_at: SystemTime::now(),
            started: Instant::now(),
            hostname: hostname(),
            work_dir: std::env::current_dir().ok(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn started_at_unix(&self) -> u64 {
        self.started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::capture()
    }
}

/// Kernel host name; `unknown` when it cannot be read or is not UTF-8.
pub fn hostname() -> String {
    ::hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Identity used for the leadership session: `service@host`.
pub fn instance_identity(service_name: &str) -> String {
    format!("{service_name}@{}", hostname())
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub name: &'static str,
    pub version: &'static str,
    pub started_at: u64,
    pub uptime_secs: u64,
    pub hostname: String,
    pub work_dir: Option<String>,
    pub environment: String,
    pub leadership: LeadershipStatus,
}

#[derive(Debug, Serialize)]
pub struct LeadershipStatus {
    pub enabled: bool,
    pub is_leader: bool,
    pub state: Option<crate::election::ElectionState>,
    pub leader: Option<String>,
    pub lock_key: Option<String>,
}
