//! Typed unit descriptions matching the directives sysunit renders
//!
//! A `UnitSpec` only ever exists in validated form: build one with
//! [`UnitSpec::from_params`](super::UnitSpec::from_params) or by hand in tests.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default directory unit files are written to
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Whether the unit file should exist on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

impl Ensure {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}

/// Service type determines startup notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceType {
    #[default]
    Simple,  // Ready immediately after exec
    Forking, // Ready when main process exits
    Oneshot, // Run once, no main process
    Dbus,    // Ready when D-Bus name acquired
    Notify,  // Ready on sd_notify READY=1
    Idle,    // Simple, delayed until jobs are dispatched
}

impl ServiceType {
    /// Matching is exact: `Simple` is not a service type
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(Self::Simple),
            "forking" => Some(Self::Forking),
            "oneshot" => Some(Self::Oneshot),
            "dbus" => Some(Self::Dbus),
            "notify" => Some(Self::Notify),
            "idle" => Some(Self::Idle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Forking => "forking",
            Self::Oneshot => "oneshot",
            Self::Dbus => "dbus",
            Self::Notify => "notify",
            Self::Idle => "idle",
        }
    }
}

/// A systemd time span such as `90`, `5s` or `1min 10sec`
///
/// Holds the text exactly as it will be rendered. Integer input is kept in
/// its decimal form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sec(String);

impl Sec {
    /// Accepts a bare non-negative integer, or whitespace-separated
    /// `<integer><unit>` tokens with unit in ms, s, sec, m, min, h, hour.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.trim() != s {
            return None;
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return Some(Self(s.to_string()));
        }
        if s.split_whitespace().all(|token| parse_span(token).is_some()) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Total length of the span; saturates instead of overflowing
    pub fn to_duration(&self) -> Duration {
        if self.0.bytes().all(|b| b.is_ascii_digit()) {
            return Duration::from_secs(self.0.parse().unwrap_or(u64::MAX));
        }
        self.0
            .split_whitespace()
            .filter_map(parse_span)
            .fold(Duration::ZERO, |total, span| total.saturating_add(span))
    }
}

impl fmt::Display for Sec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse one `<integer><unit>` token (e.g., "5s", "100ms", "2min")
fn parse_span(token: &str) -> Option<Duration> {
    let split = token.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = token.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let n: u64 = digits.parse().unwrap_or(u64::MAX);

    match unit {
        "ms" => Some(Duration::from_millis(n)),
        "s" | "sec" => Some(Duration::from_secs(n)),
        "m" | "min" => Some(Duration::from_secs(n.saturating_mul(60))),
        "h" | "hour" => Some(Duration::from_secs(n.saturating_mul(3600))),
        _ => None,
    }
}

/// [Unit] section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitSection {
    pub description: Option<String>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub requires: Option<String>,
}

/// [Service] section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSection {
    pub service_type: ServiceType,

    // Timing
    pub timeout_start_sec: Option<Sec>,
    pub restart: Option<String>,
    pub restart_sec: Option<Sec>,

    // Credentials and environment
    pub working_directory: Option<PathBuf>,
    pub environment: Option<String>,
    pub user: Option<String>,
    pub group: Option<String>,

    // Execution
    pub exec_start_pre: Vec<String>,
    pub exec_start: Option<String>,
    pub exec_stop: Option<String>,
}

/// [Install] section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallSection {
    pub wanted_by: Option<String>,
}

/// Complete description of one managed .service unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    pub name: String,
    pub ensure: Ensure,
    /// Directory the unit file lives in
    pub path: PathBuf,
    pub unit: UnitSection,
    pub service: ServiceSection,
    pub install: InstallSection,
}

impl UnitSpec {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ensure: Ensure::default(),
            path: PathBuf::from(DEFAULT_UNIT_DIR),
            unit: UnitSection::default(),
            service: ServiceSection::default(),
            install: InstallSection::default(),
        }
    }

    /// File name on disk, e.g. "nginx.service"
    pub fn file_name(&self) -> String {
        format!("{}.service", self.name)
    }

    /// Full path of the unit file
    pub fn file_path(&self) -> PathBuf {
        self.path.join(self.file_name())
    }
}
