//! Build log types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw line of output from a sandbox job, before it is sequenced into
/// a build's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub line: String,
}

/// A stored, ordered build log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the build's append-only log, starting at 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Step the line belongs to ("fetch", "build", "export", "system").
    pub step: String,
    pub stream: LogStream,
    pub line: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::System => "system",
        }
    }
}

impl std::str::FromStr for LogStream {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            "system" => Ok(LogStream::System),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown log stream {:?}",
                other
            ))),
        }
    }
}
