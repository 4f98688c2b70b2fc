use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::credentials::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Initializing,
    WaitingForScan,
    LoggedIn,
    Completed,
    Error,
    Timeout,
    Cancelled,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Initializing => "initializing",
            CaptureStatus::WaitingForScan => "waiting_for_scan",
            CaptureStatus::LoggedIn => "logged_in",
            CaptureStatus::Completed => "completed",
            CaptureStatus::Error => "error",
            CaptureStatus::Timeout => "timeout",
            CaptureStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureStatus::Completed
                | CaptureStatus::Error
                | CaptureStatus::Timeout
                | CaptureStatus::Cancelled
        )
    }

    /// Human-readable progress line for pollers.
    pub fn message(&self) -> &'static str {
        match self {
            CaptureStatus::Initializing => "Starting browser",
            CaptureStatus::WaitingForScan => "Waiting for the QR code to be scanned",
            CaptureStatus::LoggedIn => "Logged in, capturing credentials",
            CaptureStatus::Completed => "Credentials captured",
            CaptureStatus::Error => "Capture failed",
            CaptureStatus::Timeout => "Login timed out, please retry",
            CaptureStatus::Cancelled => "Session cancelled",
        }
    }
}

impl FromStr for CaptureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(CaptureStatus::Initializing),
            "waiting_for_scan" => Ok(CaptureStatus::WaitingForScan),
            "logged_in" => Ok(CaptureStatus::LoggedIn),
            "completed" => Ok(CaptureStatus::Completed),
            "error" => Ok(CaptureStatus::Error),
            "timeout" => Ok(CaptureStatus::Timeout),
            "cancelled" => Ok(CaptureStatus::Cancelled),
            other => Err(format!("unknown capture status: {}", other)),
        }
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a session may move from `from` to `to`. Staying put is always allowed.
pub fn can_transition(from: CaptureStatus, to: CaptureStatus) -> bool {
    use CaptureStatus::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Initializing, WaitingForScan | Error | Timeout | Cancelled)
            | (WaitingForScan, LoggedIn | Error | Timeout | Cancelled)
            | (LoggedIn, Completed | Error | Timeout)
    )
}

/// Read-only view of a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub session_id: String,
    pub status: CaptureStatus,
    pub qr_image: Option<String>,
    pub credentials: Option<Credentials>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CaptureSnapshot {
    pub fn new(session_id: String, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            status: CaptureStatus::Initializing,
            qr_image: None,
            credentials: None,
            error: None,
            created_at,
            expires_at,
        }
    }

    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedCapture {
    pub session_id: String,
    pub qr_image: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use CaptureStatus::*;

    const ALL: [CaptureStatus; 7] = [
        Initializing,
        WaitingForScan,
        LoggedIn,
        Completed,
        Error,
        Timeout,
        Cancelled,
    ];

    #[test]
    fn happy_path_is_allowed() {
        assert!(can_transition(Initializing, WaitingForScan));
        assert!(can_transition(WaitingForScan, LoggedIn));
        assert!(can_transition(LoggedIn, Completed));
    }

    #[test]
    fn terminal_states_are_sinks() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL.iter().filter(|to| *to != from) {
                assert!(!can_transition(*from, *to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn no_going_backwards_or_skipping_login() {
        assert!(!can_transition(WaitingForScan, Initializing));
        assert!(!can_transition(LoggedIn, WaitingForScan));
        assert!(!can_transition(Initializing, Completed));
        assert!(!can_transition(WaitingForScan, Completed));
    }

    #[test]
    fn cancel_only_before_login() {
        assert!(can_transition(Initializing, Cancelled));
        assert!(can_transition(WaitingForScan, Cancelled));
        assert!(!can_transition(LoggedIn, Cancelled));
    }

    #[test]
    fn status_text_round_trips_through_serde() {
        for status in ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<CaptureStatus>().unwrap(), status);
        }
    }
}
