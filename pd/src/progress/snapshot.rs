//! Canonical snapshot document types
//!
//! A snapshot is a complete, self-describing progress document. Every
//! consumer treats it as a wholesale replacement for whatever it held
//! before, never as a partial merge, so duplicate or out-of-order delivery
//! is harmless.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline phases, in execution order, plus the two terminal states
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Upload,
    Processing,
    Matching,
    ReportGeneration,
    Completed,
    Failed,
}

impl Phase {
    /// The working phases in the order the pipeline executes them
    pub const PIPELINE_ORDER: [Phase; 4] = [
        Phase::Upload,
        Phase::Processing,
        Phase::Matching,
        Phase::ReportGeneration,
    ];

    /// Terminal phases admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// Wire name, used as the key in the phases map
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Upload => "upload",
            Phase::Processing => "processing",
            Phase::Matching => "matching",
            Phase::ReportGeneration => "report_generation",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Progress of the file currently being processed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileProgress {
    pub name: String,
    pub total_pages: u32,
    pub current_page: u32,
    pub regex_matches_found: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived from current_page/total_pages
    pub percentage: u8,
}

impl FileProgress {
    pub fn new(name: impl Into<String>, total_pages: u32) -> Self {
        Self {
            name: name.into(),
            total_pages,
            current_page: 0,
            regex_matches_found: 0,
            started_at: Utc::now(),
            completed_at: None,
            percentage: if total_pages == 0 { 100 } else { 0 },
        }
    }

    /// Fraction of this file already done; a zero-page file counts as fully done
    pub fn fraction(&self) -> f64 {
        if self.total_pages == 0 {
            1.0
        } else {
            f64::from(self.current_page) / f64::from(self.total_pages)
        }
    }

    /// Advance to a page and refresh the derived percentage
    ///
    /// Pages are 1-based while a file is in progress; the page is clamped
    /// to total_pages so a misbehaving producer cannot push past 100%.
    pub fn advance_to_page(&mut self, page: u32) {
        self.current_page = if self.total_pages > 0 {
            page.min(self.total_pages)
        } else {
            page
        };
        self.percentage = (self.fraction().min(1.0) * 100.0).round() as u8;
    }
}

/// Phase-specific counters, flattened into the phase progress document
///
/// Untagged: each variant has a distinct required field set, so the wire
/// shape stays flat while deserialization stays unambiguous. `Empty` must
/// remain the last variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhaseCounters {
    Upload {
        files_uploaded: u32,
        bytes_uploaded: u64,
    },
    Processing {
        total_files: u32,
        current_file_index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_file: Option<FileProgress>,
    },
    Matching {
        matches_found: u32,
        unmatched_count: u32,
    },
    ReportGeneration {
        report_type: String,
        records_written: u64,
    },
    Empty {},
}

/// Per-phase progress entry in the snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub status: PhaseStatus,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: PhaseCounters,
}

impl PhaseProgress {
    /// A phase that has not started yet
    pub fn pending() -> Self {
        Self {
            status: PhaseStatus::Pending,
            percentage: 0,
            started_at: None,
            completed_at: None,
            counters: PhaseCounters::Empty {},
        }
    }

    /// Mark the phase in progress as of now
    pub fn start(&mut self) {
        self.status = PhaseStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Mark the phase completed at 100%
    pub fn complete(&mut self) {
        self.status = PhaseStatus::Completed;
        self.percentage = 100;
        self.completed_at = Some(Utc::now());
    }
}

/// Error detail reported by the producing pipeline
///
/// This is the only error that ever reaches user-visible state; transport
/// and cache failures are handled locally and never surface here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorContext {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
            traceback: None,
        }
    }

    /// Attach a context entry (phase, file, page, session_id, ...)
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// The canonical snapshot document, identical for pull and push transports
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub current_phase: Phase,
    pub overall_percentage: u8,
    /// None once the session is completed (detail is pruned) and for
    /// sessions that never started
    pub phases: Option<BTreeMap<String, PhaseProgress>>,
    pub last_update: DateTime<Utc>,
    pub status_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorContext>,
}

impl SessionSnapshot {
    /// The snapshot the pull endpoint serves for a session that has not
    /// started processing yet. Never a 404 for a valid session.
    pub fn default_pending(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_phase: Phase::Pending,
            overall_percentage: 0,
            phases: None,
            last_update: Utc::now(),
            status_message: "Waiting for processing to start".to_string(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// Strip phase detail down to the minimal completed record used for
    /// post-completion cache entries
    pub fn minimal_completed(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            current_phase: Phase::Completed,
            overall_percentage: 100,
            phases: None,
            last_update: self.last_update,
            status_message: self.status_message.clone(),
            error: None,
        }
    }
}
