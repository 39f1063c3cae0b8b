//! Raw event vocabulary emitted by the document pipeline
//!
//! These events are the external collaborator contract: the extraction and
//! matching pipeline emits them into the tracker, which turns them into
//! bounded-rate snapshots. The tracker never calls back into the pipeline.

use serde::{Deserialize, Serialize};

use crate::progress::Phase;

/// Everything the pipeline reports while working one session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    // === Upload phase ===
    UploadStarted {
        session_id: String,
    },
    FileUploaded {
        session_id: String,
        name: String,
        bytes: u64,
    },
    UploadCompleted {
        session_id: String,
    },

    // === Processing phase ===
    ProcessingStarted {
        session_id: String,
        total_files: u32,
    },
    /// A file's extraction has begun (counts as the file's first-page boundary)
    FileStarted {
        session_id: String,
        /// 1-based index within the session's file set
        file_index: u32,
        name: String,
        total_pages: u32,
    },
    PageProcessed {
        session_id: String,
        /// 1-based page within the current file
        page: u32,
        regex_matches: u32,
    },
    FileCompleted {
        session_id: String,
        file_index: u32,
    },

    // === Matching phase ===
    MatchingStarted {
        session_id: String,
    },
    MatchingProgress {
        session_id: String,
        matches_found: u32,
        unmatched_count: u32,
        percentage: u8,
    },
    MatchingCompleted {
        session_id: String,
        matches_found: u32,
        unmatched_count: u32,
    },

    // === Report generation phase ===
    ReportStarted {
        session_id: String,
        report_type: String,
    },
    ReportProgress {
        session_id: String,
        records_written: u64,
        percentage: u8,
    },
    ReportCompleted {
        session_id: String,
        records_written: u64,
    },

    // === Phase control ===
    /// The pipeline skipped a phase entirely (e.g. no matching needed);
    /// the tracker records it as completed at 100%
    PhaseSkipped {
        session_id: String,
        phase: Phase,
    },
    /// Terminal failure; the tracker stops accepting events afterwards
    PipelineFailed {
        session_id: String,
        error_type: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
}

impl PipelineEvent {
    /// Get the session ID for this event
    pub fn session_id(&self) -> &str {
        match self {
            PipelineEvent::UploadStarted { session_id }
            | PipelineEvent::FileUploaded { session_id, .. }
            | PipelineEvent::UploadCompleted { session_id }
            | PipelineEvent::ProcessingStarted { session_id, .. }
            | PipelineEvent::FileStarted { session_id, .. }
            | PipelineEvent::PageProcessed { session_id, .. }
            | PipelineEvent::FileCompleted { session_id, .. }
            | PipelineEvent::MatchingStarted { session_id }
            | PipelineEvent::MatchingProgress { session_id, .. }
            | PipelineEvent::MatchingCompleted { session_id, .. }
            | PipelineEvent::ReportStarted { session_id, .. }
            | PipelineEvent::ReportProgress { session_id, .. }
            | PipelineEvent::ReportCompleted { session_id, .. }
            | PipelineEvent::PhaseSkipped { session_id, .. }
            | PipelineEvent::PipelineFailed { session_id, .. } => session_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::UploadStarted { .. } => "UploadStarted",
            PipelineEvent::FileUploaded { .. } => "FileUploaded",
            PipelineEvent::UploadCompleted { .. } => "UploadCompleted",
            PipelineEvent::ProcessingStarted { .. } => "ProcessingStarted",
            PipelineEvent::FileStarted { .. } => "FileStarted",
            PipelineEvent::PageProcessed { .. } => "PageProcessed",
            PipelineEvent::FileCompleted { .. } => "FileCompleted",
            PipelineEvent::MatchingStarted { .. } => "MatchingStarted",
            PipelineEvent::MatchingProgress { .. } => "MatchingProgress",
            PipelineEvent::MatchingCompleted { .. } => "MatchingCompleted",
            PipelineEvent::ReportStarted { .. } => "ReportStarted",
            PipelineEvent::ReportProgress { .. } => "ReportProgress",
            PipelineEvent::ReportCompleted { .. } => "ReportCompleted",
            PipelineEvent::PhaseSkipped { .. } => "PhaseSkipped",
            PipelineEvent::PipelineFailed { .. } => "PipelineFailed",
        }
    }

    /// Phase transitions always force an immediate flush. First/last page
    /// boundaries depend on the in-flight file and are detected by the
    /// tracker, which knows total_pages.
    pub fn is_phase_transition(&self) -> bool {
        matches!(
            self,
            PipelineEvent::UploadStarted { .. }
                | PipelineEvent::UploadCompleted { .. }
                | PipelineEvent::ProcessingStarted { .. }
                | PipelineEvent::FileStarted { .. }
                | PipelineEvent::FileCompleted { .. }
                | PipelineEvent::MatchingStarted { .. }
                | PipelineEvent::MatchingCompleted { .. }
                | PipelineEvent::ReportStarted { .. }
                | PipelineEvent::ReportCompleted { .. }
                | PipelineEvent::PhaseSkipped { .. }
                | PipelineEvent::PipelineFailed { .. }
        )
    }
}
