//! ProgressTracker - turns raw pipeline events into throttled snapshots
//!
//! One tracker per session, owned by the pipeline instance driving that
//! session. `accept` only mutates in-memory state; `maybe_flush` decides
//! when a snapshot actually reaches the store and the bus: on a timer under
//! steady state, immediately on boundary events (first/last page of a file,
//! any phase transition, terminal states) so edges stay visibly instant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use snapstore::SnapStore;

use crate::config::PhaseWeights;
use crate::events::{PipelineEvent, SnapshotBus};

use super::snapshot::{
    ErrorContext, FileProgress, Phase, PhaseCounters, PhaseProgress, PhaseStatus, SessionSnapshot,
};

/// Errors from tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Session {0} is already terminal; event rejected")]
    Terminal(String),

    #[error("Event for session {got} routed to tracker for session {expected}")]
    WrongSession { expected: String, got: String },

    #[error("Store error: {0}")]
    Store(#[from] snapstore::StoreError),
}

/// Per-session progress tracker with batched snapshot writes
pub struct ProgressTracker {
    session_id: String,
    weights: PhaseWeights,
    flush_interval: Duration,
    store: Arc<SnapStore>,
    bus: Arc<SnapshotBus>,

    snapshot: SessionSnapshot,
    last_flush: Option<Instant>,
    boundary_pending: bool,
    dirty: bool,

    // Totals that survive phase pruning, for the completion message
    total_files: u32,
    matches_found: u32,
    records_written: u64,
}

impl ProgressTracker {
    pub fn new(
        session_id: impl Into<String>,
        weights: PhaseWeights,
        flush_interval: Duration,
        store: Arc<SnapStore>,
        bus: Arc<SnapshotBus>,
    ) -> Self {
        let session_id = session_id.into();
        debug!(%session_id, ?flush_interval, "ProgressTracker::new");
        let snapshot = SessionSnapshot::default_pending(&session_id);
        Self {
            session_id,
            weights,
            flush_interval,
            store,
            bus,
            snapshot,
            last_flush: None,
            boundary_pending: false,
            dirty: false,
            total_files: 0,
            matches_found: 0,
            records_written: 0,
        }
    }

    /// Current in-memory snapshot (may be ahead of the stored one)
    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Consume one raw pipeline event; in-memory mutation only, no I/O
    pub fn accept(&mut self, event: PipelineEvent) -> Result<(), TrackerError> {
        if self.snapshot.is_terminal() {
            warn!(
                session_id = %self.session_id,
                event_type = event.event_type(),
                "ProgressTracker::accept: event after terminal state"
            );
            return Err(TrackerError::Terminal(self.session_id.clone()));
        }
        if event.session_id() != self.session_id {
            return Err(TrackerError::WrongSession {
                expected: self.session_id.clone(),
                got: event.session_id().to_string(),
            });
        }

        debug!(
            session_id = %self.session_id,
            event_type = event.event_type(),
            "ProgressTracker::accept"
        );

        if event.is_phase_transition() {
            self.boundary_pending = true;
        }

        match event {
            PipelineEvent::UploadStarted { .. } => {
                self.enter_phase(Phase::Upload, PhaseCounters::Upload {
                    files_uploaded: 0,
                    bytes_uploaded: 0,
                });
                self.snapshot.status_message = "Uploading files".to_string();
            }
            PipelineEvent::FileUploaded { name, bytes, .. } => {
                if let PhaseCounters::Upload {
                    files_uploaded,
                    bytes_uploaded,
                } = &mut self.phase_mut(Phase::Upload).counters
                {
                    *files_uploaded += 1;
                    *bytes_uploaded += bytes;
                }
                self.snapshot.status_message = format!("Uploaded {name}");
            }
            PipelineEvent::UploadCompleted { .. } => {
                let files = match self.phase_mut(Phase::Upload).counters {
                    PhaseCounters::Upload { files_uploaded, .. } => files_uploaded,
                    _ => 0,
                };
                self.phase_mut(Phase::Upload).complete();
                self.snapshot.status_message = format!("Uploaded {files} files");
            }
            PipelineEvent::ProcessingStarted { total_files, .. } => {
                self.total_files = total_files;
                self.enter_phase(Phase::Processing, PhaseCounters::Processing {
                    total_files,
                    current_file_index: 0,
                    current_file: None,
                });
                self.snapshot.status_message = format!("Processing {total_files} files");
            }
            PipelineEvent::FileStarted {
                file_index,
                name,
                total_pages,
                ..
            } => {
                let total = self.total_files;
                let phase = self.phase_mut(Phase::Processing);
                if let PhaseCounters::Processing {
                    current_file_index,
                    current_file,
                    ..
                } = &mut phase.counters
                {
                    // 0 <= current_file_index <= total_files
                    *current_file_index = if total > 0 { file_index.min(total) } else { file_index };
                    *current_file = Some(FileProgress::new(&name, total_pages));
                }
                self.recompute_processing_percentage();
                self.snapshot.status_message = format!("Processing {name} (file {file_index} of {total})");
            }
            PipelineEvent::PageProcessed { page, regex_matches, .. } => {
                let mut boundary = false;
                if let PhaseCounters::Processing {
                    current_file: Some(file),
                    ..
                } = &mut self.phase_mut(Phase::Processing).counters
                {
                    file.advance_to_page(page);
                    file.regex_matches_found += regex_matches;
                    // First and last pages are boundary events even though
                    // PageProcessed itself is not a phase transition
                    boundary = page <= 1 || page >= file.total_pages;
                }
                if boundary {
                    self.boundary_pending = true;
                }
                self.recompute_processing_percentage();
            }
            PipelineEvent::FileCompleted { file_index, .. } => {
                if let PhaseCounters::Processing {
                    current_file: Some(file),
                    ..
                } = &mut self.phase_mut(Phase::Processing).counters
                {
                    file.current_page = file.total_pages;
                    file.percentage = 100;
                    file.completed_at = Some(chrono::Utc::now());
                }
                self.recompute_processing_percentage();
                if file_index >= self.total_files {
                    self.phase_mut(Phase::Processing).complete();
                }
            }
            PipelineEvent::MatchingStarted { .. } => {
                self.enter_phase(Phase::Matching, PhaseCounters::Matching {
                    matches_found: 0,
                    unmatched_count: 0,
                });
                self.snapshot.status_message = "Matching records".to_string();
            }
            PipelineEvent::MatchingProgress {
                matches_found,
                unmatched_count,
                percentage,
                ..
            } => {
                self.matches_found = matches_found;
                let phase = self.phase_mut(Phase::Matching);
                phase.counters = PhaseCounters::Matching {
                    matches_found,
                    unmatched_count,
                };
                phase.percentage = percentage.min(100);
            }
            PipelineEvent::MatchingCompleted {
                matches_found,
                unmatched_count,
                ..
            } => {
                self.matches_found = matches_found;
                let phase = self.phase_mut(Phase::Matching);
                phase.counters = PhaseCounters::Matching {
                    matches_found,
                    unmatched_count,
                };
                phase.complete();
                self.snapshot.status_message = format!("Found {matches_found} matches");
            }
            PipelineEvent::ReportStarted { report_type, .. } => {
                self.enter_phase(Phase::ReportGeneration, PhaseCounters::ReportGeneration {
                    report_type: report_type.clone(),
                    records_written: 0,
                });
                self.snapshot.status_message = format!("Generating {report_type} report");
            }
            PipelineEvent::ReportProgress {
                records_written,
                percentage,
                ..
            } => {
                self.records_written = records_written;
                let phase = self.phase_mut(Phase::ReportGeneration);
                if let PhaseCounters::ReportGeneration {
                    records_written: written,
                    ..
                } = &mut phase.counters
                {
                    *written = records_written;
                }
                phase.percentage = percentage.min(100);
            }
            PipelineEvent::ReportCompleted { records_written, .. } => {
                self.records_written = records_written;
                if let PhaseCounters::ReportGeneration {
                    records_written: written,
                    ..
                } = &mut self.phase_mut(Phase::ReportGeneration).counters
                {
                    *written = records_written;
                }
                self.phase_mut(Phase::ReportGeneration).complete();
                self.complete_session();
            }
            PipelineEvent::PhaseSkipped { phase, .. } => {
                // A skipped phase counts as fully done so the weighted sum
                // stays consistent
                info!(session_id = %self.session_id, %phase, "ProgressTracker: phase skipped");
                self.phase_mut(phase).complete();
                if phase == Phase::ReportGeneration {
                    self.complete_session();
                }
            }
            PipelineEvent::PipelineFailed {
                error_type,
                message,
                file,
                page,
                traceback,
                ..
            } => {
                let mut error = ErrorContext::new(error_type, message)
                    .with_context("session_id", self.session_id.clone())
                    .with_context("phase", self.snapshot.current_phase.as_str());
                if let Some(file) = file {
                    error = error.with_context("file", file);
                }
                if let Some(page) = page {
                    error = error.with_context("page", page);
                }
                error.traceback = traceback;
                self.fail_with(error);
            }
        }

        self.recompute_overall();
        self.dirty = true;
        Ok(())
    }

    /// Write a snapshot if the throttle allows it
    ///
    /// Flushes when a boundary event is pending or the configured interval
    /// has elapsed since the last write. Returns whether a write happened.
    pub fn maybe_flush(&mut self) -> Result<bool, TrackerError> {
        if !self.dirty {
            return Ok(false);
        }

        let due = match self.last_flush {
            None => true,
            Some(at) => at.elapsed() >= self.flush_interval,
        };

        if self.boundary_pending || due {
            self.flush()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Force a snapshot write regardless of the throttle
    pub fn flush(&mut self) -> Result<(), TrackerError> {
        self.snapshot.last_update = chrono::Utc::now();
        self.store.save(&self.session_id, &self.snapshot)?;
        self.bus.emit(self.snapshot.clone());
        self.last_flush = Some(Instant::now());
        self.boundary_pending = false;
        self.dirty = false;
        debug!(
            session_id = %self.session_id,
            phase = %self.snapshot.current_phase,
            overall = self.snapshot.overall_percentage,
            "ProgressTracker::flush"
        );
        Ok(())
    }

    /// Record a terminal pipeline failure and force a flush
    ///
    /// Detail already captured for the failed run stays in the snapshot but
    /// is informational only; the pipeline owns discarding partial output.
    pub fn fail(&mut self, error: ErrorContext) -> Result<(), TrackerError> {
        if self.snapshot.is_terminal() {
            return Err(TrackerError::Terminal(self.session_id.clone()));
        }
        self.fail_with(error);
        self.dirty = true;
        self.flush()
    }

    fn fail_with(&mut self, error: ErrorContext) {
        warn!(
            session_id = %self.session_id,
            error_type = %error.error_type,
            "ProgressTracker: pipeline failed"
        );
        // Freeze the in-progress phase as failed; percentages keep their
        // last-known values
        if let Some(phases) = &mut self.snapshot.phases {
            for progress in phases.values_mut() {
                if progress.status == PhaseStatus::InProgress {
                    progress.status = PhaseStatus::Failed;
                }
            }
        }
        self.snapshot.status_message = format!("Processing failed: {}", error.message);
        self.snapshot.error = Some(error);
        self.snapshot.current_phase = Phase::Failed;
        self.boundary_pending = true;
    }

    fn complete_session(&mut self) {
        info!(session_id = %self.session_id, "ProgressTracker: session completed");
        self.snapshot.current_phase = Phase::Completed;
        self.snapshot.overall_percentage = 100;
        self.snapshot.phases = None;
        self.snapshot.status_message = format!(
            "Processed {} files: {} matches, {} records written",
            self.total_files, self.matches_found, self.records_written
        );
        self.boundary_pending = true;
    }

    /// Move the session into a working phase, completing any phase still
    /// marked in-progress so at most one phase is ever in progress
    fn enter_phase(&mut self, phase: Phase, counters: PhaseCounters) {
        if let Some(phases) = &mut self.snapshot.phases {
            for progress in phases.values_mut() {
                if progress.status == PhaseStatus::InProgress {
                    progress.complete();
                }
            }
        }
        self.snapshot.current_phase = phase;
        let entry = self.phase_mut(phase);
        entry.counters = counters;
        entry.start();
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut PhaseProgress {
        self.snapshot
            .phases
            .get_or_insert_with(Default::default)
            .entry(phase.as_str().to_string())
            .or_insert_with(PhaseProgress::pending)
    }

    /// Weighted aggregate over the per-file page fraction:
    /// ((files_completed + current_file_fraction) / total_files) * 100
    fn recompute_processing_percentage(&mut self) {
        let total = self.total_files;
        let phase = self.phase_mut(Phase::Processing);
        if let PhaseCounters::Processing {
            current_file_index,
            current_file,
            ..
        } = &phase.counters
        {
            let pct = if total == 0 {
                100.0
            } else {
                let files_completed = f64::from(current_file_index.saturating_sub(1));
                let fraction = current_file.as_ref().map_or(0.0, FileProgress::fraction);
                ((files_completed + fraction) / f64::from(total)) * 100.0
            };
            phase.percentage = (pct.round() as u8).min(100);
        }
    }

    /// Overall percentage is the weighted sum of phase percentages, clamped
    /// to be non-decreasing for the lifetime of the run
    fn recompute_overall(&mut self) {
        if self.snapshot.current_phase == Phase::Completed {
            self.snapshot.overall_percentage = 100;
            return;
        }

        let weights = self.weights;
        let pct_of = |phases: &Option<std::collections::BTreeMap<String, PhaseProgress>>, phase: Phase| -> f64 {
            phases
                .as_ref()
                .and_then(|m| m.get(phase.as_str()))
                .map_or(0.0, |p| f64::from(p.percentage))
        };

        let weighted = pct_of(&self.snapshot.phases, Phase::Upload) * f64::from(weights.upload)
            + pct_of(&self.snapshot.phases, Phase::Processing) * f64::from(weights.processing)
            + pct_of(&self.snapshot.phases, Phase::Matching) * f64::from(weights.matching)
            + pct_of(&self.snapshot.phases, Phase::ReportGeneration) * f64::from(weights.report_generation);

        let overall = ((weighted / 100.0).round() as u8).min(100);
        // Monotonic within one run
        if overall > self.snapshot.overall_percentage {
            self.snapshot.overall_percentage = overall;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    use crate::events::create_snapshot_bus;

    fn tracker_with(temp: &TempDir, flush_interval_ms: u64) -> ProgressTracker {
        let store = Arc::new(SnapStore::open(temp.path()).unwrap());
        let bus = create_snapshot_bus();
        ProgressTracker::new(
            "sess-1",
            PhaseWeights::default(),
            Duration::from_millis(flush_interval_ms),
            store,
            bus,
        )
    }

    fn sid() -> String {
        "sess-1".to_string()
    }

    fn drive_to_processing(tracker: &mut ProgressTracker, total_files: u32) {
        tracker
            .accept(PipelineEvent::UploadStarted { session_id: sid() })
            .unwrap();
        tracker
            .accept(PipelineEvent::UploadCompleted { session_id: sid() })
            .unwrap();
        tracker
            .accept(PipelineEvent::ProcessingStarted {
                session_id: sid(),
                total_files,
            })
            .unwrap();
    }

    #[test]
    fn test_aggregate_formula() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        drive_to_processing(&mut tracker, 3);

        tracker
            .accept(PipelineEvent::FileStarted {
                session_id: sid(),
                file_index: 2,
                name: "b.pdf".to_string(),
                total_pages: 12,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::PageProcessed {
                session_id: sid(),
                page: 5,
                regex_matches: 0,
            })
            .unwrap();

        let phases = tracker.snapshot().phases.as_ref().unwrap();
        let processing = phases.get("processing").unwrap();
        // round(((1 + 5/12) / 3) * 100) = 44
        assert_eq!(processing.percentage, 44);
    }

    #[test]
    fn test_zero_page_file_contributes_fully() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        drive_to_processing(&mut tracker, 2);

        tracker
            .accept(PipelineEvent::FileStarted {
                session_id: sid(),
                file_index: 1,
                name: "empty.pdf".to_string(),
                total_pages: 0,
            })
            .unwrap();

        let phases = tracker.snapshot().phases.as_ref().unwrap();
        let processing = phases.get("processing").unwrap();
        // (0 + 1.0) / 2 = 50%, no division error
        assert_eq!(processing.percentage, 50);
    }

    #[test]
    fn test_boundary_event_forces_flush() {
        let temp = TempDir::new().unwrap();
        // Interval long enough that only boundaries can flush
        let mut tracker = tracker_with(&temp, 60_000);

        tracker
            .accept(PipelineEvent::UploadStarted { session_id: sid() })
            .unwrap();
        assert!(tracker.maybe_flush().unwrap(), "first flush always writes");

        tracker
            .accept(PipelineEvent::FileUploaded {
                session_id: sid(),
                name: "a.pdf".to_string(),
                bytes: 100,
            })
            .unwrap();
        assert!(!tracker.maybe_flush().unwrap(), "steady-state event is throttled");

        tracker
            .accept(PipelineEvent::UploadCompleted { session_id: sid() })
            .unwrap();
        assert!(tracker.maybe_flush().unwrap(), "phase transition bypasses the timer");
    }

    #[test]
    fn test_first_and_last_page_are_boundaries() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 60_000);
        drive_to_processing(&mut tracker, 1);
        tracker
            .accept(PipelineEvent::FileStarted {
                session_id: sid(),
                file_index: 1,
                name: "a.pdf".to_string(),
                total_pages: 3,
            })
            .unwrap();
        tracker.flush().unwrap();

        tracker
            .accept(PipelineEvent::PageProcessed {
                session_id: sid(),
                page: 1,
                regex_matches: 0,
            })
            .unwrap();
        assert!(tracker.maybe_flush().unwrap(), "first page flushes");

        tracker
            .accept(PipelineEvent::PageProcessed {
                session_id: sid(),
                page: 2,
                regex_matches: 0,
            })
            .unwrap();
        assert!(!tracker.maybe_flush().unwrap(), "middle page throttled");

        tracker
            .accept(PipelineEvent::PageProcessed {
                session_id: sid(),
                page: 3,
                regex_matches: 0,
            })
            .unwrap();
        assert!(tracker.maybe_flush().unwrap(), "last page flushes");
    }

    #[test]
    fn test_no_write_when_clean() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 1);
        assert!(!tracker.maybe_flush().unwrap());
    }

    #[test]
    fn test_completion_prunes_phases() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        drive_to_processing(&mut tracker, 1);
        tracker
            .accept(PipelineEvent::FileStarted {
                session_id: sid(),
                file_index: 1,
                name: "a.pdf".to_string(),
                total_pages: 2,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::FileCompleted {
                session_id: sid(),
                file_index: 1,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::MatchingCompleted {
                session_id: sid(),
                matches_found: 9,
                unmatched_count: 1,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::ReportCompleted {
                session_id: sid(),
                records_written: 42,
            })
            .unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.current_phase, Phase::Completed);
        assert_eq!(snap.overall_percentage, 100);
        assert!(snap.phases.is_none());
        // Non-generic completion message names the work done
        assert!(snap.status_message.contains("1 files"));
        assert!(snap.status_message.contains("9 matches"));
        assert!(snap.status_message.contains("42 records"));
    }

    #[test]
    fn test_terminal_session_rejects_events() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        tracker
            .accept(PipelineEvent::PipelineFailed {
                session_id: sid(),
                error_type: "ExtractionError".to_string(),
                message: "corrupt pdf".to_string(),
                file: Some("a.pdf".to_string()),
                page: Some(4),
                traceback: None,
            })
            .unwrap();

        let result = tracker.accept(PipelineEvent::UploadStarted { session_id: sid() });
        assert!(matches!(result, Err(TrackerError::Terminal(_))));
    }

    #[test]
    fn test_failure_freezes_progress_and_captures_context() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        drive_to_processing(&mut tracker, 2);
        tracker
            .accept(PipelineEvent::FileStarted {
                session_id: sid(),
                file_index: 1,
                name: "a.pdf".to_string(),
                total_pages: 10,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::PageProcessed {
                session_id: sid(),
                page: 5,
                regex_matches: 0,
            })
            .unwrap();
        let before = tracker.snapshot().overall_percentage;

        tracker
            .accept(PipelineEvent::PipelineFailed {
                session_id: sid(),
                error_type: "ExtractionError".to_string(),
                message: "corrupt page".to_string(),
                file: Some("a.pdf".to_string()),
                page: Some(5),
                traceback: Some("Traceback ...".to_string()),
            })
            .unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.current_phase, Phase::Failed);
        assert_eq!(snap.overall_percentage, before, "progress frozen at last-known value");

        let error = snap.error.as_ref().unwrap();
        assert_eq!(error.error_type, "ExtractionError");
        assert_eq!(error.context["file"], "a.pdf");
        assert_eq!(error.context["page"], 5);
        assert_eq!(error.context["phase"], "processing");
        assert!(error.traceback.is_some());

        let phases = snap.phases.as_ref().unwrap();
        assert_eq!(phases.get("processing").unwrap().status, PhaseStatus::Failed);
    }

    #[test]
    fn test_wrong_session_rejected() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        let result = tracker.accept(PipelineEvent::UploadStarted {
            session_id: "other".to_string(),
        });
        assert!(matches!(result, Err(TrackerError::WrongSession { .. })));
    }

    #[test]
    fn test_skipped_phase_completes_at_100() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        drive_to_processing(&mut tracker, 1);
        tracker
            .accept(PipelineEvent::PhaseSkipped {
                session_id: sid(),
                phase: Phase::Matching,
            })
            .unwrap();

        let phases = tracker.snapshot().phases.as_ref().unwrap();
        let matching = phases.get("matching").unwrap();
        assert_eq!(matching.status, PhaseStatus::Completed);
        assert_eq!(matching.percentage, 100);
    }

    #[test]
    fn test_skipping_final_phase_completes_session() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker_with(&temp, 2500);
        drive_to_processing(&mut tracker, 1);
        tracker
            .accept(PipelineEvent::FileStarted {
                session_id: sid(),
                file_index: 1,
                name: "a.pdf".to_string(),
                total_pages: 1,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::FileCompleted {
                session_id: sid(),
                file_index: 1,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::PhaseSkipped {
                session_id: sid(),
                phase: Phase::Matching,
            })
            .unwrap();
        tracker
            .accept(PipelineEvent::PhaseSkipped {
                session_id: sid(),
                phase: Phase::ReportGeneration,
            })
            .unwrap();

        assert_eq!(tracker.snapshot().current_phase, Phase::Completed);
        assert_eq!(tracker.snapshot().overall_percentage, 100);
    }

    #[test]
    fn test_flush_persists_to_store() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SnapStore::open(temp.path()).unwrap());
        let bus = create_snapshot_bus();
        let mut tracker = ProgressTracker::new(
            "sess-1",
            PhaseWeights::default(),
            Duration::from_millis(2500),
            Arc::clone(&store),
            bus,
        );

        tracker
            .accept(PipelineEvent::UploadStarted { session_id: sid() })
            .unwrap();
        tracker.flush().unwrap();

        let stored: SessionSnapshot = store.load("sess-1").unwrap().unwrap();
        assert_eq!(stored.current_phase, Phase::Upload);
    }

    proptest! {
        /// Overall percentage never decreases no matter how page events
        /// interleave across files
        #[test]
        fn prop_overall_is_monotonic(
            pages in proptest::collection::vec(1u32..=20, 1..4),
        ) {
            let temp = TempDir::new().unwrap();
            let mut tracker = tracker_with(&temp, 2500);
            let total_files = pages.len() as u32;
            drive_to_processing(&mut tracker, total_files);

            let mut last = tracker.snapshot().overall_percentage;
            for (i, total_pages) in pages.iter().enumerate() {
                tracker.accept(PipelineEvent::FileStarted {
                    session_id: sid(),
                    file_index: (i + 1) as u32,
                    name: format!("f{i}.pdf"),
                    total_pages: *total_pages,
                }).unwrap();
                for page in 1..=*total_pages {
                    tracker.accept(PipelineEvent::PageProcessed {
                        session_id: sid(),
                        page,
                        regex_matches: 0,
                    }).unwrap();
                    let now = tracker.snapshot().overall_percentage;
                    prop_assert!(now >= last, "overall went backwards: {} -> {}", last, now);
                    last = now;
                }
                tracker.accept(PipelineEvent::FileCompleted {
                    session_id: sid(),
                    file_index: (i + 1) as u32,
                }).unwrap();
                let now = tracker.snapshot().overall_percentage;
                prop_assert!(now >= last);
                last = now;
            }
        }
    }
}
