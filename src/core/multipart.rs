//! Multipart coordination state
//!
//! One [`MultipartUpload`] or [`MultipartDownload`] is shared by every task of
//! a single multipart operation. All part results and the completion/abort
//! decision pass through its lock, which is what makes the abort exactly-once:
//! the decision is only handed out when the operation has failed and no part
//! call is still running, and once it has been handed out no new part call
//! may start.
//!
//! Parts are handed out through [`PartCursor`] a few at a time rather than
//! all at once, so a large transfer never floods the task queue.

use crate::storage::CompletedPart;
use std::collections::BTreeMap;
use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle of a multipart upload or copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartPhase {
    NotStarted,
    Creating,
    CreateFailed,
    PartsInFlight,
    Completing,
    Completed,
    Aborting,
    Aborted,
    AbortFailed,
}

impl MultipartPhase {
    /// Whether the phase is final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CreateFailed | Self::Completed | Self::Aborted | Self::AbortFailed
        )
    }
}

/// What the caller must schedule next after reporting to a [`MultipartUpload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    /// Nothing to schedule
    Wait,
    /// Every part succeeded: schedule CompleteMultipartUpload
    Complete,
    /// The operation failed and no part call is running: schedule AbortMultipartUpload
    Abort,
}

/// Hands out the parts of a multipart operation for scheduling
pub trait PartCursor {
    /// Split size of the operation
    fn chunksize(&self) -> u64;

    /// Claim the zero-based index of the next part to queue, if any is left
    /// and the operation has not failed
    fn next_part(&self) -> Option<u32>;

    /// Give back a claimed part the queue had no room for.
    ///
    /// Returns false, keeping the claim, when no other part of the operation
    /// is queued or running. The caller must then queue the part anyway.
    fn defer_part(&self, index: u32) -> bool;
}

/// Per-part bookkeeping shared by uploads and downloads
#[derive(Debug)]
struct PartProgress {
    total: u32,
    succeeded: u32,
    in_flight: u32,
    failed: bool,
    first_error: Option<String>,
    finish_claimed: bool,
    next: u32,
    deferred: Vec<u32>,
    /// Claimed parts that have not finished (queued or running)
    outstanding: u32,
}

impl PartProgress {
    fn new(total: u32) -> Self {
        Self {
            total,
            succeeded: 0,
            in_flight: 0,
            failed: false,
            first_error: None,
            finish_claimed: false,
            next: 0,
            deferred: Vec::new(),
            outstanding: 0,
        }
    }

    fn claim(&mut self) -> Option<u32> {
        if self.failed || self.finish_claimed {
            return None;
        }
        let index = match self.deferred.pop() {
            Some(index) => index,
            None if self.next < self.total => {
                self.next += 1;
                self.next - 1
            }
            None => return None,
        };
        self.outstanding += 1;
        Some(index)
    }

    fn defer(&mut self, index: u32) -> bool {
        if self.outstanding <= 1 {
            return false;
        }
        self.outstanding -= 1;
        self.deferred.push(index);
        true
    }

    fn begin(&mut self) -> bool {
        if self.failed || self.finish_claimed {
            return false;
        }
        self.in_flight += 1;
        true
    }

    fn succeed(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.outstanding = self.outstanding.saturating_sub(1);
        self.succeeded += 1;
    }

    fn fail(&mut self, reason: String, began: bool) {
        if began {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
        self.outstanding = self.outstanding.saturating_sub(1);
        if !self.failed {
            self.failed = true;
            self.first_error = Some(reason);
        }
    }

    /// Claim the right to finish the operation. At most one caller ever gets `true`.
    fn claim_finish(&mut self) -> bool {
        if self.finish_claimed {
            return false;
        }
        let done = if self.failed {
            self.in_flight == 0
        } else {
            self.succeeded == self.total
        };
        if done {
            self.finish_claimed = true;
        }
        done
    }

    fn reason(&self) -> String {
        self.first_error
            .clone()
            .unwrap_or_else(|| "multipart transfer failed".to_string())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct UploadState {
    phase: MultipartPhase,
    upload_id: Option<String>,
    parts: BTreeMap<u32, String>,
    progress: PartProgress,
}

/// Shared state of one multipart upload or multipart copy
#[derive(Debug)]
pub struct MultipartUpload {
    chunksize: u64,
    part_count: u32,
    state: Mutex<UploadState>,
}

impl MultipartUpload {
    /// Create the state for an upload split into `part_count` parts
    pub fn new(part_count: u32, chunksize: u64) -> Self {
        Self {
            chunksize,
            part_count,
            state: Mutex::new(UploadState {
                phase: MultipartPhase::NotStarted,
                upload_id: None,
                parts: BTreeMap::new(),
                progress: PartProgress::new(part_count),
            }),
        }
    }

    /// Number of parts the upload is split into
    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// Current phase
    pub fn phase(&self) -> MultipartPhase {
        lock(&self.state).phase
    }

    /// Upload id, once CreateMultipartUpload succeeded
    pub fn upload_id(&self) -> Option<String> {
        lock(&self.state).upload_id.clone()
    }

    /// Move to `Creating`. Returns false if creation already started.
    pub fn begin_create(&self) -> bool {
        let mut state = lock(&self.state);
        if state.phase != MultipartPhase::NotStarted {
            return false;
        }
        state.phase = MultipartPhase::Creating;
        true
    }

    /// Record the upload id returned by CreateMultipartUpload
    pub fn created(&self, upload_id: String) {
        let mut state = lock(&self.state);
        state.upload_id = Some(upload_id);
        state.phase = MultipartPhase::PartsInFlight;
    }

    /// Record a failed CreateMultipartUpload. There is nothing to abort.
    pub fn create_failed(&self, reason: String) {
        let mut state = lock(&self.state);
        state.phase = MultipartPhase::CreateFailed;
        state.progress.fail(reason, false);
        state.progress.finish_claimed = true;
    }

    /// Register a part call about to start.
    ///
    /// Returns the upload id, or `None` when the part must be skipped because
    /// the upload already failed.
    pub fn begin_part(&self) -> Option<String> {
        let mut state = lock(&self.state);
        if state.phase != MultipartPhase::PartsInFlight || !state.progress.begin() {
            return None;
        }
        state.upload_id.clone()
    }

    /// Record a part's ETag
    pub fn part_succeeded(&self, part_number: u32, e_tag: String) -> UploadStep {
        let mut state = lock(&self.state);
        state.parts.insert(part_number, e_tag);
        state.progress.succeed();
        Self::next_step(&mut state)
    }

    /// Record a failed part call that had been started with [`begin_part`](Self::begin_part)
    pub fn part_failed(&self, reason: String) -> UploadStep {
        let mut state = lock(&self.state);
        state.progress.fail(reason, true);
        Self::next_step(&mut state)
    }

    /// Record a part that could not be scheduled at all
    pub fn schedule_failed(&self, reason: String) -> UploadStep {
        let mut state = lock(&self.state);
        state.progress.fail(reason, false);
        Self::next_step(&mut state)
    }

    fn next_step(state: &mut UploadState) -> UploadStep {
        if !state.progress.claim_finish() {
            return UploadStep::Wait;
        }
        if state.progress.failed {
            state.phase = MultipartPhase::Aborting;
            UploadStep::Abort
        } else {
            state.phase = MultipartPhase::Completing;
            UploadStep::Complete
        }
    }

    /// Upload id and parts sorted by part number, while `Completing`
    pub fn completion(&self) -> Option<(String, Vec<CompletedPart>)> {
        let state = lock(&self.state);
        if state.phase != MultipartPhase::Completing {
            return None;
        }
        let upload_id = state.upload_id.clone()?;
        let parts = state
            .parts
            .iter()
            .map(|(&part_number, e_tag)| CompletedPart {
                part_number,
                e_tag: e_tag.clone(),
            })
            .collect();
        Some((upload_id, parts))
    }

    /// Record a successful CompleteMultipartUpload
    pub fn completed(&self) {
        lock(&self.state).phase = MultipartPhase::Completed;
    }

    /// Record a CompleteMultipartUpload that failed or could not be scheduled
    pub fn complete_failed(&self, reason: String) -> UploadStep {
        let mut state = lock(&self.state);
        if state.phase != MultipartPhase::Completing {
            return UploadStep::Wait;
        }
        state.progress.failed = true;
        state.progress.first_error.get_or_insert(reason);
        state.phase = MultipartPhase::Aborting;
        UploadStep::Abort
    }

    /// Upload id and failure reason, while `Aborting`
    pub fn abort_target(&self) -> Option<(String, String)> {
        let state = lock(&self.state);
        if state.phase != MultipartPhase::Aborting {
            return None;
        }
        Some((state.upload_id.clone()?, state.progress.reason()))
    }

    /// Record the outcome of AbortMultipartUpload
    pub fn abort_finished(&self, aborted: bool) {
        lock(&self.state).phase = if aborted {
            MultipartPhase::Aborted
        } else {
            MultipartPhase::AbortFailed
        };
    }
}

impl PartCursor for MultipartUpload {
    fn chunksize(&self) -> u64 {
        self.chunksize
    }

    fn next_part(&self) -> Option<u32> {
        let mut state = lock(&self.state);
        if state.phase != MultipartPhase::PartsInFlight {
            return None;
        }
        state.progress.claim()
    }

    fn defer_part(&self, index: u32) -> bool {
        lock(&self.state).progress.defer(index)
    }
}

#[derive(Debug)]
struct DownloadState {
    file: Option<Arc<File>>,
    progress: PartProgress,
}

/// Shared state of one multipart download
#[derive(Debug)]
pub struct MultipartDownload {
    chunksize: u64,
    part_count: u32,
    state: Mutex<DownloadState>,
}

impl MultipartDownload {
    /// Create the state for a download split into `part_count` ranges
    pub fn new(part_count: u32, chunksize: u64) -> Self {
        Self {
            chunksize,
            part_count,
            state: Mutex::new(DownloadState {
                file: None,
                progress: PartProgress::new(part_count),
            }),
        }
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// Hand over the opened destination file
    pub fn opened(&self, file: File) {
        lock(&self.state).file = Some(Arc::new(file));
    }

    /// Register a part write about to start, returning the file to write to
    pub fn begin_part(&self) -> Option<Arc<File>> {
        let mut state = lock(&self.state);
        let file = state.file.clone()?;
        state.progress.begin().then_some(file)
    }

    /// Record a written part. Returns true when the caller must schedule CompleteDownload.
    pub fn part_succeeded(&self) -> bool {
        let mut state = lock(&self.state);
        state.progress.succeed();
        state.progress.claim_finish()
    }

    /// Record a failed part. Returns true when the caller must schedule CompleteDownload.
    pub fn part_failed(&self, reason: String, began: bool) -> bool {
        let mut state = lock(&self.state);
        state.progress.fail(reason, began);
        state.progress.claim_finish()
    }

    /// Close the file and report the overall outcome
    pub fn finish(&self) -> Result<(), String> {
        let mut state = lock(&self.state);
        state.file = None;
        if state.progress.failed {
            Err(state.progress.reason())
        } else {
            Ok(())
        }
    }
}

impl PartCursor for MultipartDownload {
    fn chunksize(&self) -> u64 {
        self.chunksize
    }

    fn next_part(&self) -> Option<u32> {
        let mut state = lock(&self.state);
        if state.file.is_none() {
            return None;
        }
        state.progress.claim()
    }

    fn defer_part(&self, index: u32) -> bool {
        lock(&self.state).progress.defer(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn started(parts: u32) -> MultipartUpload {
        let upload = MultipartUpload::new(parts, 5);
        assert!(upload.begin_create());
        upload.created("upload-id".to_string());
        upload
    }

    #[test]
    fn test_all_parts_succeed_in_any_order() {
        let upload = started(3);
        for _ in 0..3 {
            assert!(upload.begin_part().is_some());
        }
        assert_eq!(upload.part_succeeded(3, "c".into()), UploadStep::Wait);
        assert_eq!(upload.part_succeeded(1, "a".into()), UploadStep::Wait);
        assert_eq!(upload.part_succeeded(2, "b".into()), UploadStep::Complete);

        let (upload_id, parts) = upload.completion().unwrap();
        assert_eq!(upload_id, "upload-id");
        let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(parts[0].e_tag, "a");

        upload.completed();
        assert_eq!(upload.phase(), MultipartPhase::Completed);
        assert!(upload.phase().is_terminal());
    }

    #[test]
    fn test_cursor_hands_out_each_part_once() {
        let upload = MultipartUpload::new(3, 5);
        assert_eq!(upload.next_part(), None);
        assert!(upload.begin_create());
        upload.created("upload-id".to_string());

        assert_eq!(upload.next_part(), Some(0));
        assert_eq!(upload.next_part(), Some(1));
        // Part 1 is still outstanding, so part 2 can wait
        assert!(upload.defer_part(1));
        assert_eq!(upload.next_part(), Some(1));
        assert_eq!(upload.next_part(), Some(2));
        assert_eq!(upload.next_part(), None);
    }

    #[test]
    fn test_cursor_keeps_last_outstanding_part() {
        let upload = started(2);
        assert_eq!(upload.next_part(), Some(0));
        assert!(!upload.defer_part(0));

        assert!(upload.begin_part().is_some());
        assert_eq!(upload.part_succeeded(1, "a".into()), UploadStep::Wait);
        assert_eq!(upload.next_part(), Some(1));
        assert!(!upload.defer_part(1));
    }

    #[test]
    fn test_cursor_stops_after_failure() {
        let upload = started(4);
        assert_eq!(upload.next_part(), Some(0));
        assert!(upload.begin_part().is_some());
        assert_eq!(upload.part_failed("reset".into()), UploadStep::Abort);
        assert_eq!(upload.next_part(), None);

        let dir = tempfile::TempDir::new().unwrap();
        let download = MultipartDownload::new(2, 5);
        assert_eq!(download.next_part(), None);
        download.opened(File::create(dir.path().join("out")).unwrap());
        assert_eq!(download.next_part(), Some(0));
        assert!(download.part_failed("reset".into(), false));
        assert_eq!(download.next_part(), None);
    }

    #[test]
    fn test_abort_waits_for_running_parts() {
        let upload = started(3);
        assert!(upload.begin_part().is_some());
        assert!(upload.begin_part().is_some());

        assert_eq!(upload.part_failed("no ETag".into()), UploadStep::Wait);
        // Later parts are refused once the upload failed
        assert!(upload.begin_part().is_none());
        assert_eq!(upload.part_succeeded(2, "b".into()), UploadStep::Abort);

        let (upload_id, reason) = upload.abort_target().unwrap();
        assert_eq!(upload_id, "upload-id");
        assert_eq!(reason, "no ETag");
        assert!(upload.completion().is_none());

        upload.abort_finished(true);
        assert_eq!(upload.phase(), MultipartPhase::Aborted);
    }

    #[test]
    fn test_complete_rejection_drives_abort() {
        let upload = started(1);
        upload.begin_part();
        assert_eq!(upload.part_succeeded(1, "a".into()), UploadStep::Complete);
        assert_eq!(
            upload.complete_failed("rejected".into()),
            UploadStep::Abort
        );
        assert_eq!(upload.complete_failed("again".into()), UploadStep::Wait);
        assert_eq!(upload.abort_target().unwrap().1, "rejected");
    }

    #[test]
    fn test_schedule_failure_without_running_parts() {
        let upload = started(4);
        assert_eq!(upload.schedule_failed("queue full".into()), UploadStep::Abort);
        assert_eq!(upload.schedule_failed("queue full".into()), UploadStep::Wait);
    }

    #[test]
    fn test_create_failure_has_no_abort() {
        let upload = MultipartUpload::new(2, 5);
        assert!(upload.begin_create());
        assert!(!upload.begin_create());
        upload.create_failed("denied".into());
        assert_eq!(upload.phase(), MultipartPhase::CreateFailed);
        assert!(upload.begin_part().is_none());
        assert!(upload.abort_target().is_none());
    }

    #[test]
    fn test_concurrent_failures_abort_once() {
        let upload = Arc::new(started(16));
        let handles: Vec<_> = (1..=16)
            .map(|number| {
                let upload = Arc::clone(&upload);
                thread::spawn(move || match upload.begin_part() {
                    Some(_) if number % 2 == 0 => upload.part_failed(format!("part {}", number)),
                    Some(_) => upload.part_succeeded(number, format!("etag-{}", number)),
                    None => UploadStep::Wait,
                })
            })
            .collect();

        let steps: Vec<UploadStep> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(steps.iter().filter(|s| **s == UploadStep::Abort).count(), 1);
        assert!(!steps.contains(&UploadStep::Complete));
    }

    #[test]
    fn test_download_finish_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = File::create(dir.path().join("out")).unwrap();

        let download = MultipartDownload::new(2, 5);
        assert!(download.begin_part().is_none());
        download.opened(file);

        assert!(download.begin_part().is_some());
        assert!(download.begin_part().is_some());
        assert!(!download.part_failed("reset".into(), true));
        assert!(download.part_succeeded());
        assert!(!download.part_failed("late".into(), false));
        assert_eq!(download.finish(), Err("reset".to_string()));
    }

    #[test]
    fn test_download_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let download = MultipartDownload::new(1, 5);
        download.opened(File::create(dir.path().join("out")).unwrap());
        assert!(download.begin_part().is_some());
        assert!(download.part_succeeded());
        assert_eq!(download.finish(), Ok(()));
    }
}
