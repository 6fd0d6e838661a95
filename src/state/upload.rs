//! Per-file progress records for one upload batch.

use wire::{FileStatus, UploadProgress};

use super::SessionPhase;

/// Files above this percentage are force-completed by the safety timeout.
pub const STALLED_PROGRESS_THRESHOLD: f64 = 80.0;

#[derive(Clone, Debug, PartialEq)]
pub struct FileTransferRecord {
    pub filename: String,
    pub status: FileStatus,
    /// 0–100, never decreases until the record is terminal.
    pub progress: f64,
    pub file_id: Option<String>,
    pub error: Option<String>,
}

impl FileTransferRecord {
    #[must_use]
    pub fn waiting(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Waiting,
            progress: 0.0,
            file_id: None,
            error: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadState {
    pub phase: SessionPhase,
    /// Records of the current batch in input order.
    pub files: Vec<FileTransferRecord>,
    pub is_uploading: bool,
    pub is_all_uploaded: bool,
    pub error: Option<String>,
}

impl UploadState {
    /// Replace the previous batch with `waiting/0` records, one per distinct
    /// filename, kept at its first position.
    pub fn start_batch<I, S>(&mut self, filenames: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.clear();
        for filename in filenames {
            let filename = filename.into();
            if self.record(&filename).is_none() {
                self.files.push(FileTransferRecord::waiting(filename));
            }
        }
        self.is_uploading = true;
        self.is_all_uploaded = false;
        self.error = None;
    }

    /// Apply one progress event. Returns `false` when it changed nothing
    /// (unknown filename, or the record is already terminal).
    pub fn apply_progress(&mut self, progress: &UploadProgress) -> bool {
        let Some(record) = self.files.iter_mut().find(|r| r.filename == progress.filename) else {
            return false;
        };
        if record.is_terminal() {
            return false;
        }

        let reported = progress.progress_percent.clamp(0.0, 100.0);
        record.status = progress.status;
        record.progress = match progress.status {
            FileStatus::Complete | FileStatus::Exists => 100.0,
            _ => record.progress.max(reported),
        };
        if progress.file_id.is_some() {
            record.file_id.clone_from(&progress.file_id);
        }
        if progress.status == FileStatus::Error {
            record.error = Some(progress.error.clone().unwrap_or_else(|| "upload failed".to_owned()));
        }
        true
    }

    /// Whether the batch is done: every record terminal or, with the
    /// shortcut enabled, the last record in input order terminal.
    #[must_use]
    pub fn batch_complete(&self, last_file_shortcut: bool) -> bool {
        let Some(last) = self.files.last() else {
            return false;
        };
        (last_file_shortcut && last.is_terminal()) || self.files.iter().all(FileTransferRecord::is_terminal)
    }

    /// Force stalled records (above the threshold, not terminal) to
    /// `complete/100`. Returns how many were changed.
    pub fn force_complete_stalled(&mut self) -> usize {
        let mut forced = 0;
        for record in &mut self.files {
            if !record.is_terminal() && record.progress > STALLED_PROGRESS_THRESHOLD {
                record.status = FileStatus::Complete;
                record.progress = 100.0;
                forced += 1;
            }
        }
        forced
    }

    /// Mark the batch finished.
    pub fn finish(&mut self) {
        self.is_uploading = false;
        self.is_all_uploaded = true;
    }

    /// Abort the batch with a user-facing error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.is_uploading = false;
        self.error = Some(message.into());
    }

    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.files.iter().filter(|r| r.is_terminal()).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|r| r.status == FileStatus::Error)
            .count()
    }

    #[must_use]
    pub fn record(&self, filename: &str) -> Option<&FileTransferRecord> {
        self.files.iter().find(|r| r.filename == filename)
    }
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
