use super::*;

fn event(filename: &str, status: FileStatus, percent: f64) -> UploadProgress {
    UploadProgress {
        status,
        filename: filename.to_owned(),
        progress_percent: percent,
        file_id: None,
        current_file: None,
        total_files: None,
        error: None,
    }
}

fn batch(names: &[&str]) -> UploadState {
    let mut state = UploadState::default();
    state.start_batch(names.iter().copied());
    state
}

#[test]
fn start_batch_creates_waiting_records_in_input_order() {
    let mut state = batch(&["a.pdf", "b.pdf"]);
    state.error = Some("old".to_owned());
    state.start_batch(["c.pdf", "d.pdf", "e.pdf"]);

    let names: Vec<&str> = state.files.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, ["c.pdf", "d.pdf", "e.pdf"]);
    assert!(state.files.iter().all(|r| r.status == FileStatus::Waiting && r.progress == 0.0));
    assert!(state.is_uploading);
    assert!(!state.is_all_uploaded);
    assert_eq!(state.error, None);
}

#[test]
fn repeated_filenames_share_one_record_at_first_position() {
    let mut state = batch(&["a.pdf", "b.pdf", "a.pdf"]);

    let names: Vec<&str> = state.files.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, ["a.pdf", "b.pdf"]);

    state.apply_progress(&event("b.pdf", FileStatus::Complete, 100.0));
    state.apply_progress(&event("a.pdf", FileStatus::Complete, 100.0));
    assert!(state.batch_complete(false));
}

#[test]
fn progress_never_decreases_before_terminal() {
    let mut state = batch(&["a.pdf"]);

    assert!(state.apply_progress(&event("a.pdf", FileStatus::Uploading, 60.0)));
    assert!(state.apply_progress(&event("a.pdf", FileStatus::Analyzing, 20.0)));

    let record = state.record("a.pdf").unwrap();
    assert_eq!(record.status, FileStatus::Analyzing);
    assert_eq!(record.progress, 60.0);
}

#[test]
fn terminal_records_ignore_later_events() {
    let mut state = batch(&["a.pdf"]);
    state.apply_progress(&event("a.pdf", FileStatus::Exists, 0.0));

    assert!(!state.apply_progress(&event("a.pdf", FileStatus::Uploading, 10.0)));
    let record = state.record("a.pdf").unwrap();
    assert_eq!(record.status, FileStatus::Exists);
    assert_eq!(record.progress, 100.0);
}

#[test]
fn unknown_filename_is_ignored() {
    let mut state = batch(&["a.pdf"]);
    assert!(!state.apply_progress(&event("zzz.pdf", FileStatus::Complete, 100.0)));
    assert_eq!(state.terminal_count(), 0);
}

#[test]
fn error_event_records_message() {
    let mut state = batch(&["a.pdf"]);
    let mut failed = event("a.pdf", FileStatus::Error, 30.0);
    failed.error = Some("corrupt pdf".to_owned());
    state.apply_progress(&failed);

    assert_eq!(state.record("a.pdf").unwrap().error.as_deref(), Some("corrupt pdf"));
    assert_eq!(state.failed_count(), 1);
}

#[test]
fn completion_when_all_terminal_out_of_order() {
    let mut state = batch(&["a.pdf", "b.pdf", "c.pdf"]);

    state.apply_progress(&event("b.pdf", FileStatus::Complete, 100.0));
    assert!(!state.batch_complete(false));
    state.apply_progress(&event("a.pdf", FileStatus::Error, 10.0));
    assert!(!state.batch_complete(false));
    state.apply_progress(&event("c.pdf", FileStatus::Exists, 0.0));
    assert!(state.batch_complete(false));
}

#[test]
fn last_file_shortcut_completes_early() {
    let mut state = batch(&["a.pdf", "b.pdf", "c.pdf"]);
    state.apply_progress(&event("a.pdf", FileStatus::Uploading, 40.0));

    state.apply_progress(&event("c.pdf", FileStatus::Complete, 100.0));

    assert!(state.batch_complete(true));
    assert!(!state.batch_complete(false));
}

#[test]
fn empty_batch_is_never_complete() {
    assert!(!UploadState::default().batch_complete(true));
}

#[test]
fn force_complete_only_touches_stalled_records() {
    let mut state = batch(&["a.pdf", "b.pdf", "c.pdf", "d.pdf"]);
    state.apply_progress(&event("a.pdf", FileStatus::Analyzing, 85.0));
    state.apply_progress(&event("b.pdf", FileStatus::Uploading, 80.0));
    state.apply_progress(&event("c.pdf", FileStatus::Error, 95.0));

    assert_eq!(state.force_complete_stalled(), 1);

    let a = state.record("a.pdf").unwrap();
    assert_eq!((a.status, a.progress), (FileStatus::Complete, 100.0));
    assert_eq!(state.record("b.pdf").unwrap().status, FileStatus::Uploading);
    assert_eq!(state.record("c.pdf").unwrap().status, FileStatus::Error);
    assert_eq!(state.record("d.pdf").unwrap().status, FileStatus::Waiting);
}
