use super::*;

#[test]
fn status_parse_ignores_case_and_whitespace() {
    assert_eq!(Status::parse("complete"), Status::Complete);
    assert_eq!(Status::parse("Completed"), Status::Completed);
    assert_eq!(Status::parse(" IN_PROGRESS "), Status::InProgress);
    assert_eq!(Status::parse("teleporting"), Status::Unknown);
}

#[test]
fn status_as_str_matches_parse() {
    for status in [
        Status::Waiting,
        Status::Processing,
        Status::Uploading,
        Status::Uploaded,
        Status::Analyzing,
        Status::Complete,
        Status::Exists,
        Status::Error,
        Status::InProgress,
        Status::Completed,
        Status::Progress,
    ] {
        assert_eq!(Status::parse(status.as_str()), status);
    }
}

#[test]
fn envelope_prefers_status_then_type_then_action() {
    let env = Envelope::parse(r#"{"status":"uploading","type":"error"}"#).expect("parse");
    assert_eq!(env.status, Status::Uploading);

    let env = Envelope::parse(r#"{"type":"exists"}"#).expect("parse");
    assert_eq!(env.status, Status::Exists);

    let env = Envelope::parse(r#"{"action":"progress","filename":"a.pdf"}"#).expect("parse");
    assert_eq!(env.status, Status::Progress);

    let env = Envelope::parse(r#"{"hello":"world"}"#).expect("parse");
    assert_eq!(env.status, Status::Unknown);
}

#[test]
fn envelope_rejects_malformed_and_non_object_json() {
    assert!(matches!(Envelope::parse("{not json"), Err(WireError::Json(_))));
    assert!(matches!(Envelope::parse("[1,2,3]"), Err(WireError::NotAnObject)));
}

#[test]
fn upload_progress_parses_optional_fields() {
    let env = Envelope::parse(
        r#"{"status":"uploading","filename":"a.pdf","progress_percent":42.5,"file_id":"f-1","current_file":1,"total_files":2}"#,
    )
    .expect("parse");
    let progress = env.upload_progress().expect("upload progress");
    assert_eq!(progress.status, FileStatus::Uploading);
    assert_eq!(progress.filename, "a.pdf");
    assert!((progress.progress_percent - 42.5).abs() < f64::EPSILON);
    assert_eq!(progress.file_id.as_deref(), Some("f-1"));
    assert_eq!(progress.total_files, Some(2));

    let env = Envelope::parse(r#"{"status":"Exists","filename":"b.pdf"}"#).expect("parse");
    let progress = env.upload_progress().expect("upload progress");
    assert_eq!(progress.status, FileStatus::Exists);
    assert!(progress.progress_percent.abs() < f64::EPSILON);
}

#[test]
fn upload_progress_rejects_chat_status() {
    let env = Envelope::parse(r#"{"status":"in_progress","filename":"a.pdf"}"#).expect("parse");
    assert!(env.upload_progress().is_err());
}

#[test]
fn file_status_terminal_set() {
    assert!(FileStatus::Complete.is_terminal());
    assert!(FileStatus::Exists.is_terminal());
    assert!(FileStatus::Error.is_terminal());
    assert!(!FileStatus::Uploaded.is_terminal());
    assert!(!FileStatus::Analyzing.is_terminal());
    assert!(!FileStatus::Waiting.is_terminal());
}

#[test]
fn chat_progress_detects_completion_by_status_or_step() {
    let env = Envelope::parse(r#"{"status":"in_progress","step":"Completed","content":["a"]}"#).expect("parse");
    let progress = env.chat_progress().expect("chat progress");
    assert_eq!(progress.status, ChatStatus::InProgress);
    assert!(progress.is_completion());

    let env = Envelope::parse(r#"{"status":"completed","message_id":"m-1"}"#).expect("parse");
    assert!(env.chat_progress().expect("chat progress").is_completion());

    let env = Envelope::parse(r#"{"status":"in_progress","step":"retrieving"}"#).expect("parse");
    assert!(!env.chat_progress().expect("chat progress").is_completion());
}

#[test]
fn error_message_prefers_error_then_message() {
    let env = Envelope::parse(r#"{"status":"error","error":"e1","message":"m1"}"#).expect("parse");
    assert_eq!(env.error_message(), Some("e1"));
    let env = Envelope::parse(r#"{"status":"error","message":"m1"}"#).expect("parse");
    assert_eq!(env.error_message(), Some("m1"));
}

#[test]
fn upload_request_counts_files_and_uses_upload_action() {
    let req = UploadRequest::new(
        "user-1",
        vec![UploadFile {
            filename: "a.pdf".to_owned(),
            content: "JVBERi0=".to_owned(),
            content_type: "application/pdf".to_owned(),
        }],
    );
    let json = serde_json::to_value(&req).expect("serialize");
    assert_eq!(json["action"], "upload");
    assert_eq!(json["user_id"], "user-1");
    assert_eq!(json["total_files"], 1);
    assert_eq!(json["files"][0]["content_type"], "application/pdf");
}

#[test]
fn chat_request_omits_missing_conversation_id() {
    let req = ChatRequest {
        content: "hi".to_owned(),
        faiss_index_path: "idx/u1".to_owned(),
        conversation_id: None,
        pdf_ids: vec!["p1".to_owned()],
    };
    let json = serde_json::to_value(&req).expect("serialize");
    assert!(json.get("conversation_id").is_none());

    let req = ChatRequest {
        conversation_id: Some("c-1".to_owned()),
        ..req
    };
    let json = serde_json::to_value(&req).expect("serialize");
    assert_eq!(json["conversation_id"], "c-1");
}

#[test]
fn endpoint_url_maps_http_schemes() {
    assert_eq!(
        endpoint_url("http://127.0.0.1:8000/", "upload", "t0k").expect("url"),
        "ws://127.0.0.1:8000/ws/upload?token=t0k"
    );
    assert_eq!(
        endpoint_url("https://api.example.test", "/chat", "abc").expect("url"),
        "wss://api.example.test/ws/chat?token=abc"
    );
    assert_eq!(
        endpoint_url("wss://api.example.test", "chat", "abc").expect("url"),
        "wss://api.example.test/ws/chat?token=abc"
    );
}

#[test]
fn endpoint_url_rejects_unknown_scheme() {
    let err = endpoint_url("ftp://example.test", "upload", "t").expect_err("should fail");
    assert!(matches!(err, WireError::InvalidBaseUrl(_)));
}
