use super::*;

fn fragment(status: ChatStatus, content: &[&str]) -> ChatProgress {
    ChatProgress {
        status,
        content: content.iter().map(|s| (*s).to_owned()).collect(),
        ..ChatProgress::default()
    }
}

#[test]
fn fragments_append_and_completion_records_turn() {
    let mut state = ChatState::default();
    state.begin_turn("what is in the report?");

    let mut first = fragment(ChatStatus::InProgress, &["The report "]);
    first.step = Some("generating".to_owned());
    first.conversation_id = Some("c-1".to_owned());
    assert_eq!(state.apply_progress(&first), TurnOutcome::Streaming);
    assert!(state.is_typing);

    let mut last = fragment(ChatStatus::Completed, &["covers Q3."]);
    last.message_id = Some("m-1".to_owned());
    assert_eq!(state.apply_progress(&last), TurnOutcome::Completed);

    assert!(!state.is_typing);
    assert!(!state.turn_running());
    assert_eq!(state.conversation_id.as_deref(), Some("c-1"));
    let record = state.current.as_ref().unwrap();
    assert_eq!(record.step.as_deref(), Some("generating"));
    assert_eq!(record.reply(), "The report covers Q3.");
    assert_eq!(
        state.history,
        vec![ChatTurn {
            prompt: "what is in the report?".to_owned(),
            reply: "The report covers Q3.".to_owned(),
            message_id: Some("m-1".to_owned()),
        }]
    );
}

#[test]
fn completed_step_also_finishes_turn() {
    let mut state = ChatState::default();
    state.begin_turn("hi");
    let mut done = fragment(ChatStatus::InProgress, &["hello"]);
    done.step = Some("Completed".to_owned());

    assert_eq!(state.apply_progress(&done), TurnOutcome::Completed);
}

#[test]
fn error_status_fails_turn_without_history() {
    let mut state = ChatState::default();
    state.begin_turn("hi");
    let mut failed = fragment(ChatStatus::Error, &[]);
    failed.error = Some("model unavailable".to_owned());

    assert_eq!(state.apply_progress(&failed), TurnOutcome::Failed);
    assert_eq!(state.error.as_deref(), Some("model unavailable"));
    assert!(!state.is_typing);
    assert!(state.history.is_empty());
}

#[test]
fn events_without_running_turn_are_ignored() {
    let mut state = ChatState::default();
    assert_eq!(
        state.apply_progress(&fragment(ChatStatus::Completed, &["late"])),
        TurnOutcome::Ignored
    );
    assert!(state.history.is_empty());
}

#[test]
fn next_turn_replaces_record_and_reset_clears_everything() {
    let mut state = ChatState::default();
    state.begin_turn("one");
    state.apply_progress(&fragment(ChatStatus::Completed, &["1"]));
    state.begin_turn("two");

    assert_eq!(state.current, Some(ChatProgressRecord::default()));
    assert_eq!(state.history.len(), 1);

    state.reset_conversation();
    assert_eq!(state, ChatState::default());
}
