use nexus_messages::{FetchOutcome, SkipReason};
use nexus_types::MessageWithAvatar;

/// `[HH:MM:SS] username: content`, with markers for pending and edited
/// messages and one indented line per attachment.
pub fn message_line(message: &MessageWithAvatar) -> String {
    let mut line = format!(
        "[{}] {}: {}",
        message.posted_at.format("%H:%M:%S"),
        message.username,
        message.content
    );
    if message.edited {
        line.push_str(" (edited)");
    }
    if message.pending {
        line.push_str(" …");
    }
    for url in &message.attachment_urls {
        line.push_str("\n    ");
        line.push_str(url);
    }
    line
}

/// The store keeps newest first; a terminal reads top to bottom.
pub fn transcript(messages: &[MessageWithAvatar]) -> String {
    messages
        .iter()
        .rev()
        .map(message_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whole list after a page fetch, then the fetch status.
pub fn page_view(messages: &[MessageWithAvatar], outcome: &FetchOutcome) -> String {
    if messages.is_empty() {
        return fetch_status(outcome);
    }
    format!("{}\n{}", transcript(messages), fetch_status(outcome))
}

pub fn fetch_status(outcome: &FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Applied { received } => format!("-- {} messages loaded --", received),
        FetchOutcome::Stale => "-- superseded by a newer request --".into(),
        FetchOutcome::Skipped(SkipReason::Exhausted) => "-- no older messages --".into(),
        FetchOutcome::Skipped(SkipReason::AlreadyLoading) => "-- still loading --".into(),
        FetchOutcome::Skipped(SkipReason::NoChannel) => "-- no channel open --".into(),
        FetchOutcome::Skipped(SkipReason::AlreadyOpen) => "-- channel already open --".into(),
        FetchOutcome::Failed(error) => format!("-- failed to load messages: {} --", error),
    }
}
