use chrono::NaiveDateTime;

/// One overlay message anchored to a playback offset
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMessage {
    pub content_id: String,
    /// Playback offset in seconds
    pub offset_secs: f64,
    pub text: String,
    pub sent_at: Option<NaiveDateTime>,
}

/// An overlay message with its per-second presentation columns
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedOverlay {
    pub message: OverlayMessage,
    /// Whole playback second the message falls into
    pub second: u64,
    /// Number of messages sharing that second
    pub second_count: usize,
    /// True for the earliest message of its second
    pub first_in_second: bool,
}

/// Renders a whole-second offset as `H:MM:SS`
pub fn format_hms(second: u64) -> String {
    let hours = second / 3600;
    let minutes = (second % 3600) / 60;
    let seconds = second % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Orders messages by offset and derives the per-second columns
///
/// Sorting is stable, so messages with identical offsets keep their
/// original order.
pub fn annotate_overlays(mut messages: Vec<OverlayMessage>) -> Vec<AnnotatedOverlay> {
    messages.sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));

    let seconds: Vec<u64> = messages
        .iter()
        .map(|m| m.offset_secs.max(0.0).floor() as u64)
        .collect();

    let mut annotated = Vec::with_capacity(messages.len());
    let mut start = 0;
    while start < messages.len() {
        let second = seconds[start];
        let end = seconds[start..]
            .iter()
            .position(|s| *s != second)
            .map(|p| start + p)
            .unwrap_or(messages.len());
        let count = end - start;
        for (i, message) in messages[start..end].iter().enumerate() {
            annotated.push(AnnotatedOverlay {
                message: message.clone(),
                second,
                second_count: count,
                first_in_second: i == 0,
            });
        }
        start = end;
    }

    annotated
}
