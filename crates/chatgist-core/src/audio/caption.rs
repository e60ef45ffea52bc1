//! Captions attached to audio artifacts.

use chatgist_types::chat::BatchGist;
use chrono::{DateTime, Utc};

/// Compact span like `1mo 2d 3h 4m`, `3h 4m` or `12m`. A month is 30 days.
pub fn format_span(span: chrono::Duration) -> String {
    let total_minutes = span.num_minutes().abs();
    let minutes = total_minutes % 60;
    let hours = (total_minutes / 60) % 24;
    let days_total = total_minutes / (60 * 24);
    let months = days_total / 30;
    let days = days_total % 30;

    if months > 0 {
        format!("{months}mo {days}d {hours}h {minutes}m")
    } else if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn format_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn with_part(caption: String, part: Option<usize>) -> String {
    match part {
        Some(n) => format!("{caption}\npart {n}"),
        None => caption,
    }
}

/// Caption for one batch artifact; `part` is 1-based when the artifact was
/// split.
pub fn batch_caption(title: &str, gist: &BatchGist, part: Option<usize>) -> String {
    let span = format_span(gist.last_message_time - gist.first_message_time);
    let caption = format!(
        "{title} ({span})\nfrom {}",
        format_date(gist.first_message_time)
    );
    with_part(caption, part)
}

/// Caption for the whole-chat artifact.
pub fn chat_caption(title: &str, gists: &[BatchGist], part: Option<usize>) -> String {
    let (Some(first), Some(last)) = (gists.first(), gists.last()) else {
        return with_part(format!("{title}\nFull digest"), part);
    };
    let span = format_span(last.last_message_time - first.first_message_time);
    let caption = format!(
        "{title} ({span})\nFull digest from {}",
        format_date(first.first_message_time)
    );
    with_part(caption, part)
}
