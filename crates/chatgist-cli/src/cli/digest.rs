//! `chatgist digest`: summarize a chat, optionally render audio and mark it read.

use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use chatgist_core::context::OperationContext;
use chatgist_types::chat::{AudioGist, BatchGist, ChatId, MessageId};
use chatgist_types::error::GistError;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestOptions {
    pub chat_id: ChatId,
    pub audio: Option<usize>,
    pub mark_read: Option<usize>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Serialize)]
struct DigestReport {
    chat_id: ChatId,
    title: String,
    gists: Vec<BatchGist>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<Vec<AudioGist>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    read: Option<ReadReport>,
}

#[derive(Debug, Serialize)]
struct ReadReport {
    last_read_message_id: MessageId,
    unread_count: u32,
    remaining_batches: usize,
}

pub async fn digest(state: &AppState, opts: DigestOptions, ctx: &OperationContext) -> Result<()> {
    let chat = state.service.chat_detail(opts.chat_id, ctx).await?;

    let bar = progress_bar(opts.json || opts.quiet);
    let sink = |message: &str, percent: u8| {
        bar.set_message(message.to_string());
        bar.set_position(u64::from(percent));
    };
    let result = state.service.chat_gist(opts.chat_id, &sink, ctx).await;
    bar.finish_and_clear();

    let gists = match result {
        Ok(gists) => gists,
        Err(err) => {
            let done = err.completed_batches();
            if !done.is_empty() && !opts.json {
                print_gists(&chat.title, done);
                println!("  {} {}", style("!").yellow().bold(), stopped_notice(done.len()));
            }
            return Err(describe(err)).context("summarization failed");
        }
    };

    let mut report = DigestReport {
        chat_id: chat.id,
        title: chat.title.clone(),
        gists,
        audio: None,
        read: None,
    };
    if !opts.json {
        print_gists(&report.title, &report.gists);
    }

    if let Some(batch) = opts.audio {
        let spinner = spinner(opts.json || opts.quiet, "Rendering audio...");
        let audio = state.service.audio_gist(opts.chat_id, batch, ctx).await;
        spinner.finish_and_clear();
        let audio = audio.map_err(describe).context("audio rendering failed")?;
        if !opts.json {
            print_audio(&audio);
        }
        report.audio = Some(audio);
    }

    if let Some(page) = opts.mark_read {
        let chat = state
            .service
            .mark_as_read(opts.chat_id, page, ctx)
            .await
            .map_err(describe)
            .context("marking read failed")?;
        if !opts.json {
            println!(
                "  {} Marked read up to message {} ({} unread left)",
                style("✓").green().bold(),
                chat.last_read_message_id,
                chat.unread_count
            );
            println!();
        }
        report.read = Some(ReadReport {
            last_read_message_id: chat.last_read_message_id,
            unread_count: chat.unread_count,
            remaining_batches: chat.gist.len(),
        });
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Attach a hint to the errors a user can act on.
fn describe(err: GistError) -> anyhow::Error {
    let hint = match err.root() {
        GistError::QuotaExceeded { .. } => {
            Some("every configured Gemini key is out of quota; add keys or wait")
        }
        GistError::Cancelled { .. } => Some("interrupted"),
        GistError::EmptyGist => Some("nothing to render; the chat has no unread text messages"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.cyan} {msg:<12} [{bar:30.cyan/blue}] {pos:>3}%")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message("Fetching");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn spinner(hidden: bool, message: &'static str) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

fn print_gists(title: &str, gists: &[BatchGist]) {
    println!();
    if gists.is_empty() {
        println!(
            "  {} Nothing unread in {}",
            style("i").blue().bold(),
            style(title).cyan()
        );
        println!();
        return;
    }
    println!("  {}", style(title).cyan().bold());
    println!();
    for (i, gist) in gists.iter().enumerate() {
        println!("  {}", style(batch_heading(i + 1, gists.len(), gist)).bold());
        println!();
        for line in gist.gist_text.lines() {
            println!("    {line}");
        }
        println!();
    }
}

fn print_audio(audio: &[AudioGist]) {
    for part in audio {
        println!(
            "  {} {}",
            style("♪").magenta().bold(),
            style(part.artifact_path.display()).dim()
        );
        for line in part.caption.lines() {
            println!("    {line}");
        }
    }
    println!();
}

/// Gists live only as long as the process, so nothing carries over to a new run.
fn stopped_notice(done: usize) -> String {
    format!(
        "Stopped after {done} batches; these are not kept, so the next run summarizes the chat from the start."
    )
}

fn batch_heading(index: usize, total: usize, gist: &BatchGist) -> String {
    format!(
        "Batch {index}/{total} · {} messages · {} → {}",
        gist.message_count,
        gist.first_message_time.format("%Y-%m-%d %H:%M"),
        gist.last_message_time.format("%Y-%m-%d %H:%M"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn stopped_notice_does_not_promise_resume() {
        let notice = stopped_notice(2);
        assert!(notice.starts_with("Stopped after 2 batches"));
        assert!(notice.contains("from the start"));
        assert!(!notice.contains("continue"));
    }

    #[test]
    fn heading_shows_count_and_span() {
        let gist = BatchGist {
            first_message_time: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            last_message_id: 120,
            last_message_time: Utc.with_ymd_and_hms(2024, 5, 2, 18, 30, 0).unwrap(),
            message_count: 120,
            gist_text: String::new(),
            audio: Vec::new(),
        };
        assert_eq!(
            batch_heading(1, 3, &gist),
            "Batch 1/3 · 120 messages · 2024-05-01 09:00 → 2024-05-02 18:30"
        );
    }

    #[test]
    fn quota_errors_get_a_hint() {
        let err = describe(GistError::QuotaExceeded { pool_size: 2 });
        assert!(err.to_string().contains("out of quota"));
        assert!(err.downcast_ref::<GistError>().is_some());
    }

    #[test]
    fn other_errors_pass_through() {
        let err = describe(GistError::ChatNotFound(5));
        assert_eq!(err.to_string(), "chat 5 not found");
    }
}
