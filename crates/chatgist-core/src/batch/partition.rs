//! Slices an ordered message list into contiguous batches.
//!
//! Size is approximated in characters of the JSON form the model receives,
//! against `context_window * (1 - drift/100) * chars_per_token`. Token
//! counting is deliberately approximate; drift absorbs the error.

use std::ops::Range;

use chatgist_types::chat::Message;
use chatgist_types::config::BatchingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBudget {
    pub context_window: usize,
    pub drift_percent: usize,
    pub chars_per_token: usize,
    pub max_messages: usize,
}

impl BatchBudget {
    pub fn from_config(config: &BatchingConfig) -> Self {
        Self {
            context_window: config.context_window,
            drift_percent: config.drift_percent,
            chars_per_token: config.chars_per_token,
            max_messages: config.messages_per_batch,
        }
    }

    /// Character budget for one batch.
    pub fn limit_chars(&self) -> usize {
        let drift = self.context_window * self.drift_percent.min(100) / 100;
        (self.context_window - drift).saturating_mul(self.chars_per_token)
    }
}

/// Serialized size of one message in characters.
pub fn message_weight(message: &Message) -> usize {
    match serde_json::to_string(message) {
        Ok(json) => json.chars().count(),
        Err(_) => message.text.chars().count(),
    }
}

/// Iterator over `[from, to)` batch ranges.
///
/// Ranges are contiguous, cover every message exactly once, and each holds
/// at least one message even when that message alone exceeds the budget.
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    messages: &'a [Message],
    limit: usize,
    max_messages: usize,
    from: usize,
}

impl<'a> Batches<'a> {
    pub fn new(messages: &'a [Message], budget: &BatchBudget) -> Self {
        Self {
            messages,
            limit: budget.limit_chars(),
            max_messages: budget.max_messages.max(1),
            from: 0,
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.from;
        if from >= self.messages.len() {
            return None;
        }

        let mut size = 0usize;
        let mut to = from;
        while to < self.messages.len() && to - from < self.max_messages {
            let weight = message_weight(&self.messages[to]);
            if to > from && size + weight >= self.limit {
                break;
            }
            size += weight;
            to += 1;
        }

        if size >= self.limit {
            tracing::warn!(
                message_id = self.messages[from].id,
                size,
                limit = self.limit,
                "Single message exceeds batch budget"
            );
        }

        self.from = to;
        Some(from..to)
    }
}

/// All batch ranges for `messages` under `budget`.
pub fn partition(messages: &[Message], budget: &BatchBudget) -> Vec<Range<usize>> {
    Batches::new(messages, budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, text: &str) -> Message {
        Message {
            id,
            timestamp: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            text: text.to_string(),
            sender_id: 1,
            reply_to_msg_id: None,
            is_edited: false,
            is_forwarded: false,
        }
    }

    fn budget(window: usize, max_messages: usize) -> BatchBudget {
        BatchBudget {
            context_window: window,
            drift_percent: 20,
            chars_per_token: 3,
            max_messages,
        }
    }

    fn assert_contiguous(ranges: &[Range<usize>], len: usize) {
        let mut expected = 0;
        for range in ranges {
            assert_eq!(range.start, expected);
            assert!(range.end > range.start, "empty batch {range:?}");
            expected = range.end;
        }
        assert_eq!(expected, len);
    }

    #[test]
    fn limit_applies_drift_then_ratio() {
        assert_eq!(budget(1_000, 10).limit_chars(), 2_400);
        let no_drift = BatchBudget {
            drift_percent: 0,
            ..budget(1_000, 10)
        };
        assert_eq!(no_drift.limit_chars(), 3_000);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(partition(&[], &budget(1_000, 10)).is_empty());
    }

    #[test]
    fn message_cap_splits_250_into_100_100_50() {
        let messages: Vec<_> = (1..=250).map(|i| message(i, "hi")).collect();
        let ranges = partition(&messages, &budget(1_000_000, 100));
        assert_eq!(ranges, vec![0..100, 100..200, 200..250]);
    }

    #[test]
    fn size_budget_is_respected() {
        let messages: Vec<_> = (1..=40)
            .map(|i| message(i, &"x".repeat((i as usize * 37) % 300 + 1)))
            .collect();
        let b = budget(400, 1_000);
        let ranges = partition(&messages, &b);

        assert_contiguous(&ranges, messages.len());
        for range in &ranges {
            let size: usize = messages[range.clone()].iter().map(message_weight).sum();
            assert!(
                range.len() == 1 || size < b.limit_chars(),
                "batch {range:?} weighs {size}"
            );
        }
    }

    #[test]
    fn oversized_message_gets_its_own_batch() {
        let messages = vec![
            message(1, "small"),
            message(2, &"y".repeat(10_000)),
            message(3, "small"),
        ];
        let ranges = partition(&messages, &budget(100, 50));
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn iterator_is_restartable_from_any_suffix() {
        let messages: Vec<_> = (1..=30).map(|i| message(i, "hello there")).collect();
        let b = budget(1_000_000, 7);
        let all = partition(&messages, &b);
        let tail = partition(&messages[all[1].start..], &b);
        assert_eq!(tail.len(), all.len() - 1);
        assert_eq!(tail[0].len(), all[1].len());
    }

    #[test]
    fn weight_counts_characters_not_bytes() {
        let ascii = message(1, "aaaa");
        let cyrillic = message(1, "аааа");
        assert_eq!(message_weight(&ascii), message_weight(&cyrillic));
    }
}
