//! Two-tier classification of transcript lines.
//!
//! Every line goes through cheap pattern checks that pull out the timestamp
//! and the user-turn flags. Only lines that mention a usage block or a tool
//! result are decoded as JSON, which keeps the per-line cost low on
//! transcripts where most records carry neither.

use memchr::memmem;
use regex_lite::Regex;
use serde_json::Value;

use crate::cache::{TokenUsage, lenient_u64};

const CHARS_PER_TOKEN: u64 = 4;

/// Signals extracted from one transcript line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineSignals {
    pub timestamp: Option<String>,
    pub is_turn: bool,
    /// Main-chain, non-error usage snapshot carried by this line.
    pub usage: Option<TokenUsage>,
    /// Net tokens of tool or sub-agent work; zero when not positive.
    pub agent_contribution: u64,
    /// The line needed a full decode and was not valid JSON.
    pub malformed: bool,
}

pub struct LineClassifier {
    timestamp: Regex,
    user_type: Regex,
    is_meta: Regex,
    is_sidechain: Regex,
    usage_key: memmem::Finder<'static>,
    tool_result_key: memmem::Finder<'static>,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self {
            timestamp: pattern(r#""timestamp"\s*:\s*"([^"]+)""#),
            user_type: pattern(r#""type"\s*:\s*"user""#),
            is_meta: pattern(r#""isMeta"\s*:\s*true"#),
            is_sidechain: pattern(r#""isSidechain"\s*:\s*true"#),
            usage_key: memmem::Finder::new(b"\"usage\""),
            tool_result_key: memmem::Finder::new(b"\"toolUseResult\""),
        }
    }

    pub fn needs_full_parse(&self, line: &[u8]) -> bool {
        self.usage_key.find(line).is_some() || self.tool_result_key.find(line).is_some()
    }

    pub fn classify(&self, raw: &[u8]) -> LineSignals {
        let line = String::from_utf8_lossy(raw);

        let mut signals = LineSignals {
            timestamp: self
                .timestamp
                .captures(&line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            is_turn: self.user_type.is_match(&line)
                && !self.is_meta.is_match(&line)
                && !self.is_sidechain.is_match(&line),
            ..LineSignals::default()
        };

        if !self.needs_full_parse(raw) {
            return signals;
        }

        let entry = match serde_json::from_str::<Value>(&line) {
            Ok(entry) => entry,
            Err(_) => {
                signals.malformed = true;
                return signals;
            }
        };

        signals.usage = main_chain_usage(&entry);
        if let Some(result) = entry.get("toolUseResult") {
            signals.agent_contribution = tool_result_contribution(result);
        }
        signals
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("transcript pattern must compile")
}

fn main_chain_usage(entry: &Value) -> Option<TokenUsage> {
    let usage = entry.get("message")?.get("usage")?;
    if flag(entry, "isSidechain") || flag(entry, "isApiErrorMessage") {
        return None;
    }
    TokenUsage::from_value(usage)
}

fn flag(entry: &Value, key: &str) -> bool {
    entry.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Reported work minus the estimated size of any summary text handed back to
/// the main conversation.
fn tool_result_contribution(result: &Value) -> u64 {
    let reported = result.get("totalTokens").map(lenient_u64).unwrap_or(0);
    let work = if reported > 0 {
        reported
    } else {
        result
            .get("usage")
            .map(|usage| {
                ["input_tokens", "cache_creation_input_tokens", "output_tokens"]
                    .iter()
                    .filter_map(|key| usage.get(*key))
                    .map(lenient_u64)
                    .fold(0u64, u64::saturating_add)
            })
            .unwrap_or(0)
    };

    work.saturating_sub(summary_tokens(result))
}

fn summary_tokens(result: &Value) -> u64 {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .map(|text| (text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN))
                .sum::<u64>()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> LineSignals {
        LineClassifier::new().classify(line.as_bytes())
    }

    #[test]
    fn user_record_counts_as_turn() {
        let signals = classify(
            r#"{"type":"user","timestamp":"2026-02-09T16:34:13Z","message":{"role":"user","content":"hi"}}"#,
        );
        assert!(signals.is_turn);
        assert_eq!(signals.timestamp.as_deref(), Some("2026-02-09T16:34:13Z"));
        assert_eq!(signals.usage, None);
    }

    #[test]
    fn spaced_keys_still_match() {
        let signals = classify(r#"{"type" : "user", "timestamp":  "2026-02-09T16:35:00Z"}"#);
        assert!(signals.is_turn);
        assert_eq!(signals.timestamp.as_deref(), Some("2026-02-09T16:35:00Z"));
    }

    #[test]
    fn meta_and_sidechain_records_are_not_turns() {
        assert!(!classify(r#"{"type":"user","isMeta":true}"#).is_turn);
        assert!(!classify(r#"{"type":"user","isSidechain":true}"#).is_turn);
        assert!(!classify(r#"{"type":"assistant"}"#).is_turn);
        assert!(classify(r#"{"type":"user","isMeta":false,"isSidechain":false}"#).is_turn);
    }

    #[test]
    fn main_chain_usage_is_extracted() {
        let signals = classify(
            r#"{"type":"assistant","message":{"usage":{"input_tokens":10,"cache_read_input_tokens":2000,"cache_creation_input_tokens":300,"output_tokens":50}}}"#,
        );
        let usage = signals.usage.expect("usage");
        assert_eq!(usage.context_tokens(), 2310);
        assert_eq!(usage.output_tokens, 50);
    }

    #[test]
    fn sidechain_and_error_usage_is_ignored() {
        let sidechain = classify(
            r#"{"type":"assistant","isSidechain":true,"message":{"usage":{"input_tokens":10}}}"#,
        );
        assert_eq!(sidechain.usage, None);

        let api_error = classify(
            r#"{"type":"assistant","isApiErrorMessage":true,"message":{"usage":{"input_tokens":10}}}"#,
        );
        assert_eq!(api_error.usage, None);
    }

    #[test]
    fn reported_total_is_netted_against_summary_text() {
        let summary = "x".repeat(400);
        let line = format!(
            r#"{{"type":"user","toolUseResult":{{"totalTokens":500,"content":[{{"type":"text","text":"{summary}"}}]}}}}"#
        );
        assert_eq!(classify(&line).agent_contribution, 400);
    }

    #[test]
    fn usage_sum_is_used_without_reported_total() {
        let line = r#"{"toolUseResult":{"usage":{"input_tokens":100,"cache_creation_input_tokens":50,"cache_read_input_tokens":9000,"output_tokens":25},"content":[{"text":"abcde"}]}}"#;
        assert_eq!(classify(line).agent_contribution, 173);
    }

    #[test]
    fn non_positive_net_contribution_is_dropped() {
        let line = r#"{"toolUseResult":{"totalTokens":1,"content":[{"text":"a long summary"}]}}"#;
        assert_eq!(classify(line).agent_contribution, 0);

        let string_result = r#"{"toolUseResult":"Error: tool failed"}"#;
        assert_eq!(classify(string_result).agent_contribution, 0);
    }

    #[test]
    fn plain_lines_skip_full_parse() {
        let classifier = LineClassifier::new();
        assert!(!classifier.needs_full_parse(br#"{"type":"user","message":"hi"}"#));
        assert!(classifier.needs_full_parse(br#"{"message":{"usage":{}}}"#));
        assert!(classifier.needs_full_parse(br#"{"toolUseResult":{}}"#));
    }

    #[test]
    fn malformed_line_keeps_cheap_signals() {
        let signals = classify(r#"{"type":"user","timestamp":"2026-02-09T16:34:13Z","usage": {"#);
        assert!(signals.malformed);
        assert!(signals.is_turn);
        assert_eq!(signals.timestamp.as_deref(), Some("2026-02-09T16:34:13Z"));
        assert_eq!(signals.usage, None);
    }

    #[test]
    fn invalid_utf8_keeps_cheap_signals() {
        let mut raw = br#"{"type":"user","timestamp":"2026-02-09T16:34:13Z","message":{"content":"caf"#.to_vec();
        raw.push(0xff);
        raw.extend_from_slice(br#""}}"#);

        let signals = LineClassifier::new().classify(&raw);
        assert!(signals.is_turn);
        assert!(!signals.malformed);
        assert_eq!(signals.timestamp.as_deref(), Some("2026-02-09T16:34:13Z"));
    }

    #[test]
    fn invalid_utf8_inside_usage_record_still_decodes() {
        let mut raw = br#"{"type":"assistant","message":{"content":"x"#.to_vec();
        raw.push(0xfe);
        raw.extend_from_slice(br#"","usage":{"input_tokens":40,"cache_read_input_tokens":60}}}"#);

        let signals = LineClassifier::new().classify(&raw);
        assert!(!signals.malformed);
        assert_eq!(signals.usage.map(|usage| usage.context_tokens()), Some(100));
    }
}
