//! Per-task scoring strategies.

use super::signals::{
    content_words, distinct_sentence_ratio, extract_json_object, keyword_coverage, length_score,
    paragraph_count, placeholders, spam_hits, top_terms, word_count,
};
use super::{QualityScore, ScoreBuilder, ScoringContext, ScoringStrategy};
use crate::types::TaskType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

static SUBJECT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*subject:\s*\S").expect("subject regex should be valid"));

static GREETING_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(hi|hello|hey|dear|good (morning|afternoon|evening))\b")
        .expect("greeting regex should be valid")
});

static CALL_TO_ACTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(call|meeting|chat|schedule|demo|calendar|book a|let me know|open to|worth a)\b|\?")
        .expect("call to action regex should be valid")
});

static SIGN_OFF_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^\s*(best|best regards|regards|kind regards|warm regards|thanks|thank you|cheers|sincerely|talk soon)\b[,.!]?\s*$",
    )
    .expect("sign-off regex should be valid")
});

static COURTESY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(thanks|thank you|appreciate|happy to|glad to)\b")
        .expect("courtesy regex should be valid")
});

static HEADING_OR_LIST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(#{1,6}\s|[-*]\s|\d+\.\s)").expect("heading regex should be valid")
});

const WEBSITE_FIELDS: [&str; 4] = ["company_name", "industry", "summary", "pain_points"];

fn empty_output(task_type: TaskType) -> QualityScore {
    let mut builder = ScoreBuilder::new(task_type);
    builder.dimension("content", 1.0, 0.0, "output is empty").flag("empty_output");
    builder.build()
}

fn placeholder_dimension(builder: &mut ScoreBuilder, output: &str, weight: f64) {
    let found = placeholders(output);
    if found.is_empty() {
        builder.dimension("placeholders", weight, 100.0, "");
    } else {
        builder
            .dimension("placeholders", weight, 0.0, format!("unfilled: {}", found.join(", ")))
            .flag("unfilled_placeholder");
    }
}

fn spam_dimension(builder: &mut ScoreBuilder, name: &str, output: &str, weight: f64) {
    let hits = spam_hits(output);
    if hits.is_empty() {
        builder.dimension(name, weight, 100.0, "");
    } else {
        builder
            .dimension(name, weight, 100.0 - 34.0 * hits.len() as f64, format!("found: {}", hits.join(", ")))
            .flag("spam_phrases");
    }
}

fn length_dimension(builder: &mut ScoreBuilder, words: usize, bounds: (usize, usize), weight: f64) {
    let (min, max) = bounds;
    builder.dimension("length", weight, length_score(words, min, max), format!("{words} words (target {min}-{max})"));
    if words < min {
        builder.flag("too_short");
    } else if words > max {
        builder.flag("too_long");
    }
}

fn originality_dimension(builder: &mut ScoreBuilder, output: &str, weight: f64) {
    let ratio = distinct_sentence_ratio(output);
    builder.dimension("originality", weight, ratio * 100.0, format!("{:.0}% distinct sentences", ratio * 100.0));
    if ratio < 0.8 {
        builder.flag("repetitive");
    }
}

fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn string_field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| map.get(*name).and_then(Value::as_str))
}

/// Outbound sales email: structure, length, personalization, spam and placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailStrategy;

impl ScoringStrategy for EmailStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::EmailGeneration
    }

    fn score(&self, output: &str, context: &ScoringContext) -> QualityScore {
        if output.trim().is_empty() {
            return empty_output(self.task_type());
        }
        let mut builder = ScoreBuilder::new(self.task_type());

        let checks = [
            ("subject", SUBJECT_REGEX.is_match(output)),
            ("greeting", GREETING_REGEX.is_match(output)),
            ("call_to_action", CALL_TO_ACTION_REGEX.is_match(output)),
            ("sign_off", SIGN_OFF_REGEX.is_match(output)),
        ];
        let missing: Vec<&str> = checks.iter().filter(|(_, ok)| !ok).map(|(name, _)| *name).collect();
        let present = checks.len() - missing.len();
        let detail = if missing.is_empty() { String::new() } else { format!("missing: {}", missing.join(", ")) };
        builder.dimension("structure", 0.3, 25.0 * present as f64, detail);
        if missing.contains(&"subject") {
            builder.flag("missing_subject");
        }

        let body: String = output
            .lines()
            .filter(|line| !line.trim_start().to_lowercase().starts_with("subject:"))
            .collect::<Vec<_>>()
            .join("\n");
        length_dimension(&mut builder, word_count(&body), context.word_bounds(50, 300), 0.2);

        let lowered = output.to_lowercase();
        let expected: Vec<&String> =
            [&context.recipient_name, &context.company_name].into_iter().flatten().filter(|s| !s.trim().is_empty()).collect();
        if expected.is_empty() {
            builder.dimension("personalization", 0.2, 100.0, "no personalization fields supplied");
        } else {
            let hits = expected.iter().filter(|s| lowered.contains(&s.trim().to_lowercase())).count();
            builder.dimension(
                "personalization",
                0.2,
                100.0 * hits as f64 / expected.len() as f64,
                format!("{hits}/{} personal details referenced", expected.len()),
            );
            if hits == 0 {
                builder.flag("generic");
            }
        }

        spam_dimension(&mut builder, "deliverability", output, 0.15);
        placeholder_dimension(&mut builder, output, 0.15);
        builder.build()
    }
}

/// Long-form content: length, structure, keyword coverage, originality and placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentStrategy;

impl ScoringStrategy for ContentStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::ContentGeneration
    }

    fn score(&self, output: &str, context: &ScoringContext) -> QualityScore {
        if output.trim().is_empty() {
            return empty_output(self.task_type());
        }
        let mut builder = ScoreBuilder::new(self.task_type());

        length_dimension(&mut builder, word_count(output), context.word_bounds(150, 1500), 0.25);

        let paragraphs = paragraph_count(output);
        let has_outline = HEADING_OR_LIST_REGEX.is_match(output);
        let structure = 20.0 * paragraphs.min(3) as f64 + if has_outline { 40.0 } else { 0.0 };
        builder.dimension(
            "structure",
            0.2,
            structure,
            format!("{paragraphs} paragraph(s){}", if has_outline { ", headings or lists" } else { "" }),
        );

        let coverage = keyword_coverage(output, &context.required_keywords);
        builder.dimension("keywords", 0.25, coverage * 100.0, format!("{:.0}% of keywords present", coverage * 100.0));
        if coverage < 1.0 {
            builder.flag("missing_keywords");
        }

        originality_dimension(&mut builder, output, 0.15);
        placeholder_dimension(&mut builder, output, 0.15);
        builder.build()
    }
}

/// Lead scoring: a JSON object with a 0-100 `score` and a `reasoning` string.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadScoringStrategy;

impl ScoringStrategy for LeadScoringStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::LeadScoring
    }

    fn score(&self, output: &str, _context: &ScoringContext) -> QualityScore {
        if output.trim().is_empty() {
            return empty_output(self.task_type());
        }
        let mut builder = ScoreBuilder::new(self.task_type());

        let Some(map) = extract_json_object(output) else {
            builder
                .dimension("format", 0.3, 0.0, "no JSON object found")
                .dimension("score", 0.35, 0.0, "")
                .dimension("reasoning", 0.25, 0.0, "")
                .dimension("evidence", 0.1, 0.0, "")
                .flag("invalid_json");
            return builder.build();
        };
        builder.dimension("format", 0.3, 100.0, "");

        match map.get("score").and_then(Value::as_f64) {
            Some(value) if (0.0..=100.0).contains(&value) => {
                builder.dimension("score", 0.35, 100.0, format!("score {value}"));
            }
            Some(value) => {
                builder.dimension("score", 0.35, 0.0, format!("score {value} outside 0-100")).flag("score_out_of_range");
            }
            None => {
                builder.dimension("score", 0.35, 0.0, "no numeric score").flag("missing_score");
            }
        }

        match string_field(&map, &["reasoning", "rationale"]) {
            Some(reasoning) => {
                let words = word_count(reasoning);
                builder.dimension("reasoning", 0.25, length_score(words, 10, 150), format!("{words} words"));
            }
            None => {
                builder.dimension("reasoning", 0.25, 0.0, "no reasoning").flag("missing_reasoning");
            }
        }

        let has_evidence = ["signals", "factors", "strengths", "concerns"]
            .iter()
            .any(|key| map.get(*key).is_some_and(|v| v.as_array().is_some_and(|a| !a.is_empty())));
        builder.dimension("evidence", 0.1, if has_evidence { 100.0 } else { 50.0 }, "");
        builder.build()
    }
}

/// Website analysis: a JSON object carrying the extracted company profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebsiteAnalysisStrategy;

impl ScoringStrategy for WebsiteAnalysisStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::WebsiteAnalysis
    }

    fn score(&self, output: &str, context: &ScoringContext) -> QualityScore {
        if output.trim().is_empty() {
            return empty_output(self.task_type());
        }
        let mut builder = ScoreBuilder::new(self.task_type());

        let Some(map) = extract_json_object(output) else {
            builder
                .dimension("format", 0.25, 0.0, "no JSON object found")
                .dimension("completeness", 0.35, 0.0, "")
                .dimension("summary", 0.2, 0.0, "")
                .dimension("consistency", 0.2, 0.0, "")
                .flag("invalid_json");
            return builder.build();
        };
        builder.dimension("format", 0.25, 100.0, "");

        let missing: Vec<&str> =
            WEBSITE_FIELDS.iter().copied().filter(|field| !map.get(*field).is_some_and(non_empty)).collect();
        let present = WEBSITE_FIELDS.len() - missing.len();
        let detail = if missing.is_empty() { String::new() } else { format!("missing: {}", missing.join(", ")) };
        builder.dimension("completeness", 0.35, 100.0 * present as f64 / WEBSITE_FIELDS.len() as f64, detail);
        if !missing.is_empty() {
            builder.flag("missing_fields");
        }

        let summary_words = string_field(&map, &["summary"]).map_or(0, word_count);
        builder.dimension("summary", 0.2, length_score(summary_words, 20, 200), format!("{summary_words} words"));

        match (context.company_name.as_deref(), string_field(&map, &["company_name"])) {
            (Some(expected), Some(found)) => {
                let (expected, found) = (expected.trim().to_lowercase(), found.trim().to_lowercase());
                if !expected.is_empty() && (found.contains(&expected) || expected.contains(&found)) && !found.is_empty() {
                    builder.dimension("consistency", 0.2, 100.0, "");
                } else {
                    builder.dimension("consistency", 0.2, 30.0, format!("expected '{expected}'")).flag("company_mismatch");
                }
            }
            (Some(_), None) => {
                builder.dimension("consistency", 0.2, 30.0, "company name not extracted");
            }
            (None, _) => {
                builder.dimension("consistency", 0.2, 100.0, "no company supplied");
            }
        }
        builder.build()
    }
}

/// Reply to an inbound message: length, relevance, tone, placeholders and courtesy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationReplyStrategy;

impl ScoringStrategy for ConversationReplyStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::ConversationReply
    }

    fn score(&self, output: &str, context: &ScoringContext) -> QualityScore {
        if output.trim().is_empty() {
            return empty_output(self.task_type());
        }
        let mut builder = ScoreBuilder::new(self.task_type());

        length_dimension(&mut builder, word_count(output), context.word_bounds(15, 200), 0.25);

        let inbound_terms: BTreeSet<String> =
            context.inbound_message.as_deref().map(content_words).unwrap_or_default().into_iter().collect();
        if inbound_terms.is_empty() {
            builder.dimension("relevance", 0.3, 100.0, "no inbound message supplied");
        } else {
            let reply_terms: BTreeSet<String> = content_words(output).into_iter().collect();
            let overlap = inbound_terms.intersection(&reply_terms).count();
            let needed = inbound_terms.len().min(3);
            builder.dimension(
                "relevance",
                0.3,
                100.0 * overlap.min(needed) as f64 / needed as f64,
                format!("{overlap} shared term(s)"),
            );
            if overlap == 0 {
                builder.flag("off_topic");
            }
        }

        spam_dimension(&mut builder, "tone", output, 0.15);
        placeholder_dimension(&mut builder, output, 0.15);

        let courteous = COURTESY_REGEX.is_match(output) || SIGN_OFF_REGEX.is_match(output);
        builder.dimension("courtesy", 0.15, if courteous { 100.0 } else { 50.0 }, "");
        builder.build()
    }
}

/// Summary of a source text: compression, coverage, originality and placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummarizationStrategy;

impl SummarizationStrategy {
    const IDEAL_MAX_RATIO: f64 = 0.35;
    const IDEAL_MIN_RATIO: f64 = 0.02;

    fn compression_score(ratio: f64) -> f64 {
        if ratio >= 1.0 {
            0.0
        } else if ratio > Self::IDEAL_MAX_RATIO {
            100.0 * (1.0 - ratio) / (1.0 - Self::IDEAL_MAX_RATIO)
        } else if ratio < Self::IDEAL_MIN_RATIO {
            100.0 * ratio / Self::IDEAL_MIN_RATIO
        } else {
            100.0
        }
    }
}

impl ScoringStrategy for SummarizationStrategy {
    fn task_type(&self) -> TaskType {
        TaskType::Summarization
    }

    fn score(&self, output: &str, context: &ScoringContext) -> QualityScore {
        if output.trim().is_empty() {
            return empty_output(self.task_type());
        }
        let mut builder = ScoreBuilder::new(self.task_type());
        let words = word_count(output);
        let source = context.source_text.as_deref().filter(|s| word_count(s) > 0);

        match source {
            Some(source) => {
                let ratio = words as f64 / word_count(source) as f64;
                builder.dimension("length", 0.3, Self::compression_score(ratio), format!("compression ratio {ratio:.2}"));
                if ratio >= 1.0 {
                    builder.flag("not_compressed");
                }
            }
            None => length_dimension(&mut builder, words, context.word_bounds(30, 250), 0.3),
        }

        let coverage = if context.required_keywords.is_empty() {
            source.map(|s| keyword_coverage(output, &top_terms(s, 8)))
        } else {
            Some(keyword_coverage(output, &context.required_keywords))
        };
        match coverage {
            Some(coverage) => {
                builder.dimension("coverage", 0.3, coverage * 100.0, format!("{:.0}% of key terms", coverage * 100.0));
            }
            None => {
                builder.dimension("coverage", 0.3, 100.0, "no source or keywords supplied");
            }
        }

        originality_dimension(&mut builder, output, 0.2);
        placeholder_dimension(&mut builder, output, 0.2);
        builder.build()
    }
}
