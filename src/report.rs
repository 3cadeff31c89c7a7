//! The `ReviewReport` contract emitted by the Reporter agent.
//!
//! ```text
//! ReviewReport {
//!     summary:         String,
//!     comments:        [ReviewComment],   // severity-ordered after normalize()
//!     overall_score:   0..=100,
//!     recommendation:  approve | request_changes,
//!     files_reviewed:  u32,
//!     total_issues:    u32,               // == comments.len()
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::diff::new_side_lines;
use crate::text::truncate_str;

pub const REPORT_SCHEMA_NAME: &str = "ReviewReport";
pub const MAX_SCORE: u32 = 100;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Reporter output is not a valid ReviewReport: {source}. Output: {excerpt}")]
    Parse {
        #[source]
        source: serde_json::Error,
        excerpt: String,
    },

    #[error("Reporter produced no output")]
    Empty,
}

/// Finding severity, most severe first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Bugs, security holes, data loss. Blocks the merge.
    Critical,
    /// Likely problems worth fixing before merge.
    Warning,
    /// Improvements that are not required.
    Suggestion,
    /// Cosmetic remarks.
    Nitpick,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Suggestion => "suggestion",
            Self::Nitpick => "nitpick",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Correctness,
    Security,
    Performance,
    Maintainability,
    Style,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    RequestChanges,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => f.write_str("approve"),
            Self::RequestChanges => f.write_str("request_changes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewComment {
    /// Path of the file relative to the repository root
    pub file: String,
    /// Line number in the new version of the file
    pub line: Option<u32>,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    /// Concrete fix, if one exists
    pub suggestion: Option<String>,
    /// Whether the Verifier confirmed this finding
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewReport {
    pub summary: String,
    #[serde(default)]
    pub comments: Vec<ReviewComment>,
    /// Overall quality score from 0 (unmergeable) to 100 (exemplary)
    #[serde(deserialize_with = "deserialize_score")]
    #[schemars(with = "u32")]
    pub overall_score: u32,
    pub recommendation: Recommendation,
    pub files_reviewed: u32,
    pub total_issues: u32,
}

/// Models sometimes emit `87.5` or `-1`; accept any number and round into `u32`.
fn deserialize_score<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom("overall_score must be a finite number"));
    }
    Ok(value.round().clamp(0.0, u32::MAX as f64) as u32)
}

impl ReviewReport {
    /// JSON Schema for the Reporter's `response_format`. Self-contained:
    /// enums and comments are inlined and there is no `$schema` key.
    pub fn json_schema() -> serde_json::Value {
        let settings = SchemaSettings::draft07().with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        });
        let schema = settings
            .into_generator()
            .into_root_schema_for::<ReviewReport>();
        serde_json::to_value(schema).unwrap_or_default()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.comments
            .iter()
            .filter(|c| c.severity == severity)
            .count()
    }

    pub fn has_critical(&self) -> bool {
        self.count_by_severity(Severity::Critical) > 0
    }

    /// Make the report internally consistent. Returns a description of each
    /// correction so callers can log them.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut corrections = Vec::new();

        // stable: equal severities keep the Reporter's order
        self.comments.sort_by_key(|c| c.severity);

        if self.overall_score > MAX_SCORE {
            corrections.push(format!(
                "overall_score {} clamped to {}",
                self.overall_score, MAX_SCORE
            ));
            self.overall_score = MAX_SCORE;
        }

        let actual = self.comments.len() as u32;
        if self.total_issues != actual {
            corrections.push(format!(
                "total_issues {} corrected to {}",
                self.total_issues, actual
            ));
            self.total_issues = actual;
        }

        if self.has_critical() && self.recommendation == Recommendation::Approve {
            corrections.push("approve changed to request_changes (critical findings)".to_string());
            self.recommendation = Recommendation::RequestChanges;
        }

        corrections
    }

    /// Used when the verification stage did not run to completion.
    pub fn mark_unverified(&mut self) {
        for comment in &mut self.comments {
            comment.verified = false;
        }
    }

    /// Compare comment locations with the PR diff (file name → patch).
    ///
    /// Returns human-readable warnings; findings are never dropped.
    pub fn check_against_diff(&self, patches: &HashMap<String, String>) -> Vec<String> {
        let mut warnings = Vec::new();
        for comment in &self.comments {
            let Some(patch) = patches.get(&comment.file) else {
                warnings.push(format!(
                    "{} is not part of this pull request",
                    comment.file
                ));
                continue;
            };
            if let Some(line) = comment.line {
                if !new_side_lines(patch).contains(&line) {
                    warnings.push(format!(
                        "{}:{} is outside the changed hunks",
                        comment.file, line
                    ));
                }
            }
        }
        warnings
    }
}

/// Parse the Reporter's final text into a report.
///
/// Accepts bare JSON, a ```` ```json ```` fenced block, or JSON surrounded
/// by prose (first `{` to last `}`).
pub fn parse_report(text: &str) -> Result<ReviewReport, ReportError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ReportError::Empty);
    }

    let mut last_err = match serde_json::from_str(trimmed) {
        Ok(report) => return Ok(report),
        Err(e) => e,
    };

    for candidate in json_candidates(trimmed) {
        if candidate == trimmed {
            continue;
        }
        match serde_json::from_str(candidate) {
            Ok(report) => return Ok(report),
            Err(e) => last_err = e,
        }
    }

    Err(ReportError::Parse {
        source: last_err,
        excerpt: truncate_str(trimmed, 200),
    })
}

/// Spans that may hold the report: the ```` ```json ```` block up to the
/// last closing fence, then first `{` to last `}`.
fn json_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();

    if let Some(start) = text.find("```json") {
        let json_start = start + "```json".len();
        if let Some(end) = text[json_start..].rfind("```") {
            candidates.push(text[json_start..json_start + end].trim());
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            candidates.push(&text[start..=end]);
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "summary": "Adds retry logic",
        "comments": [
            {"file": "src/net.py", "line": 12, "severity": "nitpick", "category": "style",
             "message": "Long line", "suggestion": null},
            {"file": "src/net.py", "line": 40, "severity": "critical", "category": "security",
             "message": "Token logged", "suggestion": "Redact it", "verified": true},
            {"file": "src/util.py", "line": null, "severity": "warning", "category": "correctness",
             "message": "Unused import", "suggestion": null}
        ],
        "overall_score": 72,
        "recommendation": "approve",
        "files_reviewed": 2,
        "total_issues": 5
    }"#;

    fn sample() -> ReviewReport {
        parse_report(SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_bare_json() {
        let report = sample();
        assert_eq!(report.comments.len(), 3);
        assert_eq!(report.overall_score, 72);
        assert!(!report.comments[0].verified);
        assert!(report.comments[1].verified);
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = format!("Here is the report:\n```json\n{}\n```\nDone.", SAMPLE);
        assert_eq!(parse_report(&text).unwrap(), sample());
    }

    #[test]
    fn test_parse_fenced_json_with_fence_in_suggestion() {
        let text = r#"Report:
```json
{"summary": "ok", "comments": [{"file": "src/a.rs", "line": 3, "severity": "warning",
  "category": "correctness", "message": "unchecked index",
  "suggestion": "```rust\nlet x = v.get(i)?;\n```"}],
 "overall_score": 70, "recommendation": "approve", "files_reviewed": 1, "total_issues": 1}
```"#;
        let report = parse_report(text).unwrap();
        assert_eq!(
            report.comments[0].suggestion.as_deref(),
            Some("```rust\nlet x = v.get(i)?;\n```")
        );
    }

    #[test]
    fn test_parse_json_after_prose() {
        let text = format!("Final report follows. {} Thanks!", SAMPLE);
        assert_eq!(parse_report(&text).unwrap(), sample());
    }

    #[test]
    fn test_parse_minimal_report_defaults_comments() {
        let report = parse_report(
            r#"{"summary":"ok","overall_score":95.6,"recommendation":"approve","files_reviewed":1,"total_issues":0}"#,
        )
        .unwrap();
        assert!(report.comments.is_empty());
        assert_eq!(report.overall_score, 96);
    }

    #[test]
    fn test_parse_negative_score_floors_at_zero() {
        let report = parse_report(
            r#"{"summary":"bad","overall_score":-5,"recommendation":"request_changes","files_reviewed":1,"total_issues":0}"#,
        )
        .unwrap();
        assert_eq!(report.overall_score, 0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_report("   "), Err(ReportError::Empty)));
        assert!(matches!(
            parse_report("no json here"),
            Err(ReportError::Parse { .. })
        ));
        let err = parse_report(r#"{"summary":"x","recommendation":"maybe"}"#).unwrap_err();
        assert!(err.to_string().contains("not a valid ReviewReport"));
    }

    #[test]
    fn test_normalize() {
        let mut report = sample();
        report.overall_score = 140;
        let corrections = report.normalize();

        let severities: Vec<Severity> = report.comments.iter().map(|c| c.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::Warning, Severity::Nitpick]
        );
        assert_eq!(report.overall_score, 100);
        assert_eq!(report.total_issues, 3);
        assert_eq!(report.recommendation, Recommendation::RequestChanges);
        assert_eq!(corrections.len(), 3);
    }

    #[test]
    fn test_normalize_consistent_report_is_untouched() {
        let mut report = sample();
        report.comments.retain(|c| c.severity != Severity::Critical);
        report.total_issues = 2;
        assert!(report.normalize().is_empty());
        assert_eq!(report.recommendation, Recommendation::Approve);
        let order: Vec<Severity> = report.comments.iter().map(|c| c.severity).collect();
        assert_eq!(order, vec![Severity::Warning, Severity::Nitpick]);
    }

    #[test]
    fn test_mark_unverified() {
        let mut report = sample();
        report.mark_unverified();
        assert!(report.comments.iter().all(|c| !c.verified));
    }

    #[test]
    fn test_check_against_diff() {
        let report = sample();
        let mut patches = HashMap::new();
        patches.insert(
            "src/net.py".to_string(),
            "@@ -10,3 +10,4 @@\n a\n b\n+c\n d\n".to_string(),
        );
        let warnings = report.check_against_diff(&patches);
        assert_eq!(
            warnings,
            vec![
                "src/net.py:40 is outside the changed hunks".to_string(),
                "src/util.py is not part of this pull request".to_string(),
            ]
        );
    }

    #[test]
    fn test_json_schema_shape() {
        let schema = ReviewReport::json_schema();
        let props = &schema["properties"];
        for key in [
            "summary",
            "comments",
            "overall_score",
            "recommendation",
            "files_reviewed",
            "total_issues",
        ] {
            assert!(props.get(key).is_some(), "missing {}", key);
        }
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "summary"));
        assert!(!required.iter().any(|v| v == "comments"));
        assert!(schema.to_string().contains("request_changes"));
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("definitions").is_none());
        assert!(!schema.to_string().contains("$ref"));
        assert!(schema.to_string().contains("nitpick"));
    }

    #[test]
    fn test_severity_order_and_display() {
        assert!(Severity::Critical < Severity::Nitpick);
        assert_eq!(Severity::Suggestion.to_string(), "suggestion");
        assert_eq!(Recommendation::RequestChanges.to_string(), "request_changes");
    }
}
