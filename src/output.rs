//! Terminal rendering: the final report on stdout, progress on stderr.

use std::io::Write;

use crossterm::style::{Attribute, Color, ContentStyle};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::agents::Usage;
use crate::config::HandoffMode;
use crate::pipeline::{PipelineEvent, PipelineState, ReviewOutcome};
use crate::report::{Recommendation, ReviewReport, Severity};
use crate::session::StageRecord;

fn style(fg: Option<Color>, attr: Option<Attribute>) -> ContentStyle {
    let mut style = ContentStyle::new();
    style.foreground_color = fg;
    if let Some(attr) = attr {
        style.attributes.set(attr);
    }
    style
}

fn paint(text: &str, style: ContentStyle, color: bool) -> String {
    if color {
        style.apply(text).to_string()
    } else {
        text.to_string()
    }
}

fn score_style(score: u32) -> ContentStyle {
    let fg = if score >= 80 {
        Color::Green
    } else if score >= 50 {
        Color::Yellow
    } else {
        Color::Red
    };
    style(Some(fg), None)
}

fn severity_style(severity: Severity) -> ContentStyle {
    match severity {
        Severity::Critical => style(Some(Color::Red), Some(Attribute::Bold)),
        Severity::Warning => style(Some(Color::Yellow), None),
        Severity::Suggestion => style(Some(Color::Cyan), None),
        Severity::Nitpick => style(None, Some(Attribute::Dim)),
    }
}

/// Human-readable report. `color` adds ANSI styling.
pub fn format_report(report: &ReviewReport, color: bool) -> String {
    let bold = style(None, Some(Attribute::Bold));
    let dim = style(None, Some(Attribute::Dim));
    let mut lines = Vec::new();

    lines.push(String::new());
    lines.push(paint(
        "── Review Summary ──",
        style(Some(Color::Blue), Some(Attribute::Bold)),
        color,
    ));
    lines.push(report.summary.trim().to_string());

    let rec_color = match report.recommendation {
        Recommendation::Approve => Color::Green,
        Recommendation::RequestChanges => Color::Red,
    };
    lines.push(String::new());
    lines.push(format!(
        "  Score: {}  |  Recommendation: {}",
        paint(
            &format!("{}/100", report.overall_score),
            score_style(report.overall_score),
            color
        ),
        paint(
            &report.recommendation.to_string(),
            style(Some(rec_color), None),
            color
        ),
    ));
    lines.push(String::new());

    if report.comments.is_empty() {
        lines.push(paint(
            "No issues found — clean PR!",
            style(Some(Color::Green), None),
            color,
        ));
        return lines.join("\n");
    }

    lines.push(paint(
        &format!("Comments ({}):", report.comments.len()),
        bold,
        color,
    ));
    lines.push(String::new());
    for comment in &report.comments {
        let tag = format!("[{}]", comment.severity.as_str().to_uppercase());
        let line = comment
            .line
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        let mut entry = format!(
            "  {} {}:{} — {}",
            paint(&tag, severity_style(comment.severity), color),
            comment.file,
            line,
            comment.message
        );
        if !comment.verified {
            entry.push_str(&paint(" (unverified)", dim, color));
        }
        lines.push(entry);
        if let Some(suggestion) = &comment.suggestion {
            lines.push(paint(&format!("    → {}", suggestion), dim, color));
        }
    }

    lines.join("\n")
}

/// Stored stage outputs in chain order, one titled section per agent.
pub fn format_stages(stages: &[StageRecord], color: bool) -> String {
    let title = style(Some(Color::Blue), Some(Attribute::Bold));
    let mut lines = Vec::new();
    for stage in stages {
        lines.push(String::new());
        lines.push(paint(&format!("── {} ──", stage.role), title, color));
        lines.push(stage.output.trim().to_string());
    }
    lines.join("\n")
}

/// How the run went, next to the report fields.
#[derive(Debug, Serialize)]
pub struct RunInfo {
    pub mode: HandoffMode,
    pub verified: bool,
    pub usage: Usage,
    pub warnings: Vec<String>,
}

/// `--json` output: the report's own fields plus a `run` object.
#[derive(Debug, Serialize)]
pub struct JsonOutput<'a> {
    #[serde(flatten)]
    pub report: &'a ReviewReport,
    pub run: RunInfo,
}

pub fn build_json_output(outcome: &ReviewOutcome) -> JsonOutput<'_> {
    JsonOutput {
        report: &outcome.report,
        run: RunInfo {
            mode: outcome.mode,
            verified: outcome.verified,
            usage: outcome.usage.clone(),
            warnings: outcome.warnings.clone(),
        },
    }
}

/// Write JSON to stdout with flush guarantee and broken pipe safety.
pub fn write_json_stdout<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, value)?;
    let _ = writeln!(handle);
    let _ = handle.flush();
    Ok(())
}

/// One stderr line for `event`, or `None` for events only shown as NDJSON.
pub fn describe_event(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::StateChanged(state) => match state {
            PipelineState::CreatingAgents => Some("Creating agent chain...".to_string()),
            PipelineState::Reviewing => Some("Starting review...".to_string()),
            PipelineState::FallingBack => {
                Some("Falling back to sequential stages...".to_string())
            }
            PipelineState::TearingDown => Some("Cleaning up agents...".to_string()),
            _ => None,
        },
        PipelineEvent::AgentStarted { role, .. } => Some(format!("[{}] working", role)),
        PipelineEvent::AgentHandoff { from, to } => Some(format!(
            "  {} → {}",
            from.map(|r| r.to_string())
                .unwrap_or_else(|| "?".to_string()),
            to
        )),
        PipelineEvent::ToolCalled {
            name, arguments, ..
        } => Some(format!("  → {}({})", name, arguments)),
        PipelineEvent::ToolCompleted {
            name,
            is_error: true,
            summary,
        } => Some(format!("  ✗ {}: {}", name, summary)),
        PipelineEvent::ToolCompleted { .. } => None,
        PipelineEvent::Log(message) => Some(format!("  {}", message)),
        PipelineEvent::Failed(error) => Some(format!("[Error] {}", error)),
        PipelineEvent::FindingDetected(_) | PipelineEvent::Completed { .. } => None,
    }
}

/// Print progress until the pipeline drops its sender.
///
/// `ndjson` switches to one `{"event","timestamp","data"}` object per line.
pub async fn print_events(mut events: mpsc::Receiver<PipelineEvent>, ndjson: bool) {
    while let Some(event) = events.recv().await {
        if ndjson {
            eprintln!("{}", event.to_json_line());
        } else if let Some(line) = describe_event(&event) {
            eprintln!("{}", line);
        }
    }
}
