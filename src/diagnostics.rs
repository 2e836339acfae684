//! Diagnostic formatting for the loopcraft CLI.

use std::ops::Range;

use ariadne::{Color, Config, IndexType, Label, Report, ReportKind, Source};
use loopcraft_ir::ParseError;
use loopcraft_passes::ScheduleError;

use crate::pipeline::PipelineError;
use crate::script::Script;

/// Get the display color for a scheduling error.
pub fn error_color(error: &ScheduleError) -> Color {
    match error {
        ScheduleError::NotFound { .. }
        | ScheduleError::Ambiguous { .. }
        | ScheduleError::InvalidSelector { .. } => Color::Yellow,
        ScheduleError::DependencyViolation { .. } | ScheduleError::AliasViolation { .. } => Color::Red,
        ScheduleError::ShapeMismatch { .. } | ScheduleError::NotConstantBound { .. } => Color::Magenta,
        ScheduleError::InvalidMemorySpace { .. } => Color::Cyan,
        ScheduleError::TemplateMismatch { .. } | ScheduleError::UnknownTemplate { .. } => Color::Blue,
        ScheduleError::InvalidState { .. } | ScheduleError::NameCollision { .. } => Color::Yellow,
    }
}

/// Normalize a span to ensure end > start (required by ariadne).
pub fn normalize_span(start: usize, end: usize) -> (usize, usize) {
    (start, end.max(start + 1))
}

/// One labelled span of a report.
struct Note<'a> {
    span: Range<usize>,
    code: &'a str,
    message: &'a str,
    label: &'a str,
    color: Color,
}

fn render(file_path: &str, text: &str, note: Note<'_>, colored: bool) -> String {
    let start = note.span.start.min(text.len());
    let (start, end) = normalize_span(start, note.span.end.min(text.len()));
    let mut out = Vec::new();
    Report::build(ReportKind::Error, (file_path, start..end))
        .with_config(
            Config::default()
                .with_color(colored)
                .with_index_type(IndexType::Byte),
        )
        .with_code(note.code)
        .with_message(note.message)
        .with_label(
            Label::new((file_path, start..end))
                .with_message(note.label)
                .with_color(note.color),
        )
        .finish()
        .write((file_path, Source::from(text)), &mut out)
        .ok();
    String::from_utf8_lossy(&out).into_owned()
}

/// Render a kernel or script parse error.
pub fn render_parse_error(file_path: &str, text: &str, error: &ParseError, colored: bool) -> String {
    let note = Note {
        span: error.offset..error.offset,
        code: "ParseError",
        message: "could not parse input",
        label: &error.message,
        color: Color::Red,
    };
    render(file_path, text, note, colored)
}

/// Render a failed schedule step, labelled at its line in the script.
pub fn render_pipeline_error(
    script_path: &str,
    script_text: &str,
    script: &Script,
    error: &PipelineError,
    colored: bool,
) -> String {
    let span = script.span(error.step_index).unwrap_or(0..0);
    let message = format!("step {} `{}` failed", error.step_index, error.step.op());
    let label = error.source.to_string();
    let note = Note {
        span,
        code: error.source.kind_name(),
        message: &message,
        label: &label,
        color: error_color(&error.source),
    };
    render(script_path, script_text, note, colored)
}
