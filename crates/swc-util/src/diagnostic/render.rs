//! Text rendering for diagnostics.
//!
//! The multi-line layout shows the file path, the offending source line with
//! caret underlines, then attached notes and helps. `--diag-one-line`
//! collapses everything to a single `path:line:col: level: message` line,
//! and `--diag-max-column` truncates wide source lines with ellipses while
//! keeping the caret visible.

use super::{Diagnostic, Level};
use crate::logger::LogColor;
use crate::span::{SourceMap, Span};

/// When to emit ANSI color sequences
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn enabled(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => false,
        }
    }
}

/// Rendering knobs driven by the command line
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    /// `--diag-one-line`
    pub one_line: bool,
    /// `--diag-absolute`
    pub absolute_paths: bool,
    /// `--diag-id`
    pub show_id: bool,
    /// `--log-color`
    pub color: ColorChoice,
    /// `--diag-max-column`
    pub max_column: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            one_line: false,
            absolute_paths: false,
            show_id: false,
            color: ColorChoice::Auto,
            max_column: 120,
        }
    }
}

fn level_color(level: Level) -> LogColor {
    match level {
        Level::Error => LogColor::BrightRed,
        Level::Warning => LogColor::BrightYellow,
        Level::Note => LogColor::BrightCyan,
        Level::Help => LogColor::BrightGreen,
    }
}

fn colored(text: &str, color: LogColor, enabled: bool) -> String {
    if enabled {
        format!("{}{}{}", color.to_ansi(), text, LogColor::Reset.to_ansi())
    } else {
        text.to_string()
    }
}

fn location_string(span: Span, sources: &SourceMap, opts: &RenderOptions) -> Option<String> {
    let loc = sources.lookup(span)?;
    let path = sources.display_path(span.file, opts.absolute_paths);
    Some(format!("{}:{}:{}", path, loc.line, loc.column))
}

/// Truncate `line` to at most `max` columns, keeping `column..column+len`
/// visible. Returns the visible text and the caret column inside it.
fn truncate_line(line: &str, column: u32, max: u32) -> (String, u32) {
    let max = max.max(16) as usize;
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= max {
        return (line.to_string(), column);
    }

    let caret = column.saturating_sub(1) as usize;
    if caret + 1 < max {
        let mut out: String = chars[..max - 1].iter().collect();
        out.push('…');
        return (out, column);
    }

    // Keep some left context before the caret
    let keep_before = max / 2;
    let start = caret.saturating_sub(keep_before);
    let end = (start + max - 2).min(chars.len());
    let mut out = String::from("…");
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push('…');
    }
    (out, (caret - start + 2) as u32)
}

/// Render one diagnostic to text
pub fn render(diag: &Diagnostic, sources: &SourceMap, opts: &RenderOptions) -> String {
    let color = opts.color.enabled();
    let level_str = diag.level.to_string();
    let header_label = if opts.show_id {
        match diag.code {
            Some(code) => format!("{}[{}]", level_str, code),
            None => level_str.clone(),
        }
    } else {
        level_str.clone()
    };

    if opts.one_line {
        let loc = location_string(diag.span, sources, opts)
            .map(|l| format!("{}: ", l))
            .unwrap_or_default();
        return format!("{}{}: {}", loc, header_label, diag.message);
    }

    let mut out = String::new();
    out.push_str(&colored(&header_label, level_color(diag.level), color));
    out.push_str(": ");
    out.push_str(&diag.message);
    out.push('\n');

    if let Some(loc) = sources.lookup(diag.span) {
        let path = sources.display_path(diag.span.file, opts.absolute_paths);
        let gutter = loc.line.to_string().len();
        out.push_str(&format!(
            "{:width$}--> {}:{}:{}\n",
            "",
            path,
            loc.line,
            loc.column,
            width = gutter + 1
        ));
        if let Some(text) = sources.line_text(diag.span.file, loc.line) {
            let (visible, caret_col) = truncate_line(text, loc.column, opts.max_column);
            out.push_str(&format!("{:width$} |\n", "", width = gutter));
            out.push_str(&format!("{} | {}\n", loc.line, visible));
            let caret_len = (loc.len.max(1) as usize).min(visible.len());
            out.push_str(&format!(
                "{:width$} | {:pad$}{}\n",
                "",
                "",
                colored(&"^".repeat(caret_len), level_color(diag.level), color),
                width = gutter,
                pad = caret_col.saturating_sub(1) as usize
            ));
        }
    }

    for child in &diag.children {
        let label = colored(&child.level.to_string(), level_color(child.level), color);
        match child.span.and_then(|s| location_string(s, sources, opts)) {
            Some(loc) => out.push_str(&format!("   = {}: {} ({})\n", label, child.message, loc)),
            None => out.push_str(&format!("   = {}: {}\n", label, child.message)),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticBuilder;
    use crate::span::FileId;

    fn map_with(src: &str) -> SourceMap {
        let mut map = SourceMap::new();
        map.add_file("demo.swg", src.to_string());
        map
    }

    #[test]
    fn one_line_render() {
        let sources = map_with("call foo\n");
        let diag = DiagnosticBuilder::error("unresolved symbol `foo` at call site")
            .span(Span::new(FileId(0), 5, 3))
            .build();
        let opts = RenderOptions {
            one_line: true,
            ..Default::default()
        };
        let text = render(&diag, &sources, &opts);
        assert_eq!(
            text,
            "demo.swg:1:6: error: unresolved symbol `foo` at call site"
        );
    }

    #[test]
    fn multi_line_has_caret() {
        let sources = map_with("call foo\n");
        let diag = DiagnosticBuilder::error("unresolved symbol")
            .span(Span::new(FileId(0), 5, 3))
            .note("declared nowhere")
            .build();
        let text = render(&diag, &sources, &RenderOptions::default());
        assert!(text.contains("--> demo.swg:1:6"));
        assert!(text.contains("^^^"));
        assert!(text.contains("note: declared nowhere"));
    }

    #[test]
    fn wide_line_is_truncated_with_caret_kept() {
        let long = format!("{}offender{}", "x".repeat(200), "y".repeat(200));
        let sources = map_with(&long);
        let diag = DiagnosticBuilder::error("bad")
            .span(Span::new(FileId(0), 200, 8))
            .build();
        let opts = RenderOptions {
            max_column: 60,
            ..Default::default()
        };
        let text = render(&diag, &sources, &opts);
        assert!(text.contains('…'));
        assert!(text.contains('^'));
        for line in text.lines() {
            assert!(line.chars().count() < 80, "line too wide: {}", line);
        }
    }
}
