//! Source file registry and diagnostic rendering.
//!
//! Every loaded file is assigned a small integer index; index 0 is reserved
//! for spans that do not point into any source (synthesized nodes, driver
//! errors). A [`Span`] is a half-open byte range tagged with such an index,
//! so it stays `Copy` and cheap to thread through every AST node and error.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use colored::Colorize;

use crate::errors::Error;

/// A half-open byte range into a registered source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub source: u16,
}

impl Span {
    pub fn new(start: usize, end: usize, source: u16) -> Self {
        Span { start, end, source }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Combine two spans into one covering both. The source index is taken
    /// from `self`.
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
            source: self.source,
        }
    }
}

/// A line as `(number, starting byte offset)`. Line numbers are zero-based
/// internally; rendering adds one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    pub offset: usize,
}

pub struct SourceFile {
    name: String,
    code: String,
    line_offsets: Vec<usize>,
}

impl SourceFile {
    fn new(name: String, code: String) -> Self {
        let mut line_offsets = vec![0];
        for (i, byte) in code.bytes().enumerate() {
            if byte == b'\n' {
                line_offsets.push(i + 1);
            }
        }

        SourceFile {
            name,
            code,
            line_offsets,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// The line containing `offset`.
    pub fn line_for(&self, offset: usize) -> Line {
        let number = self.line_offsets.partition_point(|&start| start <= offset) - 1;
        Line {
            number,
            offset: self.line_offsets[number],
        }
    }

    pub fn column_for(&self, offset: usize) -> usize {
        offset - self.line_for(offset).offset
    }

    /// The text of the given (zero-based) line, without its newline.
    pub fn line_text(&self, number: usize) -> &str {
        let start = self.line_offsets[number];
        let end = self
            .line_offsets
            .get(number + 1)
            .map(|&next| next - 1)
            .unwrap_or(self.code.len());

        &self.code[start..end]
    }

    pub fn line_count(&self) -> usize {
        self.line_offsets.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }

    fn paint(self, text: &str) -> colored::ColoredString {
        match self {
            Severity::Error => text.red().bold(),
            Severity::Warning => text.magenta().bold(),
            Severity::Note => text.cyan().bold(),
        }
    }
}

/// Owner of all source buffers for one compilation.
#[derive(Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        SourceMap::default()
    }

    /// Register a buffer and return its index. Indices start at 1.
    pub fn insert(&mut self, name: impl Into<String>, code: impl Into<String>) -> u16 {
        self.files.push(SourceFile::new(name.into(), code.into()));
        self.files.len() as u16
    }

    pub fn load(&mut self, path: &Path) -> io::Result<u16> {
        let code = fs::read_to_string(path)?;
        Ok(self.insert(path.to_string_lossy(), code))
    }

    pub fn get(&self, index: u16) -> Option<&SourceFile> {
        if index == 0 {
            return None;
        }

        self.files.get(index as usize - 1)
    }

    pub fn format_error(&self, error: &Error) -> String {
        let mut rendered = self.format_message(error.span(), error.message(), Severity::Error);
        for note in error.notes() {
            rendered.push('\n');
            rendered.push_str(&self.format_message(note.span, &note.message, Severity::Note));
        }

        rendered
    }

    pub fn format_warning(&self, span: Span, message: &str) -> String {
        self.format_message(span, message, Severity::Warning)
    }

    /// Render `file:line:col: severity: message` followed by the offending
    /// line and a caret underline.
    pub fn format_message(&self, span: Span, message: &str, severity: Severity) -> String {
        let Some(file) = self.get(span.source) else {
            return format!("{}: {message}", severity.paint(severity.label()));
        };

        let line = file.line_for(span.start);
        let column = span.start - line.offset;
        let text = file.line_text(line.number);

        // Clamp the underline to the end of the first line for multi-line
        // spans.
        let underline = span.len().clamp(1, text.len().saturating_sub(column).max(1));

        let header = format!(
            "{location} {severity}: {message}",
            location = format!("{}:{}:{}:", file.name(), line.number + 1, column + 1)
                .white()
                .bold(),
            severity = severity.paint(severity.label()),
        );

        let gutter = format!("{:>4} | ", line.number + 1);
        let padding = " ".repeat(gutter.len() + column);
        let carets = severity.paint(&"^".repeat(underline));

        format!("{header}\n{gutter}{text}\n{padding}{carets}")
    }
}

impl fmt::Debug for SourceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.files.iter().map(|file| &file.name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_for_round_trip() {
        let mut map = SourceMap::new();
        let index = map.insert("test.qr", "let a = 1;\nlet b = 2;\nlet c = 3;\n");
        let file = map.get(index).unwrap();

        for offset in 0..file.code().len() {
            let line = file.line_for(offset);
            let text = file.line_text(line.number);

            assert!(offset >= line.offset);
            assert!(offset <= line.offset + text.len());
            assert_eq!(file.column_for(offset), offset - line.offset);
        }
    }

    #[test]
    fn test_line_text() {
        let mut map = SourceMap::new();
        let index = map.insert("test.qr", "first\nsecond\nthird");
        let file = map.get(index).unwrap();

        assert_eq!(file.line_text(0), "first");
        assert_eq!(file.line_text(1), "second");
        assert_eq!(file.line_text(2), "third");
        assert_eq!(file.line_count(), 3);
    }

    #[test]
    fn test_index_zero_is_reserved() {
        let map = SourceMap::new();
        assert!(map.get(0).is_none());
    }

    #[test]
    fn test_format_message_points_at_span() {
        let mut map = SourceMap::new();
        let index = map.insert("test.qr", "let x = bogus;\n");
        let span = Span::new(8, 13, index);

        colored::control::set_override(false);
        let rendered = map.format_message(span, "undefined identifier 'bogus'", Severity::Error);
        colored::control::unset_override();

        assert!(rendered.starts_with("test.qr:1:9:"));
        assert!(rendered.contains("undefined identifier 'bogus'"));
        assert!(rendered.contains("^^^^^"));
    }
}
