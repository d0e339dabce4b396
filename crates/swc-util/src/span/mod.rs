//! Source spans and the source map.
//!
//! A [`Span`] is a compact reference to a byte range inside a registered
//! source file. The backend attaches spans to emitted micro-instructions
//! when debug info is enabled, and the diagnostic renderer resolves them
//! back to line/column text through the [`SourceMap`].

mod source_map;

pub use source_map::{LineCol, SourceFile, SourceMap};

/// Identifies a file registered in a [`SourceMap`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// A byte range inside a source file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: FileId,
    pub offset: u32,
    pub len: u32,
}

impl Span {
    /// Span used when no real source location exists
    pub const DUMMY: Span = Span {
        file: FileId(u32::MAX),
        offset: 0,
        len: 0,
    };

    pub fn new(file: FileId, offset: u32, len: u32) -> Self {
        Self { file, offset, len }
    }

    pub fn is_dummy(&self) -> bool {
        self.file == FileId(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_span_is_dummy() {
        assert!(Span::DUMMY.is_dummy());
        assert!(!Span::new(FileId(0), 0, 1).is_dummy());
    }

    #[test]
    fn lookup_line_and_column() {
        let mut map = SourceMap::new();
        let file = map.add_file("test.swg", "let a = 1\nlet b = 2\n".to_string());
        let loc = map.lookup(Span::new(file, 14, 1)).unwrap();
        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 5);
    }

    #[test]
    fn line_text_returns_without_newline() {
        let mut map = SourceMap::new();
        let file = map.add_file("test.swg", "first\nsecond\n".to_string());
        assert_eq!(map.line_text(file, 1), Some("first"));
        assert_eq!(map.line_text(file, 2), Some("second"));
        assert_eq!(map.line_text(file, 3), None);
    }
}
