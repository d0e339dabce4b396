use std::path::{Path, PathBuf};

use super::{FileId, Span};

/// A registered source file with a precomputed line-start table
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub src: String,
    /// Byte offset of the start of each line (line 1 starts at offset 0)
    line_starts: Vec<u32>,
}

impl SourceFile {
    fn new(path: PathBuf, src: String) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            path,
            src,
            line_starts,
        }
    }

    /// 1-based line number for a byte offset
    fn line_of(&self, offset: u32) -> u32 {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx as u32 + 1,
            Err(idx) => idx as u32,
        }
    }
}

/// Resolved source location
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineCol {
    /// 1-based line
    pub line: u32,
    /// 1-based column (in bytes)
    pub column: u32,
    /// Length of the spanned text in bytes
    pub len: u32,
}

/// Holds every loaded source file and resolves spans
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Register a file's contents, returning its id
    pub fn add_file(&mut self, path: impl AsRef<Path>, src: String) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files
            .push(SourceFile::new(path.as_ref().to_path_buf(), src));
        id
    }

    pub fn file(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0 as usize)
    }

    /// Resolve a span to line/column
    pub fn lookup(&self, span: Span) -> Option<LineCol> {
        if span.is_dummy() {
            return None;
        }
        let file = self.file(span.file)?;
        let line = file.line_of(span.offset);
        let line_start = *file.line_starts.get(line as usize - 1)?;
        Some(LineCol {
            line,
            column: span.offset - line_start + 1,
            len: span.len,
        })
    }

    /// Text of a 1-based line, without the trailing newline
    pub fn line_text(&self, id: FileId, line: u32) -> Option<&str> {
        let file = self.file(id)?;
        if line == 0 {
            return None;
        }
        let start = *file.line_starts.get(line as usize - 1)? as usize;
        if start >= file.src.len() {
            return None;
        }
        let end = file
            .line_starts
            .get(line as usize)
            .map(|&e| e as usize)
            .unwrap_or(file.src.len());
        Some(file.src[start..end].trim_end_matches(['\n', '\r']))
    }

    /// Path of a file, shortened relative to the current directory unless
    /// `absolute` is requested
    pub fn display_path(&self, id: FileId, absolute: bool) -> String {
        let Some(file) = self.file(id) else {
            return "<unknown-file>".to_string();
        };
        if absolute {
            std::fs::canonicalize(&file.path)
                .unwrap_or_else(|_| file.path.clone())
                .display()
                .to_string()
        } else {
            file.path.display().to_string()
        }
    }
}
