use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Dense index into a snapshot's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 0-based line / column. Columns count Unicode scalar values, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// Half-open byte range into a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Namespace,
    Class,
    Struct,
    Interface,
    Enum,
    Record,
    Delegate,
    Method,
    Constructor,
    Property,
    Field,
    Event,
    EnumMember,
    LocalFunction,
    Local,
    Parameter,
    TypeParameter,
    /// Metadata type referenced from source but not declared in the tree.
    NamedType,
    /// Metadata member referenced from source but not declared in the tree.
    Member,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Namespace => "namespace",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Record => "record",
            SymbolKind::Delegate => "delegate",
            SymbolKind::Method => "method",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Property => "property",
            SymbolKind::Field => "field",
            SymbolKind::Event => "event",
            SymbolKind::EnumMember => "enum_member",
            SymbolKind::LocalFunction => "local_function",
            SymbolKind::Local => "local",
            SymbolKind::Parameter => "parameter",
            SymbolKind::TypeParameter => "type_parameter",
            SymbolKind::NamedType => "named_type",
            SymbolKind::Member => "member",
        }
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Enum
                | SymbolKind::Record
                | SymbolKind::Delegate
                | SymbolKind::NamedType
        )
    }

    /// Namespace, type and member declarations. Scoped symbols (locals,
    /// parameters, ...) resolve by position but are never looked up by name.
    pub fn is_source_declaration(self) -> bool {
        !matches!(
            self,
            SymbolKind::LocalFunction
                | SymbolKind::Local
                | SymbolKind::Parameter
                | SymbolKind::TypeParameter
                | SymbolKind::NamedType
                | SymbolKind::Member
        )
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared accessibility, named the way the compiler reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Accessibility {
    Public,
    Private,
    Protected,
    Internal,
    ProtectedOrInternal,
    ProtectedAndInternal,
    NotApplicable,
}

impl Accessibility {
    /// Accessibility from the modifier keywords of a declaration, if any were written.
    pub fn from_modifiers<'a>(modifiers: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let (mut public, mut private, mut protected, mut internal) = (false, false, false, false);
        for m in modifiers {
            match m {
                "public" => public = true,
                "private" => private = true,
                "protected" => protected = true,
                "internal" => internal = true,
                _ => {}
            }
        }
        match (public, private, protected, internal) {
            (true, _, _, _) => Some(Accessibility::Public),
            (_, true, true, _) => Some(Accessibility::ProtectedAndInternal),
            (_, _, true, true) => Some(Accessibility::ProtectedOrInternal),
            (_, true, _, _) => Some(Accessibility::Private),
            (_, _, true, _) => Some(Accessibility::Protected),
            (_, _, _, true) => Some(Accessibility::Internal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Accessibility::Public => "Public",
            Accessibility::Private => "Private",
            Accessibility::Protected => "Protected",
            Accessibility::Internal => "Internal",
            Accessibility::ProtectedOrInternal => "ProtectedOrInternal",
            Accessibility::ProtectedAndInternal => "ProtectedAndInternal",
            Accessibility::NotApplicable => "NotApplicable",
        }
    }
}

impl fmt::Display for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a symbol's name is written in source. Positions are 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub path: PathBuf,
    pub span: TextSpan,
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub container: Option<SymbolId>,
    pub accessibility: Accessibility,
    /// In-source locations in enumeration order. Empty for metadata symbols.
    pub locations: Vec<Location>,
    /// Declaring project; `None` for metadata symbols.
    pub project: Option<String>,
}

impl Symbol {
    pub fn is_in_source(&self) -> bool {
        !self.locations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceRole {
    Declaration,
    Reference,
}

/// An identifier token that names a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub span: TextSpan,
    pub symbol: SymbolId,
    pub role: OccurrenceRole,
}

/// Full syntactic extent of a declaration (leading indentation included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeclExtent {
    pub span: TextSpan,
    pub symbol: SymbolId,
}

#[derive(Debug, Clone)]
pub struct LineTable {
    /// Byte offset where each line's content starts.
    starts: Vec<usize>,
    /// Byte offset where each line's content ends (terminator excluded).
    ends: Vec<usize>,
}

impl LineTable {
    pub fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut starts = vec![0usize];
        let mut ends = Vec::new();
        let mut i = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'\r' => {
                    ends.push(i);
                    if bytes.get(i + 1) == Some(&b'\n') {
                        i += 1;
                    }
                    starts.push(i + 1);
                }
                b'\n' => {
                    ends.push(i);
                    starts.push(i + 1);
                }
                _ => {}
            }
            i += 1;
        }
        ends.push(bytes.len());
        Self { starts, ends }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    pub fn line_range(&self, line: usize) -> Option<(usize, usize)> {
        Some((*self.starts.get(line)?, *self.ends.get(line)?))
    }

    /// Line containing `offset`; offsets inside a terminator belong to the line it ends.
    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset).saturating_sub(1)
    }
}

/// One source file of a loaded tree.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub project: String,
    pub text: String,
    lines: LineTable,
    /// Sorted by start offset; identifier tokens never overlap.
    pub occurrences: Vec<Occurrence>,
    /// Sorted by (start ascending, end descending) so nested extents follow their parents.
    pub extents: Vec<DeclExtent>,
}

impl Document {
    pub fn new(path: PathBuf, project: String, text: String) -> Self {
        let lines = LineTable::new(&text);
        Self {
            path,
            project,
            text,
            lines,
            occurrences: Vec::new(),
            extents: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line_count(&self) -> usize {
        self.lines.line_count()
    }

    pub fn line_text(&self, line: usize) -> Option<&str> {
        let (s, e) = self.lines.line_range(line)?;
        self.text.get(s..e)
    }

    /// Length of `line` in characters, terminator excluded.
    pub fn line_len(&self, line: usize) -> Option<usize> {
        self.line_text(line).map(|t| t.chars().count())
    }

    /// Byte offset of a 0-based (line, column). `column` may equal the line length.
    pub fn offset_of(&self, line: usize, column: usize) -> Option<usize> {
        let (start, _) = self.lines.line_range(line)?;
        let text = self.line_text(line)?;
        if column == 0 {
            return Some(start);
        }
        let mut chars = text.char_indices().skip(column);
        match chars.next() {
            Some((byte, _)) => Some(start + byte),
            None if text.chars().count() == column => Some(start + text.len()),
            None => None,
        }
    }

    pub fn position_of(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = self.lines.line_of(offset);
        let (start, end) = self.lines.line_range(line).unwrap_or((0, 0));
        let upto = offset.min(end).max(start);
        let column = self.text.get(start..upto).map(|s| s.chars().count()).unwrap_or(0);
        Position {
            line: line as u32,
            column: column as u32,
        }
    }

    pub fn location(&self, span: TextSpan) -> Location {
        Location {
            path: self.path.clone(),
            span,
            start: self.position_of(span.start),
            end: self.position_of(span.end),
        }
    }

    /// Identifier occurrence under the cursor, preferring one that contains the
    /// offset over one that merely ends at it.
    pub fn occurrence_at(&self, offset: usize) -> Option<&Occurrence> {
        let idx = self.occurrences.partition_point(|o| o.span.start <= offset);
        let before = idx.checked_sub(1).map(|i| &self.occurrences[i])?;
        if before.span.contains(offset) || before.span.end == offset {
            return Some(before);
        }
        None
    }

    /// Innermost declaration extent containing `offset`.
    pub fn innermost_extent(&self, offset: usize) -> Option<&DeclExtent> {
        let idx = self.extents.partition_point(|e| e.span.start <= offset);
        self.extents[..idx].iter().rev().find(|e| e.span.contains(offset))
    }

    pub fn finish(&mut self) {
        self.occurrences.sort_by_key(|o| o.span.start);
        self.occurrences.dedup_by_key(|o| o.span.start);
        self.extents
            .sort_by(|a, b| a.span.start.cmp(&b.span.start).then(b.span.end.cmp(&a.span.end)));
    }
}

/// Comparison key for document and tree paths: case-insensitive, `/`-separated.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub path: PathBuf,
    pub document_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_table_handles_mixed_terminators() {
        let doc = Document::new("a.cs".into(), "p".into(), "ab\r\ncd\ref\n".to_string());
        assert_eq!(doc.line_count(), 4);
        assert_eq!(doc.line_text(0), Some("ab"));
        assert_eq!(doc.line_text(1), Some("cd"));
        assert_eq!(doc.line_text(2), Some("ef"));
        assert_eq!(doc.line_text(3), Some(""));
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let doc = Document::new("a.cs".into(), "p".into(), "é = 1;\nx".to_string());
        assert_eq!(doc.offset_of(0, 1), Some(2));
        assert_eq!(doc.line_len(0), Some(6));
        // End-of-line is addressable, one past it is not.
        assert_eq!(doc.offset_of(0, 6), Some(7));
        assert_eq!(doc.offset_of(0, 7), None);
        assert_eq!(doc.position_of(2), Position { line: 0, column: 1 });
        assert_eq!(doc.position_of(9), Position { line: 1, column: 1 });
    }

    #[test]
    fn occurrence_lookup_accepts_touching_end() {
        let mut doc = Document::new("a.cs".into(), "p".into(), "Foo Bar".to_string());
        doc.occurrences.push(Occurrence {
            span: TextSpan::new(4, 7),
            symbol: SymbolId(1),
            role: OccurrenceRole::Reference,
        });
        doc.occurrences.push(Occurrence {
            span: TextSpan::new(0, 3),
            symbol: SymbolId(0),
            role: OccurrenceRole::Declaration,
        });
        doc.finish();
        assert_eq!(doc.occurrence_at(1).map(|o| o.symbol), Some(SymbolId(0)));
        assert_eq!(doc.occurrence_at(3).map(|o| o.symbol), Some(SymbolId(0)));
        assert_eq!(doc.occurrence_at(4).map(|o| o.symbol), Some(SymbolId(1)));
        assert_eq!(doc.occurrence_at(7).map(|o| o.symbol), Some(SymbolId(1)));
    }

    #[test]
    fn innermost_extent_prefers_nested_declaration() {
        let mut doc = Document::new("a.cs".into(), "p".into(), " ".repeat(40));
        doc.extents.push(DeclExtent { span: TextSpan::new(0, 40), symbol: SymbolId(0) });
        doc.extents.push(DeclExtent { span: TextSpan::new(10, 20), symbol: SymbolId(1) });
        doc.extents.push(DeclExtent { span: TextSpan::new(22, 30), symbol: SymbolId(2) });
        doc.finish();
        assert_eq!(doc.innermost_extent(15).map(|e| e.symbol), Some(SymbolId(1)));
        assert_eq!(doc.innermost_extent(21).map(|e| e.symbol), Some(SymbolId(0)));
        assert_eq!(doc.innermost_extent(25).map(|e| e.symbol), Some(SymbolId(2)));
        assert!(doc.innermost_extent(40).is_none());
    }

    #[test]
    fn path_keys_ignore_case_and_separator() {
        assert_eq!(path_key(Path::new("C:\\Src\\A.cs")), path_key(Path::new("c:/src/a.CS")));
    }

    #[test]
    fn accessibility_from_modifier_combinations() {
        assert_eq!(Accessibility::from_modifiers(["public", "static"]), Some(Accessibility::Public));
        assert_eq!(
            Accessibility::from_modifiers(["protected", "internal"]),
            Some(Accessibility::ProtectedOrInternal)
        );
        assert_eq!(
            Accessibility::from_modifiers(["private", "protected"]),
            Some(Accessibility::ProtectedAndInternal)
        );
        assert_eq!(Accessibility::from_modifiers(["static"]), None);
    }
}
