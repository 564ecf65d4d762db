use std::path::Path;

use crate::error::ResolveError;
use crate::model::SymbolId;
use crate::snapshot::TreeSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The symbol at the position; its declaration is what the caller navigates to.
    Found(SymbolId),
    /// Whitespace, punctuation, literals: nothing is declared or referenced there.
    NotFound,
    /// A symbol from compiled metadata, with no location in the tree.
    ExternalOnly(SymbolId),
}

/// Map a 0-based (line, column) in `document` to the symbol under it.
///
/// Identifier occurrences win over declaration extents; a reference resolves to the
/// symbol it names, whose declaration may be in another document.
pub fn resolve_at(snapshot: &TreeSnapshot, document: &Path, line: u32, column: u32) -> Result<Resolution, ResolveError> {
    let doc = snapshot
        .document(document)
        .ok_or_else(|| ResolveError::DocumentNotFound(document.to_path_buf()))?;

    let line_count = doc.line_count();
    if line as usize >= line_count {
        return Err(ResolveError::LineOutOfRange { line, line_count });
    }
    let line_length = doc.line_len(line as usize).unwrap_or(0);
    if column as usize > line_length {
        return Err(ResolveError::ColumnOutOfRange {
            line,
            column,
            line_length,
        });
    }
    let offset = doc
        .offset_of(line as usize, column as usize)
        .ok_or(ResolveError::ColumnOutOfRange {
            line,
            column,
            line_length,
        })?;

    let hit = doc
        .occurrence_at(offset)
        .map(|o| o.symbol)
        .or_else(|| doc.innermost_extent(offset).map(|e| e.symbol));

    let resolution = match hit {
        None => Resolution::NotFound,
        Some(id) if snapshot.symbol(id).is_in_source() => Resolution::Found(id),
        Some(id) => Resolution::ExternalOnly(id),
    };
    tracing::debug!(document = %document.display(), line, column, offset, ?resolution, "resolved position");
    Ok(resolution)
}
