use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{LoadError, LoadWarning};
use crate::index::SymbolIndex;
use crate::model::{path_key, Document, ProjectInfo, Symbol, SymbolId};
use crate::provider::LoadedTree;

/// Immutable view of one loaded tree. Replaced wholesale on reload, never mutated.
#[derive(Debug)]
pub struct TreeSnapshot {
    path: PathBuf,
    projects: Vec<ProjectInfo>,
    documents: Vec<Document>,
    doc_by_key: HashMap<String, usize>,
    symbols: Vec<Symbol>,
    index: SymbolIndex,
    warnings: Vec<LoadWarning>,
}

impl TreeSnapshot {
    /// Build the index and document table; fails atomically on an inconsistent model.
    pub fn build(path: PathBuf, tree: LoadedTree) -> Result<Self, LoadError> {
        let index = SymbolIndex::build(&tree.symbols, &tree.documents)?;
        let doc_by_key = tree
            .documents
            .iter()
            .enumerate()
            .map(|(i, d)| (path_key(d.path()), i))
            .collect();
        Ok(Self {
            path,
            projects: tree.projects,
            documents: tree.documents,
            doc_by_key,
            symbols: tree.symbols,
            index,
            warnings: tree.warnings,
        })
    }

    /// Canonical tree path this snapshot was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn projects(&self) -> &[ProjectInfo] {
        &self.projects
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn index(&self) -> &SymbolIndex {
        &self.index
    }

    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    /// Document whose canonical path equals `path`, ignoring case.
    pub fn document(&self, path: &Path) -> Option<&Document> {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.doc_by_key
            .get(&path_key(&canonical))
            .or_else(|| self.doc_by_key.get(&path_key(path)))
            .map(|&i| &self.documents[i])
    }

    /// Name of the nearest enclosing type, or `global` when there is none.
    pub fn container_name(&self, id: SymbolId) -> &str {
        let mut cur = self.symbol(id).container;
        while let Some(c) = cur {
            let s = self.symbol(c);
            if s.kind.is_type() {
                return &s.name;
            }
            cur = s.container;
        }
        "global"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inspector::{build_source_model, parse_source};

    pub(crate) fn snapshot_of(files: &[(&str, &str)]) -> TreeSnapshot {
        let parsed: Vec<_> = files
            .iter()
            .map(|(p, src)| parse_source(PathBuf::from(p), "Test".into(), src.to_string()).unwrap())
            .collect();
        let model = build_source_model(&parsed);
        let tree = LoadedTree {
            projects: vec![],
            documents: model.documents,
            symbols: model.symbols,
            warnings: vec![],
        };
        TreeSnapshot::build(PathBuf::from("/tree"), tree).unwrap()
    }

    #[test]
    fn container_is_nearest_type_or_global() {
        let snap = snapshot_of(&[(
            "/tree/A.cs",
            "namespace N { class Outer { class Inner { void M() {} } } }\nclass Top {}",
        )]);
        let id = |name: &str| snap.index().lookup_by_name(name, true)[0];
        assert_eq!(snap.container_name(id("M")), "Inner");
        assert_eq!(snap.container_name(id("Inner")), "Outer");
        assert_eq!(snap.container_name(id("Outer")), "global");
        assert_eq!(snap.container_name(id("Top")), "global");
    }

    #[test]
    fn documents_match_ignoring_case() {
        let snap = snapshot_of(&[("/tree/Src/A.cs", "class A {}")]);
        assert!(snap.document(Path::new("/TREE/src/a.cs")).is_some());
        assert!(snap.document(Path::new("/tree/Src/B.cs")).is_none());
    }
}
