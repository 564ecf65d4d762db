use std::collections::HashMap;

use crate::error::LoadError;
use crate::model::{Document, Symbol, SymbolId};

/// Name → declarations over one snapshot.
///
/// Only source declarations with at least one in-source location are indexed by name;
/// metadata symbols are kept aside so a miss can still be reported as "external".
#[derive(Debug, Default)]
pub struct SymbolIndex {
    by_name: HashMap<String, Vec<SymbolId>>,
    by_lower: HashMap<String, Vec<SymbolId>>,
    external_by_name: HashMap<String, Vec<SymbolId>>,
    external_by_lower: HashMap<String, Vec<SymbolId>>,
    indexed: usize,
}

impl SymbolIndex {
    /// Walk every symbol once, checking that ids, containers and occurrences are consistent.
    pub fn build(symbols: &[Symbol], documents: &[Document]) -> Result<Self, LoadError> {
        let len = symbols.len();
        let in_range = |id: SymbolId| id.index() < len;

        let mut index = SymbolIndex::default();
        for (i, s) in symbols.iter().enumerate() {
            if s.id.index() != i {
                return Err(LoadError::Inconsistent(format!(
                    "symbol '{}' has id {} at position {i}",
                    s.name, s.id.0
                )));
            }
            if let Some(c) = s.container.filter(|c| !in_range(*c)) {
                return Err(LoadError::Inconsistent(format!(
                    "symbol '{}' names missing container {}",
                    s.name, c.0
                )));
            }

            let (exact, lower) = if s.is_in_source() {
                if !s.kind.is_source_declaration() {
                    continue;
                }
                index.indexed += 1;
                (&mut index.by_name, &mut index.by_lower)
            } else {
                (&mut index.external_by_name, &mut index.external_by_lower)
            };
            exact.entry(s.name.clone()).or_default().push(s.id);
            lower.entry(s.name.to_lowercase()).or_default().push(s.id);
        }

        for d in documents {
            let dangling = d
                .occurrences
                .iter()
                .map(|o| o.symbol)
                .chain(d.extents.iter().map(|e| e.symbol))
                .find(|id| !in_range(*id));
            if let Some(id) = dangling {
                return Err(LoadError::Inconsistent(format!(
                    "{} references missing symbol {}",
                    d.path.display(),
                    id.0
                )));
            }
        }

        Ok(index)
    }

    /// Exact-match lookup, in provider enumeration order.
    pub fn lookup_by_name(&self, name: &str, case_sensitive: bool) -> &[SymbolId] {
        lookup(&self.by_name, &self.by_lower, name, case_sensitive)
    }

    /// Metadata symbols referenced in the tree under `name`.
    pub fn externals_named(&self, name: &str, case_sensitive: bool) -> &[SymbolId] {
        lookup(&self.external_by_name, &self.external_by_lower, name, case_sensitive)
    }

    /// Number of declarations reachable by name.
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }
}

fn lookup<'a>(
    exact: &'a HashMap<String, Vec<SymbolId>>,
    lower: &'a HashMap<String, Vec<SymbolId>>,
    name: &str,
    case_sensitive: bool,
) -> &'a [SymbolId] {
    let hit = if case_sensitive {
        exact.get(name)
    } else {
        lower.get(&name.to_lowercase())
    };
    hit.map(Vec::as_slice).unwrap_or(&[])
}
