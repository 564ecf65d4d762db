use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::LocationPolicy;
use crate::error::{LoadError, LoadWarning, QueryError, ResolveError};
use crate::model::{Accessibility, SymbolId, SymbolKind};
use crate::resolver::{resolve_at, Resolution};
use crate::session::SessionCache;
use crate::snapshot::TreeSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRequest {
    ByName { name: String, case_sensitive: bool },
    /// 0-based line and column.
    ByPosition { document: PathBuf, line: u32, column: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Name,
    Position,
}

/// Wire shape of one query: `{ tree, mode, name?, document?, line?, column? }`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryInput {
    pub tree: String,
    #[serde(default)]
    pub mode: Option<QueryMode>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub document: Option<PathBuf>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub all_locations: bool,
}

impl QueryInput {
    pub fn to_request(&self) -> Result<QueryRequest, QueryError> {
        let mode = match self.mode {
            Some(m) => m,
            None if self.name.is_some() => QueryMode::Name,
            None if self.document.is_some() => QueryMode::Position,
            None => return Err(QueryError::configuration("query needs either `name` or `document`/`line`/`column`")),
        };
        match mode {
            QueryMode::Name => Ok(QueryRequest::ByName {
                name: self
                    .name
                    .clone()
                    .ok_or_else(|| QueryError::configuration("mode `name` requires `name`"))?,
                case_sensitive: !self.ignore_case,
            }),
            QueryMode::Position => match (&self.document, self.line, self.column) {
                (Some(document), Some(line), Some(column)) => Ok(QueryRequest::ByPosition {
                    document: document.clone(),
                    line,
                    column,
                }),
                _ => Err(QueryError::configuration(
                    "mode `position` requires `document`, `line` and `column`",
                )),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultKind {
    Found,
    NotFound,
    ExternalOnly,
    Error,
}

/// One declaration site. Positions are 0-based; `output` converts them for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub symbol: String,
    pub container: String,
    pub kind: SymbolKind,
    pub accessibility: Accessibility,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSymbol {
    pub name: String,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Configuration,
    ProviderLoad,
    DocumentNotFound,
    LineOutOfRange,
    ColumnOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl QueryFailure {
    fn from_error(err: &QueryError) -> Self {
        let category = match err {
            QueryError::Configuration(_) => FailureCategory::Configuration,
            QueryError::Load(LoadError::NotFound(_) | LoadError::Unsupported(_)) => FailureCategory::Configuration,
            QueryError::Load(_) => FailureCategory::ProviderLoad,
            QueryError::Resolve(ResolveError::DocumentNotFound(_)) => FailureCategory::DocumentNotFound,
            QueryError::Resolve(ResolveError::LineOutOfRange { .. }) => FailureCategory::LineOutOfRange,
            QueryError::Resolve(ResolveError::ColumnOutOfRange { .. }) => FailureCategory::ColumnOutOfRange,
        };
        Self {
            category,
            message: err.to_string(),
        }
    }
}

/// Normalized result of one query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub kind: ResultKind,
    pub declarations: Vec<Declaration>,
    pub external: Option<ExternalSymbol>,
    pub failure: Option<QueryFailure>,
    /// Total non-fatal load warnings for the tree.
    pub warning_count: usize,
    /// The first few warning texts.
    pub warnings: Vec<String>,
}

impl QueryOutcome {
    fn new(kind: ResultKind) -> Self {
        Self {
            kind,
            declarations: Vec::new(),
            external: None,
            failure: None,
            warning_count: 0,
            warnings: Vec::new(),
        }
    }

    fn with_warnings(mut self, warnings: &[LoadWarning], limit: usize) -> Self {
        self.warning_count = warnings.len();
        self.warnings = warnings.iter().take(limit).map(ToString::to_string).collect();
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResultKind::Error
    }
}

/// Runs single queries against the session cache's current snapshot.
pub struct QueryDispatcher {
    cache: SessionCache,
    policy: LocationPolicy,
    warning_limit: usize,
}

impl QueryDispatcher {
    pub fn new(cache: SessionCache, policy: LocationPolicy) -> Self {
        Self {
            cache,
            policy,
            warning_limit: 10,
        }
    }

    pub fn with_warning_limit(mut self, limit: usize) -> Self {
        self.warning_limit = limit;
        self
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SessionCache {
        &mut self.cache
    }

    pub fn query(&mut self, tree: &Path, request: &QueryRequest) -> QueryOutcome {
        self.query_with_policy(tree, request, self.policy)
    }

    /// Never fails: load and validation errors come back as `ResultKind::Error`.
    pub fn query_with_policy(&mut self, tree: &Path, request: &QueryRequest, policy: LocationPolicy) -> QueryOutcome {
        let limit = self.warning_limit;
        match self.try_query(tree, request, policy) {
            Ok(outcome) => outcome,
            Err((err, warnings)) => {
                tracing::debug!(error = %err, "query failed");
                self.reject(err).with_warnings(&warnings, limit)
            }
        }
    }

    /// Error outcome for a request that never reached the cache.
    pub fn reject(&self, err: QueryError) -> QueryOutcome {
        let mut outcome = QueryOutcome::new(ResultKind::Error);
        outcome.failure = Some(QueryFailure::from_error(&err));
        outcome
    }

    fn try_query(
        &mut self,
        tree: &Path,
        request: &QueryRequest,
        policy: LocationPolicy,
    ) -> Result<QueryOutcome, (QueryError, Vec<LoadWarning>)> {
        if tree.as_os_str().is_empty() {
            return Err((QueryError::configuration("tree path is empty"), vec![]));
        }
        if let QueryRequest::ByName { name, .. } = request {
            if name.trim().is_empty() {
                return Err((QueryError::configuration("symbol name is empty"), vec![]));
            }
        }

        let snapshot = self.cache.get_or_load(tree).map_err(|e: LoadError| {
            let warnings = e.warnings().to_vec();
            (QueryError::from(e), warnings)
        })?;

        let outcome = match request {
            QueryRequest::ByName { name, case_sensitive } => by_name(&snapshot, name, *case_sensitive, policy),
            QueryRequest::ByPosition { document, line, column } => {
                let document = document_path(snapshot.path(), document);
                let resolution = resolve_at(&snapshot, &document, *line, *column)
                    .map_err(|e| (QueryError::from(e), snapshot.warnings().to_vec()))?;
                by_resolution(&snapshot, resolution, policy)
            }
        };
        Ok(outcome.with_warnings(snapshot.warnings(), self.warning_limit))
    }
}

/// Relative document paths are tried against the working directory, then the tree root.
fn document_path(tree: &Path, document: &Path) -> PathBuf {
    if document.is_absolute() || document.exists() {
        return document.to_path_buf();
    }
    let root = if tree.is_dir() { tree } else { tree.parent().unwrap_or(tree) };
    root.join(document)
}

fn declarations(snapshot: &TreeSnapshot, id: SymbolId, policy: LocationPolicy) -> Vec<Declaration> {
    let sym = snapshot.symbol(id);
    let take = match policy {
        LocationPolicy::FirstInSource => 1,
        LocationPolicy::AllInSource => usize::MAX,
    };
    sym.locations
        .iter()
        .take(take)
        .map(|loc| Declaration {
            symbol: sym.name.clone(),
            container: snapshot.container_name(id).to_string(),
            kind: sym.kind,
            accessibility: sym.accessibility,
            file: loc.path.clone(),
            line: loc.start.line,
            column: loc.start.column,
        })
        .collect()
}

fn external(snapshot: &TreeSnapshot, id: SymbolId) -> QueryOutcome {
    let sym = snapshot.symbol(id);
    let mut outcome = QueryOutcome::new(ResultKind::ExternalOnly);
    outcome.external = Some(ExternalSymbol {
        name: sym.name.clone(),
        kind: sym.kind,
    });
    outcome
}

fn by_name(snapshot: &TreeSnapshot, name: &str, case_sensitive: bool, policy: LocationPolicy) -> QueryOutcome {
    let hits = snapshot.index().lookup_by_name(name, case_sensitive);
    if hits.is_empty() {
        if let Some(&ext) = snapshot.index().externals_named(name, case_sensitive).first() {
            return external(snapshot, ext);
        }
    }

    let mut outcome = QueryOutcome::new(ResultKind::Found);
    outcome.declarations = hits.iter().flat_map(|&id| declarations(snapshot, id, policy)).collect();
    outcome
}

fn by_resolution(snapshot: &TreeSnapshot, resolution: Resolution, policy: LocationPolicy) -> QueryOutcome {
    match resolution {
        Resolution::NotFound => QueryOutcome::new(ResultKind::NotFound),
        Resolution::ExternalOnly(id) => external(snapshot, id),
        Resolution::Found(id) => {
            let mut outcome = QueryOutcome::new(ResultKind::Found);
            outcome.declarations = declarations(snapshot, id, policy);
            outcome
        }
    }
}
