use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ScanConfig;
use crate::error::{LoadError, LoadWarning};
use crate::inspector::{build_source_model, parse_source, ParsedFile};
use crate::model::{path_key, Document, ProjectInfo, Symbol};
use crate::workspace::discover_projects;

/// Everything a provider hands over for one tree: the raw material of a snapshot.
#[derive(Debug, Default)]
pub struct LoadedTree {
    pub projects: Vec<ProjectInfo>,
    pub documents: Vec<Document>,
    /// Dense: `symbols[i].id == SymbolId(i)`, in provider enumeration order.
    pub symbols: Vec<Symbol>,
    pub warnings: Vec<LoadWarning>,
}

/// Shared stop signal for one load. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct LoadCancel(Arc<AtomicBool>);

impl LoadCancel {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once `cancel` has been called.
    pub fn check(&self, tree_path: &Path) -> Result<(), LoadError> {
        if self.is_cancelled() {
            return Err(LoadError::Cancelled(tree_path.to_path_buf()));
        }
        Ok(())
    }
}

/// Given a tree descriptor, produce documents and declared symbols with spans.
///
/// Long-running providers should poll `cancel` and stop early once it is set.
pub trait SourceModelProvider: Send + Sync {
    fn load(&self, tree_path: &Path, cancel: &LoadCancel) -> Result<LoadedTree, LoadError>;
}

/// C# trees (`.sln`, `.slnx`, `.csproj`, or a directory of sources).
#[derive(Debug, Clone, Default)]
pub struct CSharpProvider {
    scan: ScanConfig,
}

impl CSharpProvider {
    pub fn new(scan: ScanConfig) -> Self {
        Self { scan }
    }
}

enum FileOutcome {
    Parsed(ParsedFile, Vec<LoadWarning>),
    Skipped(LoadWarning),
}

fn read_and_parse(path: PathBuf, project: String, max_bytes: u64) -> FileOutcome {
    let bytes = match std::fs::metadata(&path) {
        Ok(m) if m.len() > max_bytes => {
            return FileOutcome::Skipped(LoadWarning::at(
                &path,
                format!("skipped: {} bytes exceeds the {max_bytes} byte limit", m.len()),
            ))
        }
        Ok(_) => std::fs::read(&path),
        Err(e) => Err(e),
    };
    let bytes = match bytes {
        Ok(b) => b,
        Err(e) => return FileOutcome::Skipped(LoadWarning::at(&path, format!("skipped: {e}"))),
    };

    let mut warnings = Vec::new();
    let text = match String::from_utf8(bytes) {
        Ok(t) => t,
        Err(e) => {
            warnings.push(LoadWarning::at(&path, "not valid UTF-8; decoded lossily"));
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };
    // A BOM would shift every column on the first line.
    let text = match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    };

    match parse_source(path.clone(), project, text) {
        Ok(parsed) => {
            if parsed.syntax_errors > 0 {
                warnings.push(LoadWarning::at(
                    &path,
                    format!("{} syntax error(s); symbols collected best-effort", parsed.syntax_errors),
                ));
            }
            FileOutcome::Parsed(parsed, warnings)
        }
        Err(e) => FileOutcome::Skipped(LoadWarning::at(&path, format!("parse failed: {e}"))),
    }
}

impl SourceModelProvider for CSharpProvider {
    fn load(&self, tree_path: &Path, cancel: &LoadCancel) -> Result<LoadedTree, LoadError> {
        let discovery = discover_projects(tree_path, &self.scan)?;
        cancel.check(tree_path)?;
        let mut warnings = discovery.warnings;

        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        let mut projects = Vec::with_capacity(discovery.projects.len());
        for spec in discovery.projects {
            for src in spec.sources {
                if seen.insert(path_key(&src)) {
                    jobs.push((src, spec.name.clone()));
                }
            }
            projects.push(ProjectInfo {
                name: spec.name,
                path: spec.path,
                document_count: 0,
            });
        }

        let max_bytes = self.scan.effective_max_file_bytes();
        let outcomes: Vec<FileOutcome> = jobs
            .into_par_iter()
            .filter(|_| !cancel.is_cancelled())
            .map(|(path, project)| read_and_parse(path, project, max_bytes))
            .collect();
        cancel.check(tree_path)?;

        let mut parsed = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                FileOutcome::Parsed(file, w) => {
                    warnings.extend(w);
                    parsed.push(file);
                }
                FileOutcome::Skipped(w) => warnings.push(w),
            }
        }
        // Counted after parsing so skipped files are not included.
        for p in &mut projects {
            p.document_count = parsed.iter().filter(|f| f.project == p.name).count();
        }

        let model = build_source_model(&parsed);
        cancel.check(tree_path)?;
        for w in &warnings {
            tracing::warn!("{w}");
        }
        tracing::info!(
            tree = %tree_path.display(),
            projects = projects.len(),
            documents = model.documents.len(),
            symbols = model.symbols.len(),
            warnings = warnings.len(),
            "source model built"
        );

        Ok(LoadedTree {
            projects,
            documents: model.documents,
            symbols: model.symbols,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, text: &[u8]) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, text).unwrap();
    }

    #[test]
    fn loads_directory_tree_with_warnings() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "A.cs", b"class Foo { void Bar() {} }");
        write(dir.path(), "Broken.cs", b"class Broken { void M( }");
        write(dir.path(), "Latin1.cs", b"// caf\xe9\nclass Cafe {}");
        write(dir.path(), "Big.cs", format!("class Big {{}}\n{}", "//\n".repeat(64)).as_bytes());

        let provider = CSharpProvider::new(ScanConfig {
            max_file_bytes: 100,
            ..ScanConfig::default()
        });
        let tree = provider.load(dir.path(), &LoadCancel::default()).unwrap();

        let names: Vec<&str> = tree
            .documents
            .iter()
            .map(|d| d.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["A.cs", "Broken.cs", "Latin1.cs"]);
        assert_eq!(tree.projects.len(), 1);
        assert_eq!(tree.projects[0].document_count, 3);

        let text: Vec<String> = tree.warnings.iter().map(|w| w.to_string()).collect();
        assert!(text.iter().any(|w| w.contains("Big.cs") && w.contains("limit")), "{text:?}");
        assert!(text.iter().any(|w| w.contains("Broken.cs") && w.contains("syntax")), "{text:?}");
        assert!(text.iter().any(|w| w.contains("Latin1.cs") && w.contains("UTF-8")), "{text:?}");

        assert!(tree.symbols.iter().any(|s| s.name == "Cafe"));
        for (i, s) in tree.symbols.iter().enumerate() {
            assert_eq!(s.id.index(), i);
        }
    }

    #[test]
    fn shared_file_is_loaded_once() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "One/One.csproj",
            br#"<Project Sdk="Microsoft.NET.Sdk"><ItemGroup><Compile Include="../Shared/*.cs" /></ItemGroup></Project>"#,
        );
        write(
            dir.path(),
            "Two/Two.csproj",
            br#"<Project Sdk="Microsoft.NET.Sdk"><ItemGroup><Compile Include="../Shared/*.cs" /></ItemGroup></Project>"#,
        );
        write(dir.path(), "Shared/Contract.cs", b"interface IContract {}");

        let tree = CSharpProvider::default().load(dir.path(), &LoadCancel::default()).unwrap();
        assert_eq!(tree.documents.len(), 1);
        assert_eq!(tree.documents[0].project, "One");
        assert_eq!(tree.symbols.iter().filter(|s| s.name == "IContract").count(), 1);
    }

    #[test]
    fn cancelled_load_stops_with_cancelled() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "A.cs", b"class Foo {}");

        let cancel = LoadCancel::default();
        cancel.cancel();
        let err = CSharpProvider::default().load(dir.path(), &cancel).unwrap_err();
        assert!(matches!(err, LoadError::Cancelled(_)), "{err:?}");
    }
}
