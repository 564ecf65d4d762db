use anyhow::{Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Build-output, VCS and IDE directories that never hold compile items.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".vs",
    ".vscode",
    ".idea",
    "bin",
    "obj",
    "node_modules",
    "packages",
    "TestResults",
];

fn default_overrides(root: &Path, exclude_dir_names: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(root);

    // `!` marks an ignore glob; bare globs would act as a whitelist.
    for d in SKIPPED_DIRS {
        ob.add(&format!("!**/{d}/"))?;
    }

    for d in exclude_dir_names {
        let d = d.trim().trim_matches('/');
        if d.is_empty() {
            continue;
        }
        ob.add(&format!("!**/{d}/"))?;
    }

    Ok(ob.build()?)
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    /// Lowercase extension without the dot, e.g. `cs`.
    pub extension: String,
    pub exclude_dir_names: Vec<String>,
}

impl ScanOptions {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.to_ascii_lowercase(),
            exclude_dir_names: vec![],
        }
    }

    pub fn excluding(mut self, names: &[String]) -> Self {
        self.exclude_dir_names = names.to_vec();
        self
    }
}

/// Every file below `opts.root` with the requested extension, sorted by path.
///
/// Like MSBuild default items: `.gitignore` and hidden-file rules do not apply, only the
/// skipped and excluded directory names.
pub fn scan_files(opts: &ScanOptions) -> Result<Vec<FileEntry>> {
    let meta = std::fs::metadata(&opts.root)
        .with_context(|| format!("Scan root does not exist: {}", opts.root.display()))?;
    if !meta.is_dir() {
        return Ok(vec![]);
    }

    let overrides = default_overrides(&opts.root, &opts.exclude_dir_names)?;
    let walker = WalkBuilder::new(&opts.root)
        .standard_filters(false)
        .overrides(overrides)
        .build();

    let mut entries = Vec::new();
    for item in walker {
        let Ok(dent) = item else { continue };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();
        let ext_matches = abs_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&opts.extension))
            .unwrap_or(false);
        if !ext_matches {
            continue;
        }

        entries.push(FileEntry { abs_path });
    }

    entries.sort_by(|a, b| a.abs_path.cmp(&b.abs_path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, "class X {}").unwrap();
    }

    #[test]
    fn skips_build_output_and_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "A.cs");
        touch(dir.path(), "Sub/B.CS");
        touch(dir.path(), "bin/Debug/Gen.cs");
        touch(dir.path(), "obj/X.AssemblyInfo.cs");
        touch(dir.path(), "Generated/C.cs");
        touch(dir.path(), "notes.txt");

        let opts = ScanOptions::new(dir.path(), "cs").excluding(&["Generated".to_string()]);
        let found: Vec<String> = scan_files(&opts)
            .unwrap()
            .into_iter()
            .map(|e| e.abs_path.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(found, vec!["A.cs".to_string(), "Sub/B.CS".to_string()]);
    }

    #[test]
    fn gitignored_and_hidden_sources_are_still_compile_items() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".git/hooks/Hook.cs");
        std::fs::write(dir.path().join(".gitignore"), "Generated/\n.hidden/\n").unwrap();
        touch(dir.path(), "A.cs");
        touch(dir.path(), "Generated/Api.cs");
        touch(dir.path(), ".hidden/Secret.cs");

        let found: Vec<String> = scan_files(&ScanOptions::new(dir.path(), "cs"))
            .unwrap()
            .into_iter()
            .map(|e| e.abs_path.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(
            found,
            vec![".hidden/Secret.cs".to_string(), "A.cs".to_string(), "Generated/Api.cs".to_string()]
        );
    }
}
