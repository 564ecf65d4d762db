//! Tree descriptor discovery for C# source trees.
//!
//! Handles:
//!  - Classic text solutions (`*.sln`, `Project("{type}") = "Name", "path", "{guid}"` lines)
//!  - XML solutions (`*.slnx`, `<Project Path="..."/>`)
//!  - Single projects (`*.csproj`) plus the projects they reference
//!  - Plain directories (one solution inside, else every project below, else the directory itself)
//!
//! The output is a flat list of `ProjectSpec`s, each carrying the source files that make
//! up the project's compile items, plus any non-fatal warnings met along the way.

use glob::Pattern;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::ScanConfig;
use crate::error::{LoadError, LoadWarning};
use crate::scanner::{scan_files, ScanOptions};

const SOLUTION_HEADER: &str = "Microsoft Visual Studio Solution File";
const SOLUTION_FOLDER_TYPE: &str = "2150E333-8FDC-42A3-9474-1A3956D46DE8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeDescriptor {
    Solution(PathBuf),
    SolutionXml(PathBuf),
    Project(PathBuf),
    Directory(PathBuf),
}

impl TreeDescriptor {
    pub fn path(&self) -> &Path {
        match self {
            TreeDescriptor::Solution(p)
            | TreeDescriptor::SolutionXml(p)
            | TreeDescriptor::Project(p)
            | TreeDescriptor::Directory(p) => p,
        }
    }
}

pub fn classify(path: &Path) -> Result<TreeDescriptor, LoadError> {
    let meta = std::fs::metadata(path).map_err(|_| LoadError::NotFound(path.to_path_buf()))?;
    if meta.is_dir() {
        return Ok(TreeDescriptor::Directory(path.to_path_buf()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "sln" => Ok(TreeDescriptor::Solution(path.to_path_buf())),
        "slnx" => Ok(TreeDescriptor::SolutionXml(path.to_path_buf())),
        "csproj" => Ok(TreeDescriptor::Project(path.to_path_buf())),
        _ => Err(LoadError::Unsupported(path.to_path_buf())),
    }
}

#[derive(Debug, Clone)]
pub struct ProjectSpec {
    pub name: String,
    /// The `.csproj`, or the directory for an implicit project.
    pub path: PathBuf,
    pub sources: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub projects: Vec<ProjectSpec>,
    pub warnings: Vec<LoadWarning>,
}

/// A project line from a solution file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionEntry {
    pub name: String,
    pub path: PathBuf,
}

/// MSBuild items from a `.csproj` that decide its compile set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub default_compile_items: bool,
    pub compile_include: Vec<String>,
    pub compile_remove: Vec<String>,
    pub project_references: Vec<String>,
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self {
            default_compile_items: true,
            compile_include: vec![],
            compile_remove: vec![],
            project_references: vec![],
        }
    }
}

fn canonical(p: &Path) -> PathBuf {
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

fn file_stem(p: &Path) -> String {
    p.file_stem()
        .or_else(|| p.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// MSBuild paths use `\` regardless of platform.
fn msbuild_path(raw: &str) -> String {
    raw.trim().replace('\\', "/")
}

fn read_text(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn solution_project_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*Project\("\{(?P<kind>[0-9A-Fa-f-]+)\}"\)\s*=\s*"(?P<name>[^"]*)"\s*,\s*"(?P<path>[^"]*)"\s*,\s*"\{[0-9A-Fa-f-]+\}""#,
        )
        .expect("solution project regex")
    })
}

/// Parse the project lines of a classic `.sln`. Paths are resolved against the solution's directory.
pub fn parse_solution(sln_path: &Path, text: &str) -> Result<(Vec<SolutionEntry>, Vec<LoadWarning>), LoadError> {
    if !text.contains(SOLUTION_HEADER) {
        return Err(LoadError::Malformed {
            path: sln_path.to_path_buf(),
            message: "missing solution file header".to_string(),
        });
    }

    let base = sln_path.parent().unwrap_or(Path::new("."));
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for line in text.lines() {
        let Some(caps) = solution_project_regex().captures(line) else { continue };
        if caps["kind"].eq_ignore_ascii_case(SOLUTION_FOLDER_TYPE) {
            continue;
        }

        let rel = msbuild_path(&caps["path"]);
        let name = caps["name"].to_string();
        if !rel.to_ascii_lowercase().ends_with(".csproj") {
            warnings.push(LoadWarning::at(
                sln_path,
                format!("skipping project '{name}' ({rel}): not a C# project"),
            ));
            continue;
        }

        entries.push(SolutionEntry {
            name,
            path: base.join(rel),
        });
    }

    Ok((entries, warnings))
}

/// Parse the `<Project Path="..."/>` elements of an XML `.slnx`.
pub fn parse_solution_xml(slnx_path: &Path, text: &str) -> Result<(Vec<SolutionEntry>, Vec<LoadWarning>), LoadError> {
    let base = slnx_path.parent().unwrap_or(Path::new("."));
    let malformed = |message: String| LoadError::Malformed {
        path: slnx_path.to_path_buf(),
        message,
    };

    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut warnings = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"Solution" => saw_root = true,
                    b"Project" => {
                        let mut rel: Option<String> = None;
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"Path" {
                                let v = attr.unescape_value().map_err(|err| malformed(err.to_string()))?;
                                rel = Some(msbuild_path(&v));
                            }
                        }
                        let Some(rel) = rel else { continue };
                        if !rel.to_ascii_lowercase().ends_with(".csproj") {
                            warnings.push(LoadWarning::at(slnx_path, format!("skipping {rel}: not a C# project")));
                            continue;
                        }
                        let path = base.join(&rel);
                        entries.push(SolutionEntry {
                            name: file_stem(&path),
                            path,
                        });
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(e.to_string())),
        }
    }

    if !saw_root {
        return Err(malformed("missing <Solution> root element".to_string()));
    }
    Ok((entries, warnings))
}

#[derive(Clone, Copy)]
enum TextTarget {
    EnableDefaultCompileItems,
}

/// Read the compile-item shape of a `.csproj`.
pub fn parse_project_file(text: &str) -> Result<ProjectFile, String> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut out = ProjectFile::default();
    let mut target: Option<TextTarget> = None;
    let mut saw_project = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"Project" => saw_project = true,
                    b"EnableDefaultCompileItems" => target = Some(TextTarget::EnableDefaultCompileItems),
                    b"Compile" | b"ProjectReference" => {
                        let is_compile = local.as_ref() == b"Compile";
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value().map_err(|e| e.to_string())?;
                            let items = value.split(';').map(str::trim).filter(|s| !s.is_empty()).map(String::from);
                            match (is_compile, attr.key.as_ref()) {
                                (true, b"Include") => out.compile_include.extend(items),
                                (true, b"Remove") => out.compile_remove.extend(items),
                                (false, b"Include") => out.project_references.extend(items),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some(TextTarget::EnableDefaultCompileItems) = target {
                    let v = t.unescape().map_err(|e| e.to_string())?;
                    out.default_compile_items = !v.trim().eq_ignore_ascii_case("false");
                }
            }
            Event::End(_) => target = None,
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_project {
        return Err("missing <Project> root element".to_string());
    }
    Ok(out)
}

fn is_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Compile set of one project: default items, plus explicit includes, minus removes.
fn project_sources(project_path: &Path, file: &ProjectFile, scan: &ScanConfig, warnings: &mut Vec<LoadWarning>) -> Vec<PathBuf> {
    let root = project_path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let mut sources: Vec<PathBuf> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    if file.default_compile_items {
        let opts = ScanOptions::new(&root, "cs").excluding(&scan.exclude_dir_names);
        match scan_files(&opts) {
            Ok(entries) => {
                for e in entries {
                    if seen.insert(e.abs_path.clone()) {
                        sources.push(e.abs_path);
                    }
                }
            }
            Err(e) => warnings.push(LoadWarning::at(project_path, format!("source scan failed: {e}"))),
        }
    }

    for include in &file.compile_include {
        let rel = msbuild_path(include);
        let abs = root.join(&rel);
        if is_glob(&rel) {
            let Ok(paths) = glob::glob(&abs.to_string_lossy()) else {
                warnings.push(LoadWarning::at(project_path, format!("invalid compile glob '{include}'")));
                continue;
            };
            for p in paths.flatten().filter(|p| p.is_file()) {
                let p = canonical(&p);
                if seen.insert(p.clone()) {
                    sources.push(p);
                }
            }
        } else if abs.is_file() {
            let p = canonical(&abs);
            if seen.insert(p.clone()) {
                sources.push(p);
            }
        } else {
            warnings.push(LoadWarning::at(project_path, format!("compile item not found: {include}")));
        }
    }

    let removes: Vec<Pattern> = file
        .compile_remove
        .iter()
        .filter_map(|r| Pattern::new(&root.join(msbuild_path(r)).to_string_lossy()).ok())
        .collect();
    if !removes.is_empty() {
        sources.retain(|p| !removes.iter().any(|pat| pat.matches_path(p)));
    }

    sources
}

fn load_project(path: &Path, name: String, scan: &ScanConfig, warnings: &mut Vec<LoadWarning>) -> Result<(ProjectSpec, Vec<PathBuf>), String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("failed to read project: {e}"))?;
    let file = parse_project_file(&text)?;
    let sources = project_sources(path, &file, scan, warnings);
    let base = path.parent().unwrap_or(Path::new("."));
    let references = file
        .project_references
        .iter()
        .map(|r| base.join(msbuild_path(r)))
        .collect();
    Ok((
        ProjectSpec {
            name,
            path: path.to_path_buf(),
            sources,
        },
        references,
    ))
}

fn discover_from_entries(origin: &Path, entries: Vec<SolutionEntry>, mut warnings: Vec<LoadWarning>, scan: &ScanConfig) -> Result<Discovery, LoadError> {
    let mut projects = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for entry in entries {
        if !entry.path.is_file() {
            warnings.push(LoadWarning::at(
                &entry.path,
                format!("project '{}' could not be resolved: file not found", entry.name),
            ));
            continue;
        }
        let path = canonical(&entry.path);
        if !seen.insert(path.clone()) {
            continue;
        }
        match load_project(&path, entry.name.clone(), scan, &mut warnings) {
            Ok((spec, _refs)) => projects.push(spec),
            Err(msg) => warnings.push(LoadWarning::at(&path, format!("project '{}' skipped: {msg}", entry.name))),
        }
    }

    if projects.is_empty() {
        return Err(LoadError::NoProjects {
            path: origin.to_path_buf(),
            warnings,
        });
    }
    Ok(Discovery { projects, warnings })
}

/// Load `root_project` and every project it references, breadth-first.
fn discover_from_project(root_project: &Path, scan: &ScanConfig) -> Result<Discovery, LoadError> {
    let mut warnings = Vec::new();
    let root_project = canonical(root_project);
    let (spec, refs) = load_project(&root_project, file_stem(&root_project), scan, &mut warnings).map_err(|message| {
        LoadError::Malformed {
            path: root_project.clone(),
            message,
        }
    })?;

    let mut projects = vec![spec];
    let mut seen: HashSet<PathBuf> = HashSet::from([root_project.clone()]);
    let mut queue: VecDeque<(PathBuf, PathBuf)> = refs.into_iter().map(|r| (root_project.clone(), r)).collect();

    while let Some((from, reference)) = queue.pop_front() {
        if !reference.is_file() {
            warnings.push(LoadWarning::at(
                &from,
                format!("referenced project could not be resolved: {}", reference.display()),
            ));
            continue;
        }
        let path = canonical(&reference);
        if !seen.insert(path.clone()) {
            continue;
        }
        match load_project(&path, file_stem(&path), scan, &mut warnings) {
            Ok((spec, refs)) => {
                projects.push(spec);
                queue.extend(refs.into_iter().map(|r| (path.clone(), r)));
            }
            Err(msg) => warnings.push(LoadWarning::at(&path, format!("referenced project skipped: {msg}"))),
        }
    }

    Ok(Discovery { projects, warnings })
}

fn files_in_dir_with_ext(dir: &Path, exts: &[&str]) -> Vec<PathBuf> {
    let Ok(rd) = std::fs::read_dir(dir) else { return vec![] };
    let mut out: Vec<PathBuf> = rd
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
                .unwrap_or(false)
        })
        .collect();
    out.sort();
    out
}

fn discover_from_directory(dir: &Path, scan: &ScanConfig) -> Result<Discovery, LoadError> {
    let solutions = files_in_dir_with_ext(dir, &["sln", "slnx"]);
    match solutions.len() {
        0 => {}
        1 => return discover_projects(&solutions[0], scan),
        n => {
            return Err(LoadError::Malformed {
                path: dir.to_path_buf(),
                message: format!("directory holds {n} solution files; pass one explicitly"),
            })
        }
    }

    let opts = ScanOptions::new(dir, "csproj").excluding(&scan.exclude_dir_names);
    let project_files = scan_files(&opts).map_err(|e| LoadError::Malformed {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;
    if !project_files.is_empty() {
        let entries = project_files
            .into_iter()
            .map(|e| SolutionEntry {
                name: file_stem(&e.abs_path),
                path: e.abs_path,
            })
            .collect();
        return discover_from_entries(dir, entries, vec![], scan);
    }

    let opts = ScanOptions::new(dir, "cs").excluding(&scan.exclude_dir_names);
    let sources: Vec<PathBuf> = scan_files(&opts)
        .map_err(|e| LoadError::Malformed {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?
        .into_iter()
        .map(|e| e.abs_path)
        .collect();
    if sources.is_empty() {
        return Err(LoadError::NoProjects {
            path: dir.to_path_buf(),
            warnings: vec![],
        });
    }

    Ok(Discovery {
        projects: vec![ProjectSpec {
            name: file_stem(dir),
            path: dir.to_path_buf(),
            sources,
        }],
        warnings: vec![],
    })
}

/// Turn a tree path into the projects (and their compile items) it describes.
pub fn discover_projects(path: &Path, scan: &ScanConfig) -> Result<Discovery, LoadError> {
    match classify(path)? {
        TreeDescriptor::Solution(p) => {
            let text = read_text(&p)?;
            let (entries, warnings) = parse_solution(&p, &text)?;
            discover_from_entries(&p, entries, warnings, scan)
        }
        TreeDescriptor::SolutionXml(p) => {
            let text = read_text(&p)?;
            let (entries, warnings) = parse_solution_xml(&p, &text)?;
            discover_from_entries(&p, entries, warnings, scan)
        }
        TreeDescriptor::Project(p) => discover_from_project(&p, scan),
        TreeDescriptor::Directory(p) => discover_from_directory(&p, scan),
    }
}
