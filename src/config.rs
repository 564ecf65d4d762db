use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".finddef.json";

/// Controls source discovery inside each project (what to skip).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory *names* to skip anywhere below a project (compared against path components).
    pub exclude_dir_names: Vec<String>,
    /// Source files larger than this are skipped with a load warning.
    pub max_file_bytes: u64,
}

/// Hard ceiling regardless of config; protects the parser from generated megafiles.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 8 * 1024 * 1024;

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![],
            max_file_bytes: 1024 * 1024,
        }
    }
}

impl ScanConfig {
    pub fn effective_max_file_bytes(&self) -> u64 {
        self.max_file_bytes.min(ABSOLUTE_MAX_FILE_BYTES)
    }
}

/// Which in-source locations of a symbol become output records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationPolicy {
    /// One record per symbol, at its first in-source location.
    #[default]
    FirstInSource,
    /// One record per in-source location (every part of a partial declaration).
    AllInSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Short names for trees, e.g. `"Web": "/src/Web/Web.sln"`.
    pub aliases: BTreeMap<String, PathBuf>,
    pub scan: ScanConfig,
    /// Abandon a tree load after this many seconds. `None` waits indefinitely.
    pub load_timeout_secs: Option<u64>,
    pub location_policy: LocationPolicy,
    /// Max load warnings echoed in a result (the total count is always reported).
    pub warning_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aliases: BTreeMap::new(),
            scan: ScanConfig::default(),
            load_timeout_secs: None,
            location_policy: LocationPolicy::FirstInSource,
            warning_limit: 10,
        }
    }
}

/// Load `.finddef.json` from `dir`, then from the home directory, then defaults.
pub fn load_config(dir: &Path) -> Config {
    let candidates = [
        Some(dir.join(CONFIG_FILE_NAME)),
        dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME)),
    ];

    for path in candidates.into_iter().flatten() {
        let Ok(text) = std::fs::read_to_string(&path) else { continue };
        match serde_json::from_str::<Config>(&text) {
            Ok(cfg) => {
                tracing::debug!(path = %path.display(), "loaded config");
                return cfg;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config");
            }
        }
    }

    Config::default()
}

/// Environment variable that overrides the alias `name`, e.g. `Web` → `WEB_SLN_PATH`.
pub fn alias_env_var(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    out.push_str("_SLN_PATH");
    out
}

/// Resolve a tree alias to a path; anything that is not an alias is a literal path.
pub fn resolve_tree_path(input: &str, cfg: &Config) -> PathBuf {
    resolve_tree_path_with(input, cfg, |k| std::env::var(k).ok())
}

fn resolve_tree_path_with(input: &str, cfg: &Config, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    let input = input.trim();
    let from_env = env(&alias_env_var(input)).filter(|v| !v.trim().is_empty());

    if let Some((_, configured)) = cfg.aliases.iter().find(|(k, _)| k.eq_ignore_ascii_case(input)) {
        return from_env.map(PathBuf::from).unwrap_or_else(|| configured.clone());
    }

    let literal = PathBuf::from(input);
    if literal.exists() {
        return literal;
    }

    from_env.map(PathBuf::from).unwrap_or(literal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cfg_with_alias(name: &str, path: &str) -> Config {
        let mut cfg = Config::default();
        cfg.aliases.insert(name.to_string(), PathBuf::from(path));
        cfg
    }

    #[test]
    fn alias_env_var_is_upper_snake() {
        assert_eq!(alias_env_var("Web"), "WEB_SLN_PATH");
        assert_eq!(alias_env_var("my-api"), "MY_API_SLN_PATH");
    }

    #[test]
    fn configured_alias_matches_case_insensitively() {
        let cfg = cfg_with_alias("Web", "/src/Web/Web.sln");
        let p = resolve_tree_path_with("web", &cfg, |_| None);
        assert_eq!(p, PathBuf::from("/src/Web/Web.sln"));
    }

    #[test]
    fn env_overrides_configured_alias() {
        let cfg = cfg_with_alias("Web", "/src/Web/Web.sln");
        let p = resolve_tree_path_with("Web", &cfg, |k| {
            (k == "WEB_SLN_PATH").then(|| "/elsewhere/Web.sln".to_string())
        });
        assert_eq!(p, PathBuf::from("/elsewhere/Web.sln"));
    }

    #[test]
    fn env_alone_defines_alias_for_missing_literal() {
        let cfg = Config::default();
        let p = resolve_tree_path_with("Api", &cfg, |k| (k == "API_SLN_PATH").then(|| "/x/Api.sln".to_string()));
        assert_eq!(p, PathBuf::from("/x/Api.sln"));
    }

    #[test]
    fn existing_literal_path_wins_over_env() {
        let dir = TempDir::new().unwrap();
        let sln = dir.path().join("Web.sln");
        std::fs::write(&sln, "").unwrap();
        let input = sln.to_string_lossy().to_string();
        let p = resolve_tree_path_with(&input, &Config::default(), |_| Some("/nope.sln".to_string()));
        assert_eq!(p, sln);
    }

    #[test]
    fn load_config_reads_partial_file_and_defaults_rest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "aliases": { "Web": "/w.sln" }, "location_policy": "all_in_source" }"#,
        )
        .unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.aliases.get("Web"), Some(&PathBuf::from("/w.sln")));
        assert_eq!(cfg.location_policy, LocationPolicy::AllInSource);
        assert_eq!(cfg.warning_limit, 10);
        assert_eq!(cfg.scan.max_file_bytes, 1024 * 1024);
    }
}
