//! Display boundary: the only place 0-based positions become 1-based.

use serde::Serialize;
use std::fmt::Write as _;

use crate::query::{Declaration, FailureCategory, QueryOutcome, ResultKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclarationRecord {
    pub symbol: String,
    pub container: String,
    pub kind: String,
    pub accessibility: String,
    pub file: String,
    /// 1-based.
    pub line: u32,
    /// 1-based.
    pub column: u32,
}

impl From<&Declaration> for DeclarationRecord {
    fn from(d: &Declaration) -> Self {
        Self {
            symbol: d.symbol.clone(),
            container: d.container.clone(),
            kind: d.kind.to_string(),
            accessibility: d.accessibility.to_string(),
            file: d.file.display().to_string(),
            line: d.line + 1,
            column: d.column + 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExternalRecord {
    pub symbol: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub kind: ResultKind,
    pub declarations: Vec<DeclarationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<FailureCategory>,
    pub warning_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<&QueryOutcome> for OutcomeRecord {
    fn from(o: &QueryOutcome) -> Self {
        Self {
            kind: o.kind,
            declarations: o.declarations.iter().map(DeclarationRecord::from).collect(),
            external: o.external.as_ref().map(|e| ExternalRecord {
                symbol: e.name.clone(),
                kind: e.kind.to_string(),
            }),
            error: o.failure.as_ref().map(|f| f.message.clone()),
            error_category: o.failure.as_ref().map(|f| f.category),
            warning_count: o.warning_count,
            warnings: o.warnings.clone(),
        }
    }
}

pub fn to_json(outcome: &QueryOutcome) -> serde_json::Value {
    serde_json::to_value(OutcomeRecord::from(outcome)).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
}

/// Which query produced the outcome; the two render differently as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    ByName,
    ByPosition,
}

pub fn render_text(outcome: &QueryOutcome, style: TextStyle) -> String {
    let mut out = String::new();
    match outcome.kind {
        ResultKind::Error => {
            let msg = outcome.failure.as_ref().map(|f| f.message.as_str()).unwrap_or("unknown failure");
            let _ = writeln!(out, "Error: {msg}");
        }
        ResultKind::NotFound => {
            let _ = writeln!(out, "No symbol at provided coordinates");
        }
        ResultKind::ExternalOnly => {
            let name = outcome.external.as_ref().map(|e| e.name.as_str()).unwrap_or("?");
            let _ = writeln!(out, "Definition is not in source: {name}");
        }
        ResultKind::Found if outcome.declarations.is_empty() => {
            let _ = writeln!(out, "No symbols found with that name.");
        }
        ResultKind::Found => match style {
            TextStyle::ByName => {
                let _ = writeln!(out, "Found {} matching definitions:", outcome.declarations.len());
                for d in outcome.declarations.iter().map(DeclarationRecord::from) {
                    let _ = writeln!(out, "---");
                    let _ = writeln!(out, "Context: {}.{} ({})", d.container, d.symbol, d.accessibility);
                    let _ = writeln!(out, "File:    {}", d.file);
                    let _ = writeln!(out, "Line:    {}", d.line);
                }
            }
            TextStyle::ByPosition => {
                for d in outcome.declarations.iter().map(DeclarationRecord::from) {
                    let _ = writeln!(out, "DEFINITION_FOUND:");
                    let _ = writeln!(out, "Symbol: {}.{}", d.container, d.symbol);
                    let _ = writeln!(out, "File: {}", d.file);
                    let _ = writeln!(out, "Line: {}", d.line);
                    let _ = writeln!(out, "Column: {}", d.column);
                }
            }
        },
    }

    if outcome.warning_count > 0 {
        let _ = writeln!(out, "Warnings: {}", outcome.warning_count);
        for w in &outcome.warnings {
            let _ = writeln!(out, "  {w}");
        }
        if outcome.warnings.len() < outcome.warning_count {
            let _ = writeln!(out, "  ... {} more", outcome.warning_count - outcome.warnings.len());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Accessibility, SymbolKind};
    use crate::query::QueryFailure;
    use std::path::PathBuf;

    fn found_bar() -> QueryOutcome {
        QueryOutcome {
            kind: ResultKind::Found,
            declarations: vec![Declaration {
                symbol: "Bar".into(),
                container: "Foo".into(),
                kind: SymbolKind::Method,
                accessibility: Accessibility::Private,
                file: PathBuf::from("A.cs"),
                line: 0,
                column: 17,
            }],
            external: None,
            failure: None,
            warning_count: 0,
            warnings: vec![],
        }
    }

    #[test]
    fn records_are_one_based() {
        let v = to_json(&found_bar());
        assert_eq!(v["kind"], "Found");
        assert_eq!(v["declarations"][0]["symbol"], "Bar");
        assert_eq!(v["declarations"][0]["container"], "Foo");
        assert_eq!(v["declarations"][0]["file"], "A.cs");
        assert_eq!(v["declarations"][0]["line"], 1);
        assert_eq!(v["declarations"][0]["column"], 18);
        assert_eq!(v["declarations"][0]["accessibility"], "Private");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn name_text_mirrors_classic_layout() {
        let text = render_text(&found_bar(), TextStyle::ByName);
        assert_eq!(
            text,
            "Found 1 matching definitions:\n---\nContext: Foo.Bar (Private)\nFile:    A.cs\nLine:    1\n"
        );
        let text = render_text(&found_bar(), TextStyle::ByPosition);
        assert!(text.starts_with("DEFINITION_FOUND:\n"));
        assert!(text.contains("Line: 1\n"));
    }

    #[test]
    fn errors_carry_message_and_warning_summary() {
        let outcome = QueryOutcome {
            kind: ResultKind::Error,
            declarations: vec![],
            external: None,
            failure: Some(QueryFailure {
                category: FailureCategory::ProviderLoad,
                message: "no loadable C# projects".into(),
            }),
            warning_count: 3,
            warnings: vec!["a.csproj: missing".into()],
        };
        let v = to_json(&outcome);
        assert_eq!(v["error"], "no loadable C# projects");
        assert_eq!(v["error_category"], "provider_load");
        assert_eq!(v["warning_count"], 3);

        let text = render_text(&outcome, TextStyle::ByName);
        assert!(text.starts_with("Error: no loadable C# projects\n"));
        assert!(text.contains("... 2 more"));
    }
}
