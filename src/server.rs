use anyhow::Result;
use serde_json::json;
use std::io::{BufRead, Write};

use crate::config::{resolve_tree_path, Config, LocationPolicy};
use crate::output::{render_text, to_json, TextStyle};
use crate::query::{QueryDispatcher, QueryInput, QueryOutcome, QueryRequest};

/// Session state: one dispatcher (and so one cached snapshot) for the life of the loop.
pub struct ServerState {
    dispatcher: QueryDispatcher,
    config: Config,
}

impl ServerState {
    pub fn new(dispatcher: QueryDispatcher, config: Config) -> Self {
        Self { dispatcher, config }
    }

    fn run_query(&mut self, input: &QueryInput) -> (QueryOutcome, TextStyle) {
        let tree = resolve_tree_path(&input.tree, &self.config);
        let policy = if input.all_locations {
            LocationPolicy::AllInSource
        } else {
            self.config.location_policy
        };
        let request = input.to_request();
        let style = match &request {
            Ok(QueryRequest::ByPosition { .. }) => TextStyle::ByPosition,
            _ => TextStyle::ByName,
        };
        let outcome = match request {
            Ok(request) => self.dispatcher.query_with_policy(&tree, &request, policy),
            Err(e) => self.dispatcher.reject(e),
        };
        (outcome, style)
    }

    fn tool_list(&self, id: serde_json::Value) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "find_definition",
                        "description": "Go to definition in a C# solution. Pass `name` to list every in-source declaration of that exact name, or `document`+`line`+`column` (0-based) to resolve the symbol under a cursor to its declaration. The tree stays loaded between calls.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "tree": { "type": "string", "description": "Path to a .sln, .slnx, .csproj or source directory, or a configured alias" },
                                "name": { "type": "string", "description": "Exact symbol name (case-sensitive unless ignore_case)" },
                                "document": { "type": "string", "description": "Source file for a position query" },
                                "line": { "type": "integer", "description": "0-based line" },
                                "column": { "type": "integer", "description": "0-based column" },
                                "ignore_case": { "type": "boolean", "description": "Optional: case-insensitive name match" },
                                "all_locations": { "type": "boolean", "description": "Optional: one record per part of a partial declaration" },
                                "format": { "type": "string", "enum": ["text", "json"], "description": "Optional: output format (default json)" }
                            },
                            "required": ["tree"]
                        }
                    },
                    {
                        "name": "session_status",
                        "description": "Report the cached tree (if any): projects, documents, symbols, load warnings and total loads.",
                        "inputSchema": { "type": "object", "properties": {} }
                    },
                    {
                        "name": "reset_session",
                        "description": "Drop the cached tree so the next query reloads it from disk.",
                        "inputSchema": { "type": "object", "properties": {} }
                    }
                ]
            }
        })
    }

    fn tool_call(&mut self, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let reply = |text: String, is_error: bool| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": text }], "isError": is_error }
            })
        };

        match name {
            "find_definition" => {
                let input: QueryInput = match serde_json::from_value(args.clone()) {
                    Ok(v) => v,
                    Err(e) => return reply(format!("Invalid arguments: {e}"), true),
                };
                let (outcome, style) = self.run_query(&input);
                let text = match args.get("format").and_then(|f| f.as_str()) {
                    Some("text") => render_text(&outcome, style),
                    _ => serde_json::to_string_pretty(&to_json(&outcome)).unwrap_or_default(),
                };
                reply(text, outcome.is_error())
            }
            "session_status" => {
                let cache = self.dispatcher.cache();
                let status = match cache.current() {
                    Some(snap) => json!({
                        "tree": snap.path().display().to_string(),
                        "projects": snap.projects().iter().map(|p| json!({
                            "name": p.name,
                            "path": p.path.display().to_string(),
                            "documents": p.document_count,
                        })).collect::<Vec<_>>(),
                        "documents": snap.documents().len(),
                        "symbols": snap.symbols().len(),
                        "indexed_declarations": snap.index().len(),
                        "warnings": snap.warnings().len(),
                        "loads": cache.load_count(),
                    }),
                    None => json!({ "tree": null, "loads": cache.load_count() }),
                };
                reply(serde_json::to_string_pretty(&status).unwrap_or_default(), false)
            }
            "reset_session" => {
                self.dispatcher.cache_mut().clear();
                reply("Session cleared; the next query reloads the tree.".to_string(), false)
            }
            _ => reply(format!("Tool not found: {name}"), true),
        }
    }

    /// A bare query object (no `method`) gets one JSON result line.
    fn bare_query(&mut self, msg: serde_json::Value) -> serde_json::Value {
        match serde_json::from_value::<QueryInput>(msg) {
            Ok(input) => to_json(&self.run_query(&input).0),
            Err(e) => json!({ "error": format!("invalid query: {e}") }),
        }
    }

    fn handle_line(&mut self, line: &str) -> Option<serde_json::Value> {
        let msg: serde_json::Value = serde_json::from_str(line).ok()?;

        let Some(method) = msg.get("method").and_then(|m| m.as_str()) else {
            return msg.get("tree").is_some().then(|| self.bare_query(msg));
        };

        // JSON-RPC notifications have no "id" field; no reply.
        let id = msg.get("id").cloned()?;

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "finddef", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {}
            }),
            "tools/list" => self.tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                self.tool_call(id, &params)
            }
            "resources/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "resources": [] }
            }),
            "prompts/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "prompts": [] }
            }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };
        Some(reply)
    }
}

/// Serve line-delimited requests until `input` closes. One bad line never ends the loop.
pub fn serve<R: BufRead, W: Write>(state: &mut ServerState, input: R, output: &mut W) -> Result<()> {
    for line in input.lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        if let Some(reply) = state.handle_line(&line) {
            writeln!(output, "{}", reply)?;
            output.flush()?;
        }
    }
    Ok(())
}

pub fn run_stdio_server(state: &mut ServerState) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    serve(state, stdin.lock(), &mut stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::FixtureProvider;
    use crate::session::SessionCache;
    use std::sync::Arc;

    fn state() -> ServerState {
        let provider = FixtureProvider::default()
            .with_tree("/fixtures/web", &[("/fixtures/web/A.cs", "class Foo { void Bar() {} }")]);
        let dispatcher = QueryDispatcher::new(SessionCache::new(Arc::new(provider)), LocationPolicy::FirstInSource);
        ServerState::new(dispatcher, Config::default())
    }

    fn run(state: &mut ServerState, lines: &[serde_json::Value]) -> Vec<serde_json::Value> {
        let input: String = lines.iter().map(|l| format!("{l}\n")).collect();
        let mut out = Vec::new();
        serve(state, input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn call(id: i64, name: &str, arguments: serde_json::Value) -> serde_json::Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": "tools/call", "params": { "name": name, "arguments": arguments } })
    }

    fn text_of(reply: &serde_json::Value) -> String {
        reply["result"]["content"][0]["text"].as_str().unwrap().to_string()
    }

    #[test]
    fn session_survives_failures_and_reuses_snapshot() {
        let mut st = state();
        let replies = run(
            &mut st,
            &[
                json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
                call(1, "find_definition", json!({ "tree": "/fixtures/missing", "name": "Bar" })),
                call(2, "find_definition", json!({ "tree": "/fixtures/web", "name": "Bar" })),
                call(3, "find_definition", json!({ "tree": "/fixtures/web", "document": "/fixtures/web/A.cs", "line": 0, "column": 11 })),
                call(4, "session_status", json!({})),
            ],
        );
        assert_eq!(replies.len(), 4);

        assert_eq!(replies[0]["result"]["isError"], true);
        assert_eq!(replies[1]["result"]["isError"], false);
        let found: serde_json::Value = serde_json::from_str(&text_of(&replies[1])).unwrap();
        assert_eq!(found["declarations"][0]["container"], "Foo");
        assert_eq!(found["declarations"][0]["line"], 1);

        let at: serde_json::Value = serde_json::from_str(&text_of(&replies[2])).unwrap();
        assert_eq!(at["declarations"], found["declarations"]);

        let status: serde_json::Value = serde_json::from_str(&text_of(&replies[3])).unwrap();
        assert_eq!(status["loads"], 2);
        assert_eq!(status["symbols"], 2);
    }

    #[test]
    fn bare_query_lines_and_malformed_input() {
        let mut st = state();
        let input = "not json\n{\"tree\":\"/fixtures/web\",\"mode\":\"name\",\"name\":\"Foo\"}\n{\"tree\":\"/fixtures/web\",\"mode\":\"position\"}\n";
        let mut out = Vec::new();
        serve(&mut st, input.as_bytes(), &mut out).unwrap();
        let replies: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["kind"], "Found");
        assert_eq!(replies[0]["declarations"][0]["container"], "global");
        assert_eq!(replies[1]["kind"], "Error");
        assert_eq!(replies[1]["error_category"], "configuration");
    }

    #[test]
    fn reset_and_unknown_methods() {
        let mut st = state();
        let replies = run(
            &mut st,
            &[
                call(1, "find_definition", json!({ "tree": "/fixtures/web", "name": "Foo", "format": "text" })),
                call(2, "reset_session", json!({})),
                call(3, "session_status", json!({})),
                json!({ "jsonrpc": "2.0", "id": 4, "method": "resources/read" }),
            ],
        );
        assert!(text_of(&replies[0]).starts_with("Found 1 matching definitions:"));
        let status: serde_json::Value = serde_json::from_str(&text_of(&replies[2])).unwrap();
        assert!(status["tree"].is_null());
        assert_eq!(replies[3]["error"]["code"], -32601);
    }
}
