//! MCP test server binary for integration tests
//!
//! This binary implements a minimal MCP server that communicates over
//! stdin/stdout using newline-delimited JSON-RPC. Integration tests use it
//! to drive the stdio transport and the server registry against a real
//! child process.
//!
//! # Handled Methods
//!
//! - `initialize` -- advertises `tools` and `resources`, both with
//!   `listChanged: true`.
//! - `notifications/initialized` -- swallowed silently.
//! - `tools/list` -- `list_files`, `read_file`, `echo`, `hang`, `crash`.
//! - `tools/call`:
//!   - `list_files` -- `{ "files": [{ "name", "type" }] }` for `arguments.path`
//!   - `read_file` -- `{ "content": <file text> }` for `arguments.path`
//!   - `echo` -- a single text content item holding `arguments.message`
//!   - `hang` -- never replies
//!   - `crash` -- exits the process with status 1
//! - `resources/list` -- one resource, `file:///readme`.
//! - `ping` -- empty result.
//! - All other methods -- JSON-RPC `-32601 Method not found`.
//!
//! # Usage
//!
//! Each line of stdin is one request; each reply is written as one line of
//! JSON followed by `\n`.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&Value::Null, -32700, "Parse error");
                if write_line(&mut out, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let id = request.get("id").cloned().unwrap_or(Value::Null);

        if method.starts_with("notifications/") {
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id),
            "tools/call" => match handle_tools_call(&id, &request) {
                Some(response) => response,
                None => continue,
            },
            "resources/list" => handle_resources_list(&id),
            "ping" => make_result(&id, json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if write_line(&mut out, &response).is_err() {
            break;
        }
    }
}

fn write_line(out: &mut impl Write, response: &Value) -> io::Result<()> {
    let serialized = serde_json::to_string(response).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    writeln!(out, "{}", serialized)?;
    out.flush()
}

fn handle_initialize(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "listChanged": true }
            },
            "serverInfo": {
                "name": "mcp-test-server",
                "version": "0.1.0"
            }
        }),
    )
}

fn path_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "path": { "type": "string" } },
        "required": ["path"]
    })
}

fn handle_tools_list(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "tools": [
                {
                    "name": "list_files",
                    "description": "List the entries of a directory",
                    "inputSchema": path_schema()
                },
                {
                    "name": "read_file",
                    "description": "Read a text file",
                    "inputSchema": path_schema()
                },
                {
                    "name": "echo",
                    "description": "Echoes input",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "message": { "type": "string" } }
                    }
                },
                { "name": "hang", "description": "Never replies", "inputSchema": {} },
                { "name": "crash", "description": "Exits the process", "inputSchema": {} }
            ]
        }),
    )
}

fn handle_resources_list(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "resources": [
                { "uri": "file:///readme", "name": "readme", "mimeType": "text/plain" }
            ]
        }),
    )
}

/// Returns `None` when the tool deliberately sends no reply.
fn handle_tools_call(id: &Value, request: &Value) -> Option<Value> {
    let params = request.get("params").unwrap_or(&Value::Null);
    let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").unwrap_or(&Value::Null);
    let argument = |key: &str| {
        arguments
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    let response = match tool_name {
        "list_files" => list_files(id, &argument("path")),
        "read_file" => match std::fs::read_to_string(argument("path")) {
            Ok(content) => make_result(id, json!({ "content": content })),
            Err(e) => make_error(id, -32000, &format!("read failed: {}", e)),
        },
        "echo" => make_result(
            id,
            json!({
                "content": [{ "type": "text", "text": argument("message") }],
                "isError": false
            }),
        ),
        "hang" => return None,
        "crash" => std::process::exit(1),
        _ => make_error(id, -32602, &format!("Unknown tool: {}", tool_name)),
    };
    Some(response)
}

fn list_files(id: &Value, path: &str) -> Value {
    let path = if path.is_empty() { "." } else { path };
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => return make_error(id, -32000, &format!("list failed: {}", e)),
    };

    let mut files: Vec<(String, &str)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let kind = match entry.file_type() {
                Ok(t) if t.is_dir() => "directory",
                Ok(_) => "file",
                Err(_) => "unknown",
            };
            (entry.file_name().to_string_lossy().into_owned(), kind)
        })
        .collect();
    files.sort();

    let files: Vec<Value> = files
        .into_iter()
        .map(|(name, kind)| json!({ "name": name, "type": kind }))
        .collect();
    make_result(id, json!({ "files": files }))
}

fn make_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

/// Build a JSON-RPC error response.
fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}
