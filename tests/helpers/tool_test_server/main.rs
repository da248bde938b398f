//! Test server binary for pipe transport integration tests
//!
//! A minimal JSON-RPC 2.0 tool server speaking newline-delimited JSON over
//! stdin/stdout. Used exclusively by integration tests to exercise the pipe
//! transport and the session handshake against a real child process.
//!
//! # Handled methods
//!
//! - `initialize` -- replies with protocol version `2024-11-05`.
//! - `notifications/initialized` -- swallowed silently.
//! - `tools/list` -- two pages: `create_mood_playlist` and
//!   `get_dataset_stats` on the first, `simulate_crash` on the second
//!   (cursor `"page2"`), so the handshake's pagination loop is exercised.
//! - `tools/call`:
//!   - `create_mood_playlist` requires a string `mood` argument; missing or
//!     non-string yields a `-32602` error.
//!   - `get_dataset_stats` returns a fixed summary.
//!   - `simulate_crash` exits the process without replying, so the caller
//!     observes a dropped connection mid-call.
//! - anything else -- `-32601 Method not found`.

use std::io::{self, BufRead, Write};

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

        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&serde_json::Value::Null, -32700, "Parse error");
                if write_line(&mut out, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let id = request.get("id").cloned().unwrap_or(serde_json::Value::Null);

        if method == "notifications/initialized" {
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id, &request),
            "tools/call" => handle_tools_call(&id, &request),
            _ => make_error(&id, -32601, &format!("Method not found: {method}")),
        };

        if write_line(&mut out, &response).is_err() {
            break;
        }
    }
}

fn write_line(out: &mut impl Write, response: &serde_json::Value) -> io::Result<()> {
    writeln!(out, "{response}")?;
    out.flush()
}

fn handle_initialize(id: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "tool-test-server",
                "version": "0.1.0"
            }
        }
    })
}

/// Two pages, so the client's pagination loop has to follow a cursor.
fn handle_tools_list(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let cursor = request
        .pointer("/params/cursor")
        .and_then(|c| c.as_str());

    let result = match cursor {
        None => serde_json::json!({
            "tools": [
                {
                    "name": "create_mood_playlist",
                    "description": "Build a playlist for a mood",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "mood": { "type": "string" } },
                        "required": ["mood"]
                    }
                },
                {
                    "name": "get_dataset_stats",
                    "description": "Summarize the track dataset",
                    "inputSchema": { "type": "object", "properties": {} }
                }
            ],
            "nextCursor": "page2"
        }),
        Some("page2") => serde_json::json!({
            "tools": [
                {
                    "name": "simulate_crash",
                    "description": "Exit without replying",
                    "inputSchema": { "type": "object", "properties": {} }
                }
            ]
        }),
        Some(other) => {
            return make_error(id, -32602, &format!("unknown cursor: {other}"));
        }
    };

    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn handle_tools_call(id: &serde_json::Value, request: &serde_json::Value) -> serde_json::Value {
    let name = request
        .pointer("/params/name")
        .and_then(|n| n.as_str())
        .unwrap_or("");

    match name {
        "create_mood_playlist" => {
            let mood = request.pointer("/params/arguments/mood").and_then(|m| m.as_str());
            match mood {
                Some(mood) => text_result(
                    id,
                    &format!("Playlist for '{mood}':\n1. Nightcall\n2. Midnight City"),
                ),
                None => make_error(id, -32602, "missing required argument: mood"),
            }
        }
        "get_dataset_stats" => text_result(id, "tracks: 12000\nartists: 3400"),
        "simulate_crash" => {
            // Deliberately drop the connection mid-call.
            std::process::exit(1);
        }
        other => make_error(id, -32602, &format!("unknown tool: {other}")),
    }
}

fn text_result(id: &serde_json::Value, text: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{ "type": "text", "text": text }],
            "isError": false
        }
    })
}

fn make_error(id: &serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
