//! In-process MCP server driven by a fixed script of replies.

use std::collections::HashMap;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    /// Read the request and never answer it.
    Hang,
}

impl Reply {
    pub fn error(code: i64, message: &str) -> Self {
        Self::Error {
            code,
            message: message.to_string(),
        }
    }
}

/// Routes on `(method, cursor or uri)`. Unrouted requests get "method not found".
pub struct ScriptedServer {
    initialize: Reply,
    routes: HashMap<(String, Option<String>), Reply>,
}

pub fn initialize_result(capabilities: Value) -> Value {
    json!({
        "protocolVersion": "2025-06-18",
        "capabilities": capabilities,
        "serverInfo": { "name": "billing", "version": "0.3.0" },
    })
}

impl ScriptedServer {
    pub fn new(capabilities: Value) -> Self {
        Self::with_initialize(Reply::Result(initialize_result(capabilities)))
    }

    pub fn with_initialize(initialize: Reply) -> Self {
        Self {
            initialize,
            routes: HashMap::new(),
        }
    }

    pub fn on(self, method: &str, reply: Reply) -> Self {
        self.route(method, None, reply)
    }

    pub fn on_page(self, method: &str, cursor: &str, reply: Reply) -> Self {
        self.route(method, Some(cursor), reply)
    }

    pub fn on_read(self, uri: &str, reply: Reply) -> Self {
        self.route("resources/read", Some(uri), reply)
    }

    fn route(mut self, method: &str, key: Option<&str>, reply: Reply) -> Self {
        self.routes
            .insert((method.to_string(), key.map(str::to_string)), reply);
        self
    }

    /// Connects a client. The handle yields every message the server received.
    pub async fn spawn(self) -> (mcp_jsonrpc::Client, JoinHandle<Vec<Value>>) {
        let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_stream);
        let (server_read, mut server_write) = tokio::io::split(server_stream);

        let server = tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(server_read).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).expect("client sent json");
                seen.push(msg.clone());
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                let reply = if method == "initialize" {
                    self.initialize.clone()
                } else {
                    let key = msg["params"]["cursor"]
                        .as_str()
                        .or_else(|| msg["params"]["uri"].as_str())
                        .map(str::to_string);
                    self.routes
                        .get(&(method.clone(), key))
                        .cloned()
                        .unwrap_or_else(|| Reply::error(-32601, "Method not found"))
                };
                let response = match reply {
                    Reply::Result(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                    Reply::Error { code, message } => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": code, "message": message },
                    }),
                    Reply::Hang => continue,
                };
                let mut out = serde_json::to_string(&response).unwrap();
                out.push('\n');
                if server_write.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
                let _ = server_write.flush().await;
            }
            seen
        });

        let client = mcp_jsonrpc::Client::connect_io(client_read, client_write)
            .await
            .unwrap();
        (client, server)
    }
}

pub fn methods(seen: &[Value]) -> Vec<String> {
    seen.iter()
        .filter_map(|msg| msg["method"].as_str().map(str::to_string))
        .collect()
}

pub fn text_contents(uri: &str, text: &str) -> Value {
    json!({ "contents": [{ "uri": uri, "mimeType": "application/json", "text": text }] })
}
