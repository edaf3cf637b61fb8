//! MCP Server - Model Context Protocol Implementation
//!
//! Exposes the Orbit operations as tools to external agents over
//! line-delimited JSON-RPC on stdin/stdout.

use anyhow::bail;
use orbit_core::{Environment, OrbitError};
use orbit_env::{
    OrbitService, SandboxAction, SidecarAction, StateQuery, DEFAULT_AUDIT_LIMIT,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize, Deserialize)]
struct McpRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    /// Absent for notifications
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct McpResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
    id: Value,
}

/// Tool server bound to one service and a default project directory
#[derive(Debug)]
pub struct McpServer {
    service: OrbitService,
    default_project: PathBuf,
}

impl McpServer {
    pub fn new(service: OrbitService, default_project: PathBuf) -> Self {
        Self {
            service,
            default_project,
        }
    }

    /// Serve requests on stdin/stdout until stdin closes
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();

        loop {
            let mut line = String::new();
            if stdin.read_line(&mut line).await? == 0 {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let request: McpRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed message");
                    continue;
                }
            };

            if let Some(response) = self.handle_request(request).await {
                let response_json = serde_json::to_string(&response)? + "\n";
                stdout.write_all(response_json.as_bytes()).await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    async fn handle_request(&self, req: McpRequest) -> Option<McpResponse> {
        debug!(method = %req.method, "mcp request");
        let id = req.id?;

        let (result, error) = match req.method.as_str() {
            "initialize" => (
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "orbit",
                        "version": orbit_core::VERSION
                    }
                })),
                None,
            ),
            "tools/list" => (Some(json!({ "tools": tool_definitions() })), None),
            "tools/call" => (Some(self.handle_tool_call(&req.params).await), None),
            "ping" => (Some(json!({})), None),
            other => (
                None,
                Some(json!({ "code": -32601, "message": format!("Method not found: {other}") })),
            ),
        };

        Some(McpResponse {
            jsonrpc: "2.0".to_string(),
            result,
            error,
            id,
        })
    }

    async fn handle_tool_call(&self, params: &Value) -> Value {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.call_tool(name, arguments).await {
            Ok(value) => json!({
                "content": [{
                    "type": "text",
                    "text": serde_json::to_string_pretty(&value).unwrap_or_default()
                }]
            }),
            Err(e) => json!({
                "isError": true,
                "content": [{ "type": "text", "text": format!("Error: {e}") }]
            }),
        }
    }

    /// Relative paths resolve against the default project; existing
    /// directories are canonicalized so state keys stay stable.
    fn project(&self, path: Option<PathBuf>) -> PathBuf {
        match path {
            None => self.default_project.clone(),
            Some(path) => {
                let joined = self.default_project.join(path);
                std::fs::canonicalize(&joined).unwrap_or(joined)
            }
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        let value = match name {
            "orbit_status" => {
                let args: ProjectArgs = parse(arguments)?;
                let report = self.service.status(&self.project(args.project_path)).await?;
                serde_json::to_value(report)?
            }
            "orbit_switch_env" => {
                let args: SwitchArgs = parse(arguments)?;
                let project = self.project(args.project_path);
                serde_json::to_value(self.service.switch(&project, args.environment).await?)?
            }
            "orbit_sidecars" => {
                let args: SidecarsArgs = parse(arguments)?;
                let action = match (args.action.as_str(), args.sidecar) {
                    ("list", _) => SidecarAction::List,
                    ("start", Some(name)) => SidecarAction::Start(name),
                    ("stop", Some(name)) => SidecarAction::Stop(name),
                    ("start" | "stop", None) => {
                        return Err(OrbitError::MissingArgument("sidecar").into())
                    }
                    (other, _) => bail!("Unknown action: {other}"),
                };
                let project = self.project(args.project_path);
                serde_json::to_value(self.service.sidecars(&project, action).await?)?
            }
            "orbit_sandbox" => {
                let args: SandboxArgs = parse(arguments)?;
                let project = self.project(args.project_path);
                serde_json::to_value(self.service.sandbox(&project, args.action).await?)?
            }
            "orbit_stop_all" => {
                let args: StopAllArgs = parse(arguments)?;
                serde_json::to_value(self.service.stop_all(args.confirm).await?)?
            }
            "orbit_get_state" => {
                let args: GetStateArgs = parse(arguments)?;
                let query = match args.query_type.as_str() {
                    "projects" => StateQuery::Projects,
                    "audit" => StateQuery::Audit {
                        project: self.project(args.project_path).display().to_string(),
                        limit: args.limit,
                    },
                    "registry" => StateQuery::Registry,
                    "config" => StateQuery::Config,
                    other => bail!("Unknown query type: {other}"),
                };
                serde_json::to_value(self.service.get_state(query)?)?
            }
            other => bail!("Unknown tool: {other}"),
        };
        Ok(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool arguments
// ─────────────────────────────────────────────────────────────────────────────

fn parse<T: DeserializeOwned>(arguments: Value) -> anyhow::Result<T> {
    Ok(serde_json::from_value(arguments)?)
}

#[derive(Debug, Deserialize)]
struct ProjectArgs {
    project_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SwitchArgs {
    project_path: Option<PathBuf>,
    environment: Environment,
}

#[derive(Debug, Deserialize)]
struct SidecarsArgs {
    action: String,
    sidecar: Option<String>,
    project_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SandboxArgs {
    action: SandboxAction,
    project_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct StopAllArgs {
    #[serde(default = "default_confirm")]
    confirm: bool,
}

fn default_confirm() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct GetStateArgs {
    query_type: String,
    project_path: Option<PathBuf>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_AUDIT_LIMIT
}

fn tool_definitions() -> Value {
    let project_path = json!({
        "type": "string",
        "description": "Project path (defaults to the server's working directory)"
    });

    json!([
        {
            "name": "orbit_status",
            "description": "Show the project's environment, sidecars, container engine, isolation capabilities and recent activity",
            "inputSchema": {
                "type": "object",
                "properties": { "project_path": project_path }
            }
        },
        {
            "name": "orbit_switch_env",
            "description": "Switch the project to another environment",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project_path": project_path,
                    "environment": { "type": "string", "enum": ["dev", "test", "staging"] }
                },
                "required": ["environment"]
            }
        },
        {
            "name": "orbit_sidecars",
            "description": "List, start or stop sidecar services",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["list", "start", "stop"] },
                    "sidecar": { "type": "string", "description": "Sidecar name (for start/stop)" },
                    "project_path": project_path
                },
                "required": ["action"]
            }
        },
        {
            "name": "orbit_sandbox",
            "description": "Manage the project's isolated test context",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["status", "create", "reset", "remove", "health"]
                    },
                    "project_path": project_path
                },
                "required": ["action"]
            }
        },
        {
            "name": "orbit_stop_all",
            "description": "Stop every Orbit container and clear recorded sidecars",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "confirm": { "type": "boolean", "default": true }
                }
            }
        },
        {
            "name": "orbit_get_state",
            "description": "Query raw Orbit state",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query_type": {
                        "type": "string",
                        "enum": ["projects", "audit", "registry", "config"]
                    },
                    "project_path": project_path,
                    "limit": { "type": "number", "default": DEFAULT_AUDIT_LIMIT }
                },
                "required": ["query_type"]
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::engine::mock::ScriptedEngine;
    use orbit_core::{OrbitSettings, StateStore};
    use std::sync::Arc;

    fn server(dir: &std::path::Path) -> McpServer {
        let settings = OrbitSettings::new().with_root(dir.join("orbit-root"));
        let service = OrbitService::new(
            Arc::new(ScriptedEngine::permissive()),
            Arc::new(StateStore::open_in_memory().unwrap()),
            settings,
        );
        McpServer::new(service, dir.join("shop"))
    }

    fn request(method: &str, params: Value) -> McpRequest {
        McpRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(json!(1)),
        }
    }

    fn tool_text(response: &McpResponse) -> String {
        response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_project_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("shop")).unwrap();
        let server = server(dir.path());

        assert_eq!(server.project(None), dir.path().join("shop"));
        assert_eq!(
            server.project(Some(PathBuf::from("."))),
            std::fs::canonicalize(dir.path().join("shop")).unwrap()
        );
        assert_eq!(
            server.project(Some(PathBuf::from("../shop"))),
            std::fs::canonicalize(dir.path().join("shop")).unwrap()
        );
        let missing = dir.path().join("gone");
        assert_eq!(server.project(Some(missing.clone())), missing);
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());

        let init = server
            .handle_request(request("initialize", json!({})))
            .await
            .unwrap();
        assert_eq!(init.result.unwrap()["serverInfo"]["name"], "orbit");

        let list = server
            .handle_request(request("tools/list", json!({})))
            .await
            .unwrap();
        let tools = list.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 6);
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("notifications/initialized", json!({}));
        req.id = None;
        assert!(server(dir.path()).handle_request(req).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let response = server(dir.path())
            .handle_request(request("resources/list", json!({})))
            .await
            .unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap()["code"], -32601);
    }

    #[tokio::test]
    async fn test_tool_call_get_state() {
        let dir = tempfile::tempdir().unwrap();
        let response = server(dir.path())
            .handle_request(request(
                "tools/call",
                json!({ "name": "orbit_get_state", "arguments": { "query_type": "registry" } }),
            ))
            .await
            .unwrap();
        let data: Value = serde_json::from_str(&tool_text(&response)).unwrap();
        assert_eq!(data["query_type"], "registry");
    }

    #[tokio::test]
    async fn test_tool_errors_are_reported_in_band() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());

        let response = server
            .handle_request(request(
                "tools/call",
                json!({ "name": "orbit_switch_env", "arguments": { "environment": "test" } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.result.as_ref().unwrap()["isError"], true);
        assert!(tool_text(&response).contains("Project not initialized"));

        let response = server
            .handle_request(request(
                "tools/call",
                json!({ "name": "orbit_sidecars", "arguments": { "action": "start" } }),
            ))
            .await
            .unwrap();
        assert!(tool_text(&response).contains("Missing argument: sidecar"));

        let response = server
            .handle_request(request("tools/call", json!({ "name": "orbit_deploy" })))
            .await
            .unwrap();
        assert!(tool_text(&response).contains("Unknown tool"));
    }
}
