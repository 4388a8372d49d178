mod io;
pub mod types;

pub use io::clean_terminal_output;
pub use types::{Directory, Error, File, ProcessResponse, Result, Subdirectory};

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::mcp::{self, CallToolResult, Headers, McpClient, Tool, ToolClient, TransportKind};

pub const EXECUTE_TOOL: &str = "processExecute";
pub const LIST_DIRECTORY_TOOL: &str = "fsListDirectory";

/// Some sandbox versions nest the process fields under this key.
const PROCESS_WRAPPER_KEY: &str = "withLogs";

/// Filesystem and process operations on one remote sandbox.
pub struct SandboxClient {
    client: Box<dyn ToolClient>,
    workspace: String,
    sandbox: String,
}

impl std::fmt::Debug for SandboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxClient")
            .field("workspace", &self.workspace)
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

impl SandboxClient {
    pub async fn connect(
        workspace: impl Into<String>,
        sandbox: impl Into<String>,
        url: &str,
        headers: Headers,
        transport: TransportKind,
    ) -> mcp::Result<Self> {
        let client = McpClient::connect(url, headers, transport).await?;
        Ok(Self::new(workspace, sandbox, Box::new(client)))
    }

    pub fn new(
        workspace: impl Into<String>,
        sandbox: impl Into<String>,
        client: Box<dyn ToolClient>,
    ) -> Self {
        Self {
            client,
            workspace: workspace.into(),
            sandbox: sandbox.into(),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn sandbox_name(&self) -> &str {
        &self.sandbox
    }

    /// Runs `command` to completion and returns its logs. No timeout is sent:
    /// long-running commands are bounded by the caller, not the sandbox.
    pub async fn execute_command(
        &self,
        command: &str,
        name: &str,
        working_dir: &str,
    ) -> Result<ProcessResponse> {
        debug!(command, working_dir, "executing");
        let params = json!({
            "command": command,
            "name": name,
            "workingDir": working_dir,
            "waitForCompletion": true,
            "timeout": 0,
            "waitForPorts": [],
            "includeLogs": true,
        });
        let result = self
            .client
            .call_tool(EXECUTE_TOOL, params)
            .await
            .map_err(Error::Execute)?;
        parse_process_response(&result)
    }

    pub async fn list_directory(&self, path: &str) -> Result<Directory> {
        let result = self
            .client
            .call_tool(LIST_DIRECTORY_TOOL, json!({ "path": path }))
            .await
            .map_err(Error::ListDirectory)?;
        parse_tool_json(&result, LIST_DIRECTORY_TOOL)
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.client.list_tools().await?)
    }

    pub async fn close(&self) -> Result<()> {
        Ok(self.client.close().await?)
    }
}

/// The JSON text of the first content block, after checking `isError`.
fn tool_text<'a>(result: &'a CallToolResult, tool: &'static str) -> Result<&'a str> {
    if result.is_error {
        let message = result.first_text().unwrap_or("MCP error occurred");
        return Err(Error::Tool(message.to_string()));
    }
    if result.content.is_empty() {
        return Err(Error::EmptyContent(tool));
    }
    result.first_text().ok_or(Error::UnexpectedFormat(tool))
}

fn parse_tool_json<T: DeserializeOwned>(result: &CallToolResult, tool: &'static str) -> Result<T> {
    let text = tool_text(result, tool)?;
    serde_json::from_str(text).map_err(|source| Error::Parse { tool, source })
}

/// Accepts both the flat process object and the same object nested under
/// the wrapper key.
pub fn parse_process_response(result: &CallToolResult) -> Result<ProcessResponse> {
    let value: Value = parse_tool_json(result, EXECUTE_TOOL)?;
    let inner = match value {
        Value::Object(mut obj) => match obj.remove(PROCESS_WRAPPER_KEY) {
            Some(wrapped @ Value::Object(_)) => wrapped,
            _ => Value::Object(obj),
        },
        _ => return Err(Error::UnexpectedFormat(EXECUTE_TOOL)),
    };
    serde_json::from_value(inner).map_err(|source| Error::Parse {
        tool: EXECUTE_TOOL,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::Content;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn text_result(text: &str) -> CallToolResult {
        CallToolResult {
            content: vec![Content::Text {
                text: text.to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn wrapped_and_flat_process_responses_parse_identically() {
        let flat = parse_process_response(&text_result(
            r#"{"pid":"42","logs":"hello\n","exitCode":0,"status":"completed"}"#,
        ))
        .unwrap();
        let wrapped = parse_process_response(&text_result(
            r#"{"withLogs":{"pid":"42","logs":"hello\n","exitCode":0,"status":"completed"}}"#,
        ))
        .unwrap();
        assert_eq!(flat, wrapped);
        assert_eq!(flat.pid, "42");
        assert_eq!(flat.exit_code, Some(0));
    }

    #[test]
    fn numeric_pid_and_null_logs_are_accepted() {
        let process = parse_process_response(&text_result(r#"{"pid":1234,"logs":null}"#)).unwrap();
        assert_eq!(process.pid, "1234");
        assert_eq!(process.logs, "");
    }

    #[test]
    fn tool_errors_and_bad_envelopes_are_reported() {
        let mut failed = text_result("command not allowed");
        failed.is_error = true;
        let err = parse_process_response(&failed).unwrap_err();
        assert_eq!(err.to_string(), "MCP error: command not allowed");

        let err = parse_process_response(&CallToolResult::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyContent(EXECUTE_TOOL)));

        let err = parse_process_response(&text_result("[1,2]")).unwrap_err();
        assert!(matches!(err, Error::UnexpectedFormat(EXECUTE_TOOL)));

        let err = parse_process_response(&text_result("not json")).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));

        let image_only = CallToolResult {
            content: vec![Content::Image {
                data: String::new(),
                mime_type: "image/png".into(),
            }],
            ..Default::default()
        };
        let err = parse_process_response(&image_only).unwrap_err();
        assert!(matches!(err, Error::UnexpectedFormat(_)));
    }

    #[test]
    fn directory_with_null_lists_parses() {
        let dir: Directory = parse_tool_json(
            &text_result(r#"{"path":"/","name":"/","files":null,"subdirectories":[{"name":"home","path":"/home"}]}"#),
            LIST_DIRECTORY_TOOL,
        )
        .unwrap();
        assert!(dir.files.is_empty());
        assert_eq!(dir.subdirectories[0].name, "home");
    }

    /// Records every call and answers from a fixed payload.
    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(String, Value)>>,
        reply: String,
    }

    #[async_trait]
    impl ToolClient for RecordingClient {
        async fn list_tools(&self) -> mcp::Result<Vec<Tool>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> mcp::Result<CallToolResult> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments));
            Ok(text_result(&self.reply))
        }

        async fn close(&self) -> mcp::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn execute_sends_fixed_parameters() {
        let recorder = std::sync::Arc::new(RecordingClient {
            reply: r#"{"pid":"7","logs":"ok"}"#.to_string(),
            ..Default::default()
        });

        let client = SandboxClient::new("acme", "dev", Box::new(recorder.clone()));
        let process = client.execute_command("ls -la", "job", "/tmp").await.unwrap();
        assert_eq!(process.logs, "ok");

        let calls = recorder.calls.lock().unwrap();
        let (tool, args) = &calls[0];
        assert_eq!(tool, EXECUTE_TOOL);
        assert_eq!(args["command"], "ls -la");
        assert_eq!(args["workingDir"], "/tmp");
        assert_eq!(args["waitForCompletion"], true);
        assert_eq!(args["timeout"], 0);
        assert_eq!(args["includeLogs"], true);
        assert_eq!(args["waitForPorts"], json!([]));
    }
}
