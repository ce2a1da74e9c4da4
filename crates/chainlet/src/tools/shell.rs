use std::env;
use std::io;

use chainlet_core::tool::{Approval, Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

#[derive(Deserialize, JsonSchema)]
pub struct ShellToolParameters {
    #[schemars(description = "The command line to run.")]
    cmdline: String,
}

/// Either the structured parameters or a bare command line.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ShellInput {
    Parameters(ShellToolParameters),
    Cmdline(String),
}

impl ShellInput {
    fn into_cmdline(self) -> String {
        match self {
            ShellInput::Parameters(params) => params.cmdline,
            ShellInput::Cmdline(cmdline) => cmdline,
        }
    }

    fn cmdline(&self) -> &str {
        match self {
            ShellInput::Parameters(params) => &params.cmdline,
            ShellInput::Cmdline(cmdline) => cmdline,
        }
    }
}

/// A tool for running shell commands. Every call asks for approval.
pub struct ShellTool {
    parameter_schema: Value,
}

impl ShellTool {
    /// Creates a new shell tool.
    #[inline]
    pub fn new() -> Self {
        ShellTool {
            parameter_schema: schema_for!(ShellToolParameters).to_value(),
        }
    }
}

impl Default for ShellTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for ShellTool {
    type Input = ShellInput;

    fn name(&self) -> &str {
        "terminal"
    }

    fn description(&self) -> &str {
        "Runs commands in a terminal. Input should be a single command line. \
         Text collected from stdout and stderr is returned as the output."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn make_approval(&self, input: &ShellInput) -> Option<Approval> {
        Some(Approval::new(
            input.cmdline(),
            "Agent wants to run the command",
        ))
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(&self, input: ShellInput) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            let cmdline = input.into_cmdline();
            let cmdline = cmdline.trim();
            if cmdline.is_empty() {
                return Err(ToolError::invalid_input().with_reason("empty command line"));
            }
            run_command_line(cmdline)
                .await
                .map_err(|err| ToolError::execution_error().with_reason(err.to_string()))
        }
    }
}

#[inline]
fn create_command_with_inferred_shell() -> Command {
    let Some(shell) = env::var_os("SHELL") else {
        return Command::new("/bin/sh");
    };
    Command::new(shell)
}

async fn run_command_line(cmdline: &str) -> Result<String, io::Error> {
    debug!("running `{cmdline}`");
    let output = create_command_with_inferred_shell()
        .arg("-c")
        .arg(cmdline)
        .kill_on_drop(true)
        .output()
        .await?;

    let mut result = String::new();
    if !output.stdout.is_empty() {
        result.push_str("==> STDOUT <==\n");
        result.push_str(&String::from_utf8_lossy(&output.stdout));
    }
    if !output.stderr.is_empty() {
        result.push_str("\n==> STDERR <==\n");
        result.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    if !output.status.success() && result.is_empty() {
        result = format!("The command exited with {}.", output.status);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_line() {
        let result = run_command_line("echo 'Hello, World!'").await;
        assert_eq!(result.unwrap(), "==> STDOUT <==\nHello, World!\n");
    }

    #[tokio::test]
    async fn test_silent_failure_reports_status() {
        let result = run_command_line("exit 3").await.unwrap();
        assert!(result.starts_with("The command exited with"), "{result}");
    }

    #[test]
    fn test_always_asks_for_approval() {
        let tool = ShellTool::new();
        let input = serde_json::from_value(serde_json::json!("ls -la")).unwrap();
        let approval = tool.make_approval(&input).unwrap();
        assert_eq!(approval.what(), "ls -la");

        let input =
            serde_json::from_value(serde_json::json!({ "cmdline": "pwd" })).unwrap();
        assert_eq!(tool.make_approval(&input).unwrap().what(), "pwd");
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        let tool = ShellTool::new();
        let input = serde_json::from_value(serde_json::json!("  ")).unwrap();
        assert!(tool.execute(input).await.is_err());
    }
}
