//! STDIO upstream transport.
//!
//! Spawns `command + args` as a child process and speaks JSON-RPC over its
//! stdin/stdout; stderr is inherited as logs. The transport's lifetime is
//! tied to the child: stopping the transport terminates and reaps it.

use super::{
    ConnectionState, McpClient, Transport, TransportError, UpstreamCore, map_connect_error,
};
use crate::session::RequestInfo;
use async_trait::async_trait;
use rmcp::ServiceExt as _;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use rmcp::transport::TokioChildProcess;
use std::time::Duration;
use tokio::process::Command;

const INSTALL_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn open(command: &str, extra_args: &[String]) -> Result<McpClient, TransportError> {
    let words = split_command(command);
    let Some((program, args)) = words.split_first() else {
        return Err(TransportError::NotConnected(format!(
            "invalid command: '{command}'"
        )));
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.args(extra_args);

    let transport = TokioChildProcess::new(cmd)
        .map_err(|e| TransportError::NotConnected(format!("spawn '{program}': {e}")))?;
    ().serve(transport).await.map_err(map_connect_error)
}

/// Shell-word split: whitespace-separated, with single/double quotes and
/// backslash escapes.
fn split_command(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' && q == '"' {
                    match chars.next() {
                        Some(esc) => current.push(esc),
                        None => current.push('\\'),
                    }
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' => {
                    in_word = true;
                    if let Some(esc) = chars.next() {
                        current.push(esc);
                    }
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                other => {
                    in_word = true;
                    current.push(other);
                }
            },
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

pub struct StdioTransport {
    core: UpstreamCore,
}

impl StdioTransport {
    pub(crate) fn new(core: UpstreamCore) -> Self {
        Self { core }
    }

    /// Cheap availability check before the real spawn. Failures here are
    /// reported as [`TransportError::Install`], distinct from connection
    /// failures, so operators can tell "binary missing" from "server broken".
    async fn probe_installed(&self) -> Result<(), TransportError> {
        let words = split_command(&self.core.server().command);
        let Some(program) = words.first() else {
            return Err(TransportError::Install(format!(
                "invalid command: '{}'",
                self.core.server().command
            )));
        };

        let mut cmd = Command::new(program);
        cmd.arg("--version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let status = tokio::time::timeout(INSTALL_PROBE_TIMEOUT, async {
            cmd.status().await
        })
        .await;

        match status {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(TransportError::Install(format!(
                "'{program} --version' exited with {status}"
            ))),
            Ok(Err(e)) => Err(TransportError::Install(format!(
                "'{program}' is not runnable: {e}"
            ))),
            Err(_) => Err(TransportError::Install(format!(
                "'{program} --version' timed out"
            ))),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> ConnectionState {
        self.core.state()
    }

    fn policy(&self) -> crate::model::Policy {
        self.core.policy()
    }

    async fn start(&self) -> Result<(), TransportError> {
        if !self.core.server().preinstalled {
            self.probe_installed().await?;
        }
        self.core.connect().await
    }

    async fn stop(&self) {
        // Dropping the client kills and reaps the child (kill_on_drop).
        self.core.disconnect().await;
    }

    async fn fetch_tools(&self) -> Result<Vec<Tool>, TransportError> {
        self.core.fetch_tools().await
    }

    fn cached_tools(&self) -> Vec<Tool> {
        self.core.cached_tools()
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParam,
        _request: &RequestInfo,
    ) -> Result<CallToolResult, TransportError> {
        self.core.call_tool(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::split_command;

    #[test]
    fn splits_plain_words() {
        assert_eq!(split_command("npx mcp-server-git"), vec!["npx", "mcp-server-git"]);
    }

    #[test]
    fn respects_quotes() {
        assert_eq!(
            split_command(r#"run "a b" 'c d' e"#),
            vec!["run", "a b", "c d", "e"]
        );
    }

    #[test]
    fn handles_escapes_outside_quotes() {
        assert_eq!(split_command(r"echo a\ b"), vec!["echo", "a b"]);
    }

    #[test]
    fn empty_command_yields_no_words() {
        assert!(split_command("   ").is_empty());
    }
}
