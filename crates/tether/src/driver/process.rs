//! Subprocess agent driver.
//!
//! One agent process per conversation, spoken to over JSON lines: commands
//! down stdin, [`AgentEvent`]s up stdout, stderr forwarded to the log. A
//! supervising task owns each child; the shared session map only holds the
//! command sender and a kill token, so `has_active_session` stays a cheap
//! synchronous lookup.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_id::ConversationId;
use tether_protocol::{AgentEvent, PermissionMode};

use super::{AgentDriver, DriverCommand, PermissionOutcome, SessionContext};

struct SessionHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
    kill: CancellationToken,
}

type SessionMap = Arc<Mutex<HashMap<ConversationId, SessionHandle>>>;

/// Driver spawning one agent subprocess per conversation.
pub struct ProcessDriver {
    command: String,
    base_args: Vec<String>,
    events: mpsc::UnboundedSender<(ConversationId, AgentEvent)>,
    sessions: SessionMap,
}

impl ProcessDriver {
    pub fn new(
        command: impl Into<String>,
        base_args: Vec<String>,
        events: mpsc::UnboundedSender<(ConversationId, AgentEvent)>,
    ) -> Self {
        Self {
            command: command.into(),
            base_args,
            events,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sender(&self, id: ConversationId) -> Option<mpsc::UnboundedSender<DriverCommand>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|handle| handle.commands.clone())
    }

    /// Queue a command for a live session; error when none exists.
    fn send_command(&self, id: ConversationId, command: DriverCommand) -> Result<()> {
        let Some(tx) = self.sender(id) else {
            anyhow::bail!("no active session for {id}");
        };
        tx.send(command)
            .map_err(|_| anyhow::anyhow!("session for {id} is shutting down"))
    }

    /// Queue a command if a session exists; silently skip otherwise.
    fn send_command_lenient(&self, id: ConversationId, command: DriverCommand) {
        if let Some(tx) = self.sender(id) {
            let _ = tx.send(command);
        } else {
            debug!("no session for {id}, command dropped");
        }
    }

    fn spawn_session(
        &self,
        id: ConversationId,
        context: &SessionContext,
    ) -> Result<mpsc::UnboundedSender<DriverCommand>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.base_args)
            .arg("--dir")
            .arg(&context.working_dir)
            .arg("--permission-mode")
            .arg(mode_flag(context.permission_mode));
        if let Some(token) = &context.session_token {
            cmd.arg("--resume").arg(token);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn agent process `{}`", self.command))?;
        let stdin = child.stdin.take().context("agent stdin unavailable")?;
        let stdout = child.stdout.take().context("agent stdout unavailable")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("agent[{id}] {line}");
                }
            });
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();
        tokio::spawn(supervise(
            id,
            child,
            stdin,
            stdout,
            cmd_rx,
            kill.clone(),
            self.events.clone(),
            Arc::clone(&self.sessions),
        ));
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                SessionHandle {
                    commands: cmd_tx.clone(),
                    kill,
                },
            );
        info!("started agent session for {id} in {}", context.working_dir);
        Ok(cmd_tx)
    }
}

#[async_trait]
impl AgentDriver for ProcessDriver {
    async fn send_message(
        &self,
        id: ConversationId,
        context: &SessionContext,
        text: &str,
    ) -> Result<()> {
        let tx = match self.sender(id) {
            Some(tx) if !tx.is_closed() => tx,
            _ => self.spawn_session(id, context)?,
        };
        tx.send(DriverCommand::UserMessage {
            text: text.to_string(),
        })
        .map_err(|_| anyhow::anyhow!("session for {id} is shutting down"))
    }

    async fn respond_permission(
        &self,
        id: ConversationId,
        tool_use_id: &str,
        outcome: PermissionOutcome,
    ) -> Result<()> {
        let command = match outcome {
            PermissionOutcome::Allow {
                updated_input,
                always,
            } => DriverCommand::PermissionResponse {
                tool_use_id: tool_use_id.to_string(),
                allow: true,
                updated_input: Some(updated_input),
                always,
                reason: None,
            },
            PermissionOutcome::Deny { reason } => DriverCommand::PermissionResponse {
                tool_use_id: tool_use_id.to_string(),
                allow: false,
                updated_input: None,
                always: false,
                reason: Some(reason),
            },
        };
        self.send_command(id, command)
    }

    async fn respond_question(
        &self,
        id: ConversationId,
        question_id: &str,
        answer: &str,
    ) -> Result<()> {
        self.send_command(
            id,
            DriverCommand::QuestionResponse {
                question_id: question_id.to_string(),
                answer: answer.to_string(),
            },
        )
    }

    async fn stop(&self, id: ConversationId) -> Result<()> {
        self.send_command_lenient(id, DriverCommand::Interrupt);
        Ok(())
    }

    async fn end_session(&self, id: ConversationId) -> Result<()> {
        let handle = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(handle) = handle {
            handle.kill.cancel();
        }
        Ok(())
    }

    async fn compact(&self, id: ConversationId) -> Result<()> {
        self.send_command_lenient(id, DriverCommand::Compact);
        Ok(())
    }

    async fn set_permission_mode(&self, id: ConversationId, mode: PermissionMode) -> Result<()> {
        self.send_command_lenient(id, DriverCommand::SetPermissionMode { mode });
        Ok(())
    }

    fn has_active_session(&self, id: ConversationId) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|handle| !handle.commands.is_closed())
    }

    async fn switch_account(&self, account_id: &str) -> Result<()> {
        let status = Command::new(&self.command)
            .args(["account", "switch", account_id])
            .status()
            .await
            .with_context(|| format!("run `{} account switch`", self.command))?;
        if !status.success() {
            anyhow::bail!("account switch exited with {status}");
        }
        Ok(())
    }

    async fn start_worker(&self, task: &str, working_dir: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.args(["worker", "--task", task]);
        if let Some(dir) = working_dir {
            cmd.args(["--dir", dir]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().context("spawn worker process")?;
        let worker_id = uuid::Uuid::new_v4().to_string();
        // Reap the worker whenever it finishes.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        info!("started worker {worker_id} for task: {task}");
        Ok(worker_id)
    }

    async fn cleanup(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        if handles.is_empty() {
            return;
        }
        info!("terminating {} agent session(s)", handles.len());
        for handle in handles {
            handle.kill.cancel();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    id: ConversationId,
    mut child: Child,
    mut stdin: ChildStdin,
    stdout: ChildStdout,
    mut cmd_rx: mpsc::UnboundedReceiver<DriverCommand>,
    kill: CancellationToken,
    events: mpsc::UnboundedSender<(ConversationId, AgentEvent)>,
    sessions: SessionMap,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            () = kill.cancelled() => {
                let _ = child.kill().await;
                break;
            }
            command = cmd_rx.recv() => match command {
                Some(command) => match serde_json::to_string(&command) {
                    Ok(mut line) => {
                        line.push('\n');
                        if let Err(e) = stdin.write_all(line.as_bytes()).await {
                            warn!("agent {id} stdin write failed: {e}");
                            break;
                        }
                    }
                    Err(e) => warn!("agent command serialization failed: {e}"),
                },
                None => {
                    let _ = child.kill().await;
                    break;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<AgentEvent>(&line) {
                        Ok(event) => {
                            let _ = events.send((id, event));
                        }
                        Err(e) => debug!("agent {id} emitted unparseable line: {e}"),
                    }
                }
                Ok(None) => {
                    debug!("agent {id} closed stdout");
                    break;
                }
                Err(e) => {
                    warn!("agent {id} read error: {e}");
                    break;
                }
            }
        }
    }
    sessions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    let _ = child.wait().await;
    info!("agent session for {id} ended");
}

fn mode_flag(mode: PermissionMode) -> &'static str {
    match mode {
        PermissionMode::Default => "default",
        PermissionMode::AcceptEdits => "acceptEdits",
        PermissionMode::BypassPermissions => "bypassPermissions",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let command = DriverCommand::PermissionResponse {
            tool_use_id: "tu_1".into(),
            allow: true,
            updated_input: Some(json!({"command": "ls"})),
            always: false,
            reason: None,
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["type"], "permissionResponse");
        assert_eq!(value["toolUseId"], "tu_1");
        assert_eq!(value["allow"], true);
        assert!(value.get("reason").is_none());

        let command = DriverCommand::SetPermissionMode {
            mode: PermissionMode::AcceptEdits,
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["type"], "setPermissionMode");
        assert_eq!(value["mode"], "acceptEdits");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_lifecycle_with_cat() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        // `sh -c cat --` swallows the session flags as positional params.
        let driver = ProcessDriver::new("sh", vec!["-c".into(), "cat".into(), "--".into()], events_tx);
        let id = ConversationId::legacy(1, 1, 1).unwrap();
        let context = SessionContext {
            working_dir: "/tmp".into(),
            session_token: None,
            permission_mode: PermissionMode::Default,
        };

        assert!(!driver.has_active_session(id));
        driver.send_message(id, &context, "hello").await.unwrap();
        assert!(driver.has_active_session(id));

        driver.end_session(id).await.unwrap();
        // The supervisor removes the handle once the child is reaped.
        for _ in 0..50 {
            if !driver.has_active_session(id) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("session did not terminate");
    }
}
