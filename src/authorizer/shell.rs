// src/authorizer/shell.rs

//! Persistent shell backend (`su` or a custom command)
//!
//! One child shell is kept alive per channel. Each command is wrapped in a
//! subshell followed by an exit-code sentinel so replies can be framed on a
//! single stdout stream:
//!
//! ```text
//! ( 'pm' 'install-commit' '42' ) </dev/null 2>&1; echo "__SIDELOADER_EXIT_<uuid>__$?"
//! ```

use super::{
    AuthorizerKind, ChannelState, ExecOutput, InstallParams, PrivilegedChannel, UninstallFlags,
    pm,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

struct ShellIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct ShellChannel {
    kind: AuthorizerKind,
    /// Command line that starts the shell, e.g. `su` or `su -c sh`
    command: String,
    sentinel: String,
    state: Mutex<ChannelState>,
    child: Mutex<Option<Child>>,
    io: tokio::sync::Mutex<Option<ShellIo>>,
}

impl ShellChannel {
    pub fn new(kind: AuthorizerKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            sentinel: format!("__SIDELOADER_EXIT_{}__", uuid::Uuid::new_v4().simple()),
            state: Mutex::new(ChannelState::Disconnected),
            child: Mutex::new(None),
            io: tokio::sync::Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    fn dead(&self, reason: impl std::fmt::Display) -> Error {
        debug!("Shell[{}]: link lost: {}", self.command, reason);
        self.set_state(ChannelState::Disconnected);
        Error::ChannelDead(self.kind.to_string())
    }

    fn spawn(&self) -> Result<(Child, ShellIo)> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or_else(|| Error::ChannelFailure {
            channel: self.kind.to_string(),
            reason: "empty shell command".to_string(),
        })?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ChannelFailure {
                channel: self.kind.to_string(),
                reason: format!("failed to start '{}': {}", self.command, e),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(Error::ChannelFailure {
                channel: self.kind.to_string(),
                reason: "shell pipes unavailable".to_string(),
            });
        };
        Ok((
            child,
            ShellIo {
                stdin,
                stdout: BufReader::new(stdout),
            },
        ))
    }

    async fn run(&self, io: &mut ShellIo, argv: &[String]) -> Result<ExecOutput> {
        let script = format!(
            "( {} ) </dev/null 2>&1; echo \"{}$?\"\n",
            argv.iter().map(|a| quote(a)).collect::<Vec<_>>().join(" "),
            self.sentinel
        );
        io.stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| self.dead(e))?;
        io.stdin.flush().await.map_err(|e| self.dead(e))?;

        let mut output = String::new();
        loop {
            let mut line = String::new();
            let n = io
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| self.dead(e))?;
            if n == 0 {
                return Err(self.dead("end of stream"));
            }
            if let Some(pos) = line.find(&self.sentinel) {
                output.push_str(&line[..pos]);
                let code = line[pos + self.sentinel.len()..].trim();
                let exit_code = code.parse().map_err(|_| Error::ChannelFailure {
                    channel: self.kind.to_string(),
                    reason: format!("malformed exit status '{}'", code),
                })?;
                return Ok(ExecOutput { exit_code, output });
            }
            output.push_str(&line);
        }
    }

    /// Run a `pm` invocation, treating a non-zero exit as a failure
    async fn pm(&self, argv: Vec<String>) -> Result<String> {
        let out = self.exec(&argv).await?;
        if !out.success() {
            if let Some(rejected) = pm::parse_failure(&out.output) {
                return Err(rejected);
            }
            return Err(Error::ChannelFailure {
                channel: self.kind.to_string(),
                reason: format!(
                    "'{}' exited with {}: {}",
                    argv.join(" "),
                    out.exit_code,
                    out.output.trim()
                ),
            });
        }
        Ok(out.output)
    }
}

#[async_trait]
impl PrivilegedChannel for ShellChannel {
    fn kind(&self) -> AuthorizerKind {
        self.kind
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    async fn connect(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        if io.is_some() && self.state() == ChannelState::Connected {
            return Ok(());
        }
        self.set_state(ChannelState::Connecting);

        let (child, mut fresh) = match self.spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                self.set_state(ChannelState::Disconnected);
                return Err(e);
            }
        };
        if let Some(mut old) = self.child.lock().replace(child) {
            let _ = old.start_kill();
        }

        // su prompts or denials surface as the shell exiting before it answers
        match self.run(&mut fresh, &["true".to_string()]).await {
            Ok(out) if out.success() => {
                *io = Some(fresh);
                self.set_state(ChannelState::Connected);
                info!("Shell[{}]: connected", self.command);
                Ok(())
            }
            Ok(out) => {
                self.shutdown();
                Err(Error::ChannelFailure {
                    channel: self.kind.to_string(),
                    reason: format!("shell probe exited with {}", out.exit_code),
                })
            }
            Err(_) => {
                self.shutdown();
                Err(Error::ChannelFailure {
                    channel: self.kind.to_string(),
                    reason: format!("'{}' refused to start a shell", self.command),
                })
            }
        }
    }

    async fn exec(&self, argv: &[String]) -> Result<ExecOutput> {
        let mut guard = self.io.lock().await;
        let Some(io) = guard.as_mut() else {
            return Err(self.dead("not connected"));
        };
        debug!("Shell[{}]: {}", self.command, argv.join(" "));
        let result = self.run(io, argv).await;
        if matches!(result, Err(Error::ChannelDead(_))) {
            *guard = None;
        }
        result
    }

    async fn create_install_session(&self, params: &InstallParams) -> Result<i32> {
        let out = self.pm(pm::install_create(params)).await?;
        pm::parse_session_id(&out)
    }

    async fn write_install_session(
        &self,
        session_id: i32,
        name: &str,
        path: &Path,
    ) -> Result<()> {
        let out = self.pm(pm::install_write(session_id, name, path)).await?;
        pm::check_success(&out)
    }

    async fn commit_install_session(&self, session_id: i32) -> Result<()> {
        let out = self.exec(&pm::install_commit(session_id)).await?;
        pm::check_success(&out.output)
    }

    async fn abandon_install_session(&self, session_id: i32) -> Result<()> {
        self.pm(pm::install_abandon(session_id)).await.map(|_| ())
    }

    async fn uninstall(&self, package_name: &str, flags: UninstallFlags) -> Result<()> {
        let out = self.exec(&pm::uninstall(package_name, flags)).await?;
        pm::check_success(&out.output)
    }

    fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.start_kill() {
                warn!("Shell[{}]: kill failed: {}", self.command, e);
            }
        }
        if let Ok(mut io) = self.io.try_lock() {
            *io = None;
        }
        self.set_state(ChannelState::Disconnected);
    }
}

/// Single-quote an argument for `sh`
pub(crate) fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
