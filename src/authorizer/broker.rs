// src/authorizer/broker.rs

//! Broker service backend
//!
//! Shizuku and Dhizuku style services run with elevated identity in their
//! own process and accept requests over a Unix socket. Messages are
//! newline-delimited JSON:
//!
//! ```text
//! → {"id":7,"method":"install_commit","params":{"session_id":42}}
//! ← {"id":7,"result":null}
//! ← {"id":7,"error":{"kind":"rejected","code":-7,"message":"INSTALL_FAILED_UPDATE_INCOMPATIBLE"}}
//! ```
//!
//! The link can die independently of this process; EOF or a broken pipe is
//! reported as [`Error::ChannelDead`].

use super::{
    AuthorizerKind, ChannelState, ExecOutput, InstallParams, PrivilegedChannel, UninstallFlags,
    denied,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

/// Protocol revision sent in the handshake
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<BrokerError>,
}

#[derive(Debug, Deserialize)]
struct BrokerError {
    kind: String,
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    session_id: i32,
}

struct BrokerIo {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct BrokerChannel {
    kind: AuthorizerKind,
    socket_path: PathBuf,
    state: Mutex<ChannelState>,
    io: tokio::sync::Mutex<Option<BrokerIo>>,
    next_id: AtomicU64,
}

impl BrokerChannel {
    pub fn new(kind: AuthorizerKind, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            socket_path: socket_path.into(),
            state: Mutex::new(ChannelState::Disconnected),
            io: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    fn dead(&self, reason: impl std::fmt::Display) -> Error {
        debug!("Broker[{}]: link lost: {}", self.kind, reason);
        self.set_state(ChannelState::Disconnected);
        Error::ChannelDead(self.kind.to_string())
    }

    async fn roundtrip(&self, io: &mut BrokerIo, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Request { id, method, params })?;
        line.push('\n');

        io.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.dead(e))?;
        io.writer.flush().await.map_err(|e| self.dead(e))?;

        let mut reply = String::new();
        let n = io
            .reader
            .read_line(&mut reply)
            .await
            .map_err(|e| self.dead(e))?;
        if n == 0 {
            return Err(self.dead("end of stream"));
        }

        let response: Response = serde_json::from_str(&reply)?;
        if response.id != id {
            return Err(Error::ChannelFailure {
                channel: self.kind.to_string(),
                reason: format!("reply for request {} while waiting for {}", response.id, id),
            });
        }
        match response.error {
            Some(err) => Err(self.map_error(err)),
            None => Ok(response.result),
        }
    }

    fn map_error(&self, err: BrokerError) -> Error {
        match err.kind.as_str() {
            "rejected" => Error::CommitRejected {
                code: err.code,
                reason: err.message,
            },
            "denied" => denied(self.kind, &err.message),
            "dead" => self.dead(err.message),
            _ => Error::ChannelFailure {
                channel: self.kind.to_string(),
                reason: err.message,
            },
        }
    }

    async fn request<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let mut guard = self.io.lock().await;
        let Some(io) = guard.as_mut() else {
            return Err(self.dead("not connected"));
        };
        debug!("Broker[{}]: {}", self.kind, method);
        let result = self.roundtrip(io, method, params).await;
        if matches!(result, Err(Error::ChannelDead(_))) {
            *guard = None;
        }
        Ok(serde_json::from_value(result?)?)
    }
}

#[async_trait]
impl PrivilegedChannel for BrokerChannel {
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

        let stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(ChannelState::Disconnected);
                return Err(Error::ChannelFailure {
                    channel: self.kind.to_string(),
                    reason: format!(
                        "service not reachable at {}: {}",
                        self.socket_path.display(),
                        e
                    ),
                });
            }
        };
        let (reader, writer) = stream.into_split();
        let mut fresh = BrokerIo {
            reader: BufReader::new(reader),
            writer,
        };

        let hello = json!({ "client": "sideloader", "version": PROTOCOL_VERSION });
        match self.roundtrip(&mut fresh, "hello", hello).await {
            Ok(_) => {
                *io = Some(fresh);
                self.set_state(ChannelState::Connected);
                info!("Broker[{}]: connected", self.kind);
                Ok(())
            }
            Err(e) => {
                self.set_state(ChannelState::Disconnected);
                Err(e)
            }
        }
    }

    async fn exec(&self, argv: &[String]) -> Result<ExecOutput> {
        // Device-owner brokers have no shell identity
        if !self.kind.can_exec() {
            return Err(denied(self.kind, "run shell commands"));
        }
        self.request("exec", json!({ "argv": argv })).await
    }

    async fn create_install_session(&self, params: &InstallParams) -> Result<i32> {
        let created: SessionCreated = self
            .request("install_create", serde_json::to_value(params)?)
            .await?;
        Ok(created.session_id)
    }

    async fn write_install_session(
        &self,
        session_id: i32,
        name: &str,
        path: &Path,
    ) -> Result<()> {
        let params = json!({ "session_id": session_id, "name": name, "path": path });
        let _: Value = self.request("install_write", params).await?;
        Ok(())
    }

    async fn commit_install_session(&self, session_id: i32) -> Result<()> {
        let _: Value = self
            .request("install_commit", json!({ "session_id": session_id }))
            .await?;
        Ok(())
    }

    async fn abandon_install_session(&self, session_id: i32) -> Result<()> {
        let _: Value = self
            .request("install_abandon", json!({ "session_id": session_id }))
            .await?;
        Ok(())
    }

    async fn uninstall(&self, package_name: &str, flags: UninstallFlags) -> Result<()> {
        let params = json!({ "package_name": package_name, "flags": flags });
        let _: Value = self.request("uninstall", params).await?;
        Ok(())
    }

    fn shutdown(&self) {
        if let Ok(mut io) = self.io.try_lock() {
            *io = None;
        }
        self.set_state(ChannelState::Disconnected);
    }
}
