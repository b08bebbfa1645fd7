// src/authorizer/mod.rs

//! Privileged execution backends
//!
//! An *authorizer* is the backend that performs installs on our behalf:
//! nothing (the user confirms every install), a root shell, one of two
//! broker services, or a user-supplied shell command. Every backend is
//! reached through a [`PrivilegedChannel`], pooled by a
//! [`Recycler`](crate::recycle::Recycler), and called through an
//! [`Authorizer`] which reconnects dead links and retries once.
//!
//! Channel state machine:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ok──► Connected
//!      ▲                          │                  │
//!      └──────────failed──────────┘      link death  │
//!      └─────────────────────────────────────────────┘
//! ```

mod broker;
pub(crate) mod pm;
mod pools;
mod shell;
mod unprivileged;

pub use broker::BrokerChannel;
pub use pm::{failure_code, parse_failure};
pub use pools::{ChannelPools, PoolOptions};
pub use shell::ShellChannel;
pub use unprivileged::UnprivilegedChannel;

use crate::error::{Error, Result};
use crate::recycle::{Recyclable, Recycler};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which backend performs privileged work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizerKind {
    /// Defer to the global preference; never present after resolution
    Global,
    /// No privilege; the user confirms each operation
    None,
    Root,
    /// Broker service running as shell or root
    Shizuku,
    /// Broker service running as device owner
    Dhizuku,
    /// User-supplied shell command
    Customize,
}

impl AuthorizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizerKind::Global => "global",
            AuthorizerKind::None => "none",
            AuthorizerKind::Root => "root",
            AuthorizerKind::Shizuku => "shizuku",
            AuthorizerKind::Dhizuku => "dhizuku",
            AuthorizerKind::Customize => "customize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(AuthorizerKind::Global),
            "none" => Some(AuthorizerKind::None),
            "root" => Some(AuthorizerKind::Root),
            "shizuku" => Some(AuthorizerKind::Shizuku),
            "dhizuku" => Some(AuthorizerKind::Dhizuku),
            "customize" => Some(AuthorizerKind::Customize),
            _ => None,
        }
    }

    /// Whether the backend can run arbitrary shell commands
    pub fn can_exec(&self) -> bool {
        matches!(
            self,
            AuthorizerKind::Root | AuthorizerKind::Shizuku | AuthorizerKind::Customize
        )
    }
}

impl fmt::Display for AuthorizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of running a command through a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// stdout and stderr, interleaved
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines()
    }
}

/// Options for a new platform install session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallParams {
    /// Package the session is scoped to, when known
    pub package_name: Option<String>,
    /// Installer package name recorded by the platform
    pub installer: Option<String>,
    /// Sum of all APK sizes written to the session
    pub total_size: Option<u64>,
    pub allow_test_only: bool,
    pub allow_downgrade: bool,
    pub all_users: bool,
    /// Platform install reason code (0 = unknown)
    pub install_reason: i32,
    /// Platform package source code (0 = unspecified)
    pub package_source: i32,
}

/// Flags controlling package removal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UninstallFlags(u32);

impl UninstallFlags {
    pub const KEEP_DATA: u32 = 0x1;
    pub const ALL_USERS: u32 = 0x2;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & (Self::KEEP_DATA | Self::ALL_USERS))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn keep_data(&self) -> bool {
        self.0 & Self::KEEP_DATA != 0
    }

    pub fn all_users(&self) -> bool {
        self.0 & Self::ALL_USERS != 0
    }
}

/// A live link to a privileged backend
///
/// Implementations track their own [`ChannelState`]. A severed link is
/// reported as [`Error::ChannelDead`] and leaves the channel Disconnected;
/// calling [`connect`](Self::connect) again brings it back.
#[async_trait]
pub trait PrivilegedChannel: Send + Sync {
    fn kind(&self) -> AuthorizerKind;

    fn state(&self) -> ChannelState;

    /// Establish the link; no-op when already connected
    async fn connect(&self) -> Result<()>;

    /// Run a command with elevated privilege
    async fn exec(&self, argv: &[String]) -> Result<ExecOutput>;

    /// Open a platform install session, returning its id
    async fn create_install_session(&self, params: &InstallParams) -> Result<i32>;

    /// Stage one APK file into a session under `name`
    async fn write_install_session(&self, session_id: i32, name: &str, path: &Path)
    -> Result<()>;

    /// Commit everything staged; the platform accepts all of it or nothing
    async fn commit_install_session(&self, session_id: i32) -> Result<()>;

    async fn abandon_install_session(&self, session_id: i32) -> Result<()>;

    async fn uninstall(&self, package_name: &str, flags: UninstallFlags) -> Result<()>;

    /// Release the link's resources; the channel becomes Disconnected
    fn shutdown(&self);
}

/// A pooled channel plus the reconnect-and-retry policy
///
/// Holds one [`Recyclable`] handle for as long as the owner keeps the
/// authorizer, so consecutive calls share a channel. [`release`](Self::release)
/// gives the handle back early.
pub struct Authorizer {
    kind: AuthorizerKind,
    pool: Recycler<dyn PrivilegedChannel>,
    handle: Mutex<Option<Arc<Recyclable<dyn PrivilegedChannel>>>>,
}

impl Authorizer {
    pub fn new(kind: AuthorizerKind, pool: Recycler<dyn PrivilegedChannel>) -> Self {
        Self {
            kind,
            pool,
            handle: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> AuthorizerKind {
        self.kind
    }

    fn handle(&self) -> Result<Arc<Recyclable<dyn PrivilegedChannel>>> {
        let mut slot = self.handle.lock();
        if let Some(handle) = slot.as_ref() {
            if handle.is_current() {
                return Ok(Arc::clone(handle));
            }
            // Another holder replaced the entity; never revive the old one
            debug!(
                "Authorizer[{}]: channel epoch {} was replaced, reacquiring",
                self.kind,
                handle.epoch()
            );
            slot.take();
        }
        let handle = Arc::new(self.pool.acquire()?);
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Acquire and connect the channel
    pub async fn channel(&self) -> Result<Arc<dyn PrivilegedChannel>> {
        let handle = self.handle()?;
        let channel = Arc::clone(handle.entity());
        if channel.state() != ChannelState::Connected {
            debug!("Authorizer[{}]: connecting", self.kind);
            channel.connect().await?;
        }
        Ok(channel)
    }

    /// Run `op` against the channel
    ///
    /// A dead link is torn down, rebuilt and the call repeated exactly once;
    /// a second failure of any kind is returned to the caller.
    pub async fn call<F, Fut, R>(&self, op: F) -> Result<R>
    where
        F: Fn(Arc<dyn PrivilegedChannel>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let channel = self.channel().await?;
        match op(channel).await {
            Err(e) if e.is_retryable() => {
                warn!("Authorizer[{}]: {}, reconnecting", self.kind, e);
                self.reset();
                let channel = self.channel().await?;
                op(channel).await
            }
            other => other,
        }
    }

    /// Drop the current channel so the next call builds a new one
    ///
    /// Only the entity this authorizer was using is torn down; a replacement
    /// built meanwhile by another holder of the pool is left alone.
    fn reset(&self) {
        let Some(stale) = self.handle.lock().take() else {
            return;
        };
        self.pool.recycle_if_epoch(stale.epoch());
        drop(stale);
    }

    /// Give the held channel back to its pool
    pub fn release(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.recycle();
        }
    }

    pub fn is_holding(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub async fn exec(&self, argv: &[String]) -> Result<ExecOutput> {
        self.call(|c| async move { c.exec(argv).await }).await
    }

    pub async fn uninstall(&self, package_name: &str, flags: UninstallFlags) -> Result<()> {
        self.call(|c| async move { c.uninstall(package_name, flags).await })
            .await
    }

    /// Create, stage and commit one install session
    ///
    /// The whole sequence is the unit of retry: a link that dies halfway
    /// through leaves an orphaned platform session which the backend expires
    /// on its own, and a fresh session is opened on the new link.
    pub async fn install_apks(
        &self,
        params: &InstallParams,
        apks: &[(String, std::path::PathBuf)],
    ) -> Result<()> {
        self.call(|c| async move {
            let id = c.create_install_session(params).await?;
            for (name, path) in apks {
                if let Err(e) = c.write_install_session(id, name, path).await {
                    abandon_quietly(c.as_ref(), id).await;
                    return Err(e);
                }
            }
            c.commit_install_session(id).await
        })
        .await
    }
}

async fn abandon_quietly(channel: &dyn PrivilegedChannel, session_id: i32) {
    if let Err(e) = channel.abandon_install_session(session_id).await {
        debug!("Abandoning install session {} failed: {}", session_id, e);
    }
}

impl Drop for Authorizer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("kind", &self.kind)
            .field("holding", &self.is_holding())
            .finish()
    }
}

/// Error for operations a backend cannot perform
pub(crate) fn denied(kind: AuthorizerKind, operation: &str) -> Error {
    Error::CapabilityDenied {
        authorizer: kind.to_string(),
        operation: operation.to_string(),
    }
}

#[cfg(test)]
mod tests;
