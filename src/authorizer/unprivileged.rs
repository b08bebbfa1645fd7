// src/authorizer/unprivileged.rs

//! Backend for running without any privilege
//!
//! Install sessions are staged locally and handed to the platform's
//! user-confirmed install flow on commit. Anything that needs elevation
//! is refused with [`Error::CapabilityDenied`](crate::Error::CapabilityDenied).

use super::{
    AuthorizerKind, ChannelState, ExecOutput, InstallParams, PrivilegedChannel, UninstallFlags,
    denied,
};
use crate::device::Device;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, warn};

pub struct UnprivilegedChannel {
    device: Arc<dyn Device>,
    staged: Mutex<HashMap<i32, Vec<PathBuf>>>,
    next_id: AtomicI32,
}

impl UnprivilegedChannel {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            staged: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
        }
    }

    fn unknown_session(session_id: i32) -> Error {
        Error::InvalidState(format!("no staged install session {}", session_id))
    }
}

#[async_trait]
impl PrivilegedChannel for UnprivilegedChannel {
    fn kind(&self) -> AuthorizerKind {
        AuthorizerKind::None
    }

    fn state(&self) -> ChannelState {
        ChannelState::Connected
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn exec(&self, _argv: &[String]) -> Result<ExecOutput> {
        Err(denied(AuthorizerKind::None, "run commands"))
    }

    async fn create_install_session(&self, params: &InstallParams) -> Result<i32> {
        if params.all_users {
            return Err(denied(AuthorizerKind::None, "install for all users"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.staged.lock().insert(id, Vec::new());
        Ok(id)
    }

    async fn write_install_session(
        &self,
        session_id: i32,
        name: &str,
        path: &Path,
    ) -> Result<()> {
        let mut staged = self.staged.lock();
        let files = staged
            .get_mut(&session_id)
            .ok_or_else(|| Self::unknown_session(session_id))?;
        debug!("Staging {} for user-confirmed install", name);
        files.push(path.to_path_buf());
        Ok(())
    }

    async fn commit_install_session(&self, session_id: i32) -> Result<()> {
        let files = self
            .staged
            .lock()
            .remove(&session_id)
            .ok_or_else(|| Self::unknown_session(session_id))?;
        self.device.request_interactive_install(&files).await
    }

    async fn abandon_install_session(&self, session_id: i32) -> Result<()> {
        self.staged.lock().remove(&session_id);
        Ok(())
    }

    async fn uninstall(&self, package_name: &str, flags: UninstallFlags) -> Result<()> {
        if flags.keep_data() {
            warn!("Keeping data is not possible without privilege; ignoring");
        }
        self.device.request_interactive_uninstall(package_name).await
    }

    fn shutdown(&self) {
        self.staged.lock().clear();
    }
}
