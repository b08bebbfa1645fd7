// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sideloader::authorizer::{
    ChannelState, ExecOutput, InstallParams, PrivilegedChannel, UninstallFlags,
};
use sideloader::device::InstalledPackage;
use sideloader::{AuthorizerKind, Device, DeviceProfile, RecycleFactory, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Create an initialized database in a temp dir.
///
/// Returns (TempDir, db_path) - keep the TempDir alive to prevent cleanup.
pub fn setup_test_db() -> (TempDir, String) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_str()
        .unwrap()
        .to_string();
    sideloader::db::init(&db_path).unwrap();
    (temp_dir, db_path)
}

/// Write a module archive with the given `module.prop` id
pub fn write_module(dir: &Path, id: &str) -> PathBuf {
    let path = dir.join(format!("{}.zip", id));
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    zip.start_file("module.prop", options).unwrap();
    write!(zip, "id={}\nname={}\nversion=v1\nversionCode=1\n", id, id).unwrap();
    zip.start_file("service.sh", options).unwrap();
    zip.write_all(b"#!/system/bin/sh\n").unwrap();
    zip.finish().unwrap();
    path
}

/// Device with a fixed set of installed packages
pub struct StubDevice {
    profile: DeviceProfile,
    installed: HashMap<String, InstalledPackage>,
}

impl StubDevice {
    pub fn new() -> Self {
        Self {
            profile: DeviceProfile::default(),
            installed: HashMap::new(),
        }
    }

    pub fn with_installed(mut self, package_name: &str) -> Self {
        let mut pkg = InstalledPackage::new(package_name);
        pkg.label = Some(package_name.to_string());
        self.installed.insert(package_name.to_string(), pkg);
        self
    }
}

#[async_trait]
impl Device for StubDevice {
    fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    async fn installed_package(&self, package_name: &str) -> Result<Option<InstalledPackage>> {
        Ok(self.installed.get(package_name).cloned())
    }

    async fn request_interactive_install(&self, _apks: &[PathBuf]) -> Result<()> {
        Ok(())
    }

    async fn request_interactive_uninstall(&self, _package_name: &str) -> Result<()> {
        Ok(())
    }
}

/// Root shell that records what it is asked to do
#[derive(Default)]
pub struct RecordingShell {
    pub state: Mutex<Option<ChannelState>>,
    pub execs: Mutex<Vec<Vec<String>>>,
    pub uninstalls: Mutex<Vec<(String, UninstallFlags)>>,
}

#[async_trait]
impl PrivilegedChannel for RecordingShell {
    fn kind(&self) -> AuthorizerKind {
        AuthorizerKind::Root
    }

    fn state(&self) -> ChannelState {
        self.state.lock().unwrap_or(ChannelState::Disconnected)
    }

    async fn connect(&self) -> Result<()> {
        *self.state.lock() = Some(ChannelState::Connected);
        Ok(())
    }

    async fn exec(&self, argv: &[String]) -> Result<ExecOutput> {
        self.execs.lock().push(argv.to_vec());
        Ok(ExecOutput {
            exit_code: 0,
            output: "- Installing module\n- Done\n".to_string(),
        })
    }

    async fn create_install_session(&self, _params: &InstallParams) -> Result<i32> {
        Ok(1)
    }

    async fn write_install_session(
        &self,
        _session_id: i32,
        _name: &str,
        _path: &Path,
    ) -> Result<()> {
        Ok(())
    }

    async fn commit_install_session(&self, _session_id: i32) -> Result<()> {
        Ok(())
    }

    async fn abandon_install_session(&self, _session_id: i32) -> Result<()> {
        Ok(())
    }

    async fn uninstall(&self, package_name: &str, flags: UninstallFlags) -> Result<()> {
        self.uninstalls
            .lock()
            .push((package_name.to_string(), flags));
        Ok(())
    }

    fn shutdown(&self) {
        *self.state.lock() = Some(ChannelState::Disconnected);
    }
}

/// Factory handing out one shared [`RecordingShell`]
pub struct ShellFactory {
    pub shell: Arc<RecordingShell>,
}

impl RecycleFactory<dyn PrivilegedChannel> for ShellFactory {
    fn name(&self) -> &str {
        "recording-shell"
    }

    fn make(&self) -> Result<Arc<dyn PrivilegedChannel>> {
        let shell: Arc<dyn PrivilegedChannel> = self.shell.clone();
        Ok(shell)
    }

    fn shutdown(&self, entity: &dyn PrivilegedChannel) -> Result<()> {
        entity.shutdown();
        Ok(())
    }
}
