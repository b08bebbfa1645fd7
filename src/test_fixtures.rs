// src/test_fixtures.rs

//! Builders and fakes shared by unit tests
//!
//! APK fixtures are real zip files carrying a compiled manifest produced by
//! [`manifest_xml`], so the same parsing paths run as for packages pulled
//! off a device.

use crate::analyser::manifest::{
    ATTR_LABEL, ATTR_MIN_SDK_VERSION, ATTR_TARGET_SDK_VERSION, ATTR_VERSION_CODE,
    ATTR_VERSION_NAME,
};
use crate::authorizer::{
    AuthorizerKind, ChannelState, ExecOutput, InstallParams, PrivilegedChannel, UninstallFlags,
};
use crate::device::{Device, DeviceProfile, InstalledPackage};
use crate::error::{Error, Result};
use crate::recycle::{RecycleFactory, Recycler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

// ---------------------------------------------------------------------------
// Binary manifest encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ManifestSpec {
    pub package: String,
    pub version_code: i64,
    pub version_name: String,
    pub split: Option<String>,
    pub obfuscated: bool,
}

impl ManifestSpec {
    pub fn new(package: &str, version_code: i64) -> Self {
        Self {
            package: package.to_string(),
            version_code,
            version_name: "1.0".to_string(),
            split: None,
            obfuscated: false,
        }
    }

    pub fn version_name(mut self, name: &str) -> Self {
        self.version_name = name.to_string();
        self
    }

    pub fn split(mut self, split: &str) -> Self {
        self.split = Some(split.to_string());
        self
    }

    /// Blank out attribute names that carry a framework resource id
    pub fn obfuscated(mut self) -> Self {
        self.obfuscated = true;
        self
    }
}

const NONE: u32 = 0xFFFF_FFFF;

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn string_pool(strings: &[String]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut offsets = Vec::new();
    for s in strings {
        offsets.push(data.len() as u32);
        let units: Vec<u16> = s.encode_utf16().collect();
        push_u16(&mut data, units.len() as u16);
        for u in units {
            push_u16(&mut data, u);
        }
        push_u16(&mut data, 0);
    }
    while data.len() % 4 != 0 {
        data.push(0);
    }

    let header_size = 28u32;
    let strings_start = header_size + 4 * strings.len() as u32;
    let mut chunk = Vec::new();
    push_u16(&mut chunk, 0x0001);
    push_u16(&mut chunk, header_size as u16);
    push_u32(&mut chunk, strings_start + data.len() as u32);
    push_u32(&mut chunk, strings.len() as u32);
    push_u32(&mut chunk, 0);
    push_u32(&mut chunk, 0);
    push_u32(&mut chunk, strings_start);
    push_u32(&mut chunk, 0);
    for offset in offsets {
        push_u32(&mut chunk, offset);
    }
    chunk.extend_from_slice(&data);
    chunk
}

/// (name index, raw string index, data type, data)
type RawAttr = (u32, u32, u8, u32);

fn start_element(name: u32, ns: u32, attrs: &[RawAttr]) -> Vec<u8> {
    let mut chunk = Vec::new();
    push_u16(&mut chunk, 0x0102);
    push_u16(&mut chunk, 16);
    push_u32(&mut chunk, 16 + 20 + 20 * attrs.len() as u32);
    push_u32(&mut chunk, 1);
    push_u32(&mut chunk, NONE);
    push_u32(&mut chunk, NONE);
    push_u32(&mut chunk, name);
    push_u16(&mut chunk, 20);
    push_u16(&mut chunk, 20);
    push_u16(&mut chunk, attrs.len() as u16);
    push_u16(&mut chunk, 0);
    push_u16(&mut chunk, 0);
    push_u16(&mut chunk, 0);
    for &(attr_name, raw, data_type, data) in attrs {
        push_u32(&mut chunk, ns);
        push_u32(&mut chunk, attr_name);
        push_u32(&mut chunk, raw);
        push_u16(&mut chunk, 8);
        chunk.push(0);
        chunk.push(data_type);
        push_u32(&mut chunk, data);
    }
    chunk
}

/// Compile a minimal `AndroidManifest.xml`
pub fn manifest_xml(spec: &ManifestSpec) -> Vec<u8> {
    let named = |s: &str| {
        if spec.obfuscated {
            String::new()
        } else {
            s.to_string()
        }
    };
    // Indices 0..5 carry resource ids
    let strings = vec![
        named("versionCode"),
        named("versionName"),
        named("minSdkVersion"),
        named("targetSdkVersion"),
        named("label"),
        "package".to_string(),
        "split".to_string(),
        "manifest".to_string(),
        "uses-sdk".to_string(),
        "application".to_string(),
        spec.package.clone(),
        spec.version_name.clone(),
        spec.split.clone().unwrap_or_default(),
        "Example".to_string(),
        "http://schemas.android.com/apk/res/android".to_string(),
    ];
    let ns = 14;

    let mut resource_map = Vec::new();
    let ids = [
        ATTR_VERSION_CODE,
        ATTR_VERSION_NAME,
        ATTR_MIN_SDK_VERSION,
        ATTR_TARGET_SDK_VERSION,
        ATTR_LABEL,
    ];
    push_u16(&mut resource_map, 0x0180);
    push_u16(&mut resource_map, 8);
    push_u32(&mut resource_map, 8 + 4 * ids.len() as u32);
    for id in ids {
        push_u32(&mut resource_map, id);
    }

    let mut manifest_attrs: Vec<RawAttr> = vec![
        (0, NONE, 0x10, spec.version_code as u32),
        (1, 11, 0x03, 11),
        (5, 10, 0x03, 10),
    ];
    if spec.split.is_some() {
        manifest_attrs.push((6, 12, 0x03, 12));
    }

    let mut body = Vec::new();
    body.extend(string_pool(&strings));
    body.extend(resource_map);
    body.extend(start_element(7, NONE, &manifest_attrs));
    body.extend(start_element(
        8,
        NONE,
        &[(2, NONE, 0x10, 24), (3, NONE, 0x10, 34)],
    ));
    // Kept last so truncation always lands in a chunk the parser reads
    body.extend(start_element(9, ns, &[(4, 13, 0x03, 13)]));

    let mut doc = Vec::new();
    push_u16(&mut doc, 0x0003);
    push_u16(&mut doc, 8);
    push_u32(&mut doc, 8 + body.len() as u32);
    doc.extend(body);
    doc
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

/// Zip the given entries in order
pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A minimal APK; `abis` adds native library folders
pub fn apk_bytes(spec: &ManifestSpec, abis: &[&str]) -> Vec<u8> {
    let mut entries: Vec<(String, Vec<u8>)> = vec![
        ("AndroidManifest.xml".to_string(), manifest_xml(spec)),
        ("classes.dex".to_string(), b"dex\n035\0".to_vec()),
    ];
    for abi in abis {
        entries.push((format!("lib/{}/libnative.so", abi), b"\x7fELF".to_vec()));
    }
    let refs: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|(n, d)| (n.as_str(), d.clone()))
        .collect();
    zip_bytes(&refs)
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, data.len() as u32);
    out.extend_from_slice(data);
    out
}

/// Insert an APK Signature Scheme v2 block carrying `cert`
pub fn sign_v2(apk: &[u8], cert: &[u8]) -> Vec<u8> {
    let certificates = length_prefixed(cert);
    let mut signed_data = Vec::new();
    signed_data.extend(length_prefixed(&[]));
    signed_data.extend(length_prefixed(&certificates));
    signed_data.extend(length_prefixed(&[]));

    let mut signer = Vec::new();
    signer.extend(length_prefixed(&signed_data));
    signer.extend(length_prefixed(&[]));
    signer.extend(length_prefixed(&[]));
    let signers = length_prefixed(&length_prefixed(&signer));

    let mut pair = Vec::new();
    pair.extend_from_slice(&((4 + signers.len()) as u64).to_le_bytes());
    push_u32(&mut pair, 0x7109_871a);
    pair.extend(signers);

    let block_size = (pair.len() + 8 + 16) as u64;
    let mut block = Vec::new();
    block.extend_from_slice(&block_size.to_le_bytes());
    block.extend(pair);
    block.extend_from_slice(&block_size.to_le_bytes());
    block.extend_from_slice(b"APK Sig Block 42");

    let eocd = apk
        .windows(4)
        .rposition(|w| w == [0x50, 0x4b, 0x05, 0x06])
        .unwrap();
    let cd_offset = u32::from_le_bytes(apk[eocd + 16..eocd + 20].try_into().unwrap()) as usize;

    let mut out = Vec::new();
    out.extend_from_slice(&apk[..cd_offset]);
    out.extend(&block);
    out.extend_from_slice(&apk[cd_offset..]);
    let eocd = eocd + block.len();
    let new_offset = (cd_offset + block.len()) as u32;
    out[eocd + 16..eocd + 20].copy_from_slice(&new_offset.to_le_bytes());
    out
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

pub struct FakeDevice {
    profile: DeviceProfile,
    system: bool,
    installed: Mutex<HashMap<String, InstalledPackage>>,
    lookups: Mutex<HashMap<String, usize>>,
    interactive_installs: Mutex<Vec<Vec<PathBuf>>>,
    interactive_uninstalls: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            system: false,
            installed: Mutex::new(HashMap::new()),
            lookups: Mutex::new(HashMap::new()),
            interactive_installs: Mutex::new(Vec::new()),
            interactive_uninstalls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_installed(self, pkg: InstalledPackage) -> Self {
        self.install(pkg);
        self
    }

    pub fn as_system_installer(mut self) -> Self {
        self.system = true;
        self
    }

    pub fn install(&self, pkg: InstalledPackage) {
        self.installed.lock().insert(pkg.package_name.clone(), pkg);
    }

    pub fn lookups(&self, package: &str) -> usize {
        self.lookups.lock().get(package).copied().unwrap_or(0)
    }

    pub fn interactive_installs(&self) -> Vec<Vec<PathBuf>> {
        self.interactive_installs.lock().clone()
    }

    pub fn interactive_uninstalls(&self) -> Vec<String> {
        self.interactive_uninstalls.lock().clone()
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    fn is_system_installer(&self) -> bool {
        self.system
    }

    async fn installed_package(&self, package_name: &str) -> Result<Option<InstalledPackage>> {
        *self
            .lookups
            .lock()
            .entry(package_name.to_string())
            .or_insert(0) += 1;
        Ok(self.installed.lock().get(package_name).cloned())
    }

    async fn request_interactive_install(&self, apks: &[PathBuf]) -> Result<()> {
        self.interactive_installs.lock().push(apks.to_vec());
        Ok(())
    }

    async fn request_interactive_uninstall(&self, package_name: &str) -> Result<()> {
        self.interactive_uninstalls
            .lock()
            .push(package_name.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub package_name: Option<String>,
    pub names: Vec<String>,
    pub paths: Vec<PathBuf>,
}

#[derive(Default)]
struct Staged {
    params: InstallParams,
    names: Vec<String>,
    paths: Vec<PathBuf>,
}

/// Scriptable in-memory backend
pub struct FakeChannel {
    kind: AuthorizerKind,
    state: Mutex<ChannelState>,
    failures: Mutex<VecDeque<Error>>,
    rejected: Mutex<HashMap<String, (i32, String)>>,
    exec_outputs: Mutex<VecDeque<ExecOutput>>,
    execs: Mutex<Vec<Vec<String>>>,
    staged: Mutex<HashMap<i32, Staged>>,
    commits: Mutex<Vec<Commit>>,
    uninstalled: Mutex<Vec<(String, UninstallFlags)>>,
    next_id: AtomicI32,
    connects: AtomicUsize,
}

impl FakeChannel {
    pub fn new(kind: AuthorizerKind) -> Self {
        Self {
            kind,
            state: Mutex::new(ChannelState::Disconnected),
            failures: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(HashMap::new()),
            exec_outputs: Mutex::new(VecDeque::new()),
            execs: Mutex::new(Vec::new()),
            staged: Mutex::new(HashMap::new()),
            commits: Mutex::new(Vec::new()),
            uninstalled: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(100),
            connects: AtomicUsize::new(0),
        }
    }

    /// Fail the next operation of any kind with `err`
    pub fn fail_next(&self, err: Error) {
        self.failures.lock().push_back(err);
    }

    /// Reject every commit scoped to `package`
    pub fn reject_package(&self, package: &str, code: i32, reason: &str) {
        self.rejected
            .lock()
            .insert(package.to_string(), (code, reason.to_string()));
    }

    pub fn push_exec_output(&self, exit_code: i32, output: &str) {
        self.exec_outputs.lock().push_back(ExecOutput {
            exit_code,
            output: output.to_string(),
        });
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.execs.lock().clone()
    }

    pub fn commits(&self) -> Vec<Commit> {
        self.commits.lock().clone()
    }

    pub fn uninstalled(&self) -> Vec<String> {
        self.uninstalled.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn uninstall_flags(&self) -> Vec<UninstallFlags> {
        self.uninstalled.lock().iter().map(|(_, f)| *f).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<()> {
        match self.failures.lock().pop_front() {
            Some(err) => {
                if matches!(err, Error::ChannelDead(_)) {
                    *self.state.lock() = ChannelState::Disconnected;
                }
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PrivilegedChannel for FakeChannel {
    fn kind(&self) -> AuthorizerKind {
        self.kind
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ChannelState::Connected;
        Ok(())
    }

    async fn exec(&self, argv: &[String]) -> Result<ExecOutput> {
        self.take_failure()?;
        self.execs.lock().push(argv.to_vec());
        Ok(self
            .exec_outputs
            .lock()
            .pop_front()
            .unwrap_or(ExecOutput {
                exit_code: 0,
                output: String::new(),
            }))
    }

    async fn create_install_session(&self, params: &InstallParams) -> Result<i32> {
        self.take_failure()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.staged.lock().insert(
            id,
            Staged {
                params: params.clone(),
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn write_install_session(
        &self,
        session_id: i32,
        name: &str,
        path: &Path,
    ) -> Result<()> {
        self.take_failure()?;
        let mut staged = self.staged.lock();
        let session = staged
            .get_mut(&session_id)
            .ok_or_else(|| Error::InvalidState(format!("no session {}", session_id)))?;
        session.names.push(name.to_string());
        session.paths.push(path.to_path_buf());
        Ok(())
    }

    async fn commit_install_session(&self, session_id: i32) -> Result<()> {
        self.take_failure()?;
        let session = self
            .staged
            .lock()
            .remove(&session_id)
            .ok_or_else(|| Error::InvalidState(format!("no session {}", session_id)))?;
        if let Some(package) = &session.params.package_name {
            if let Some((code, reason)) = self.rejected.lock().get(package).cloned() {
                return Err(Error::CommitRejected { code, reason });
            }
        }
        self.commits.lock().push(Commit {
            package_name: session.params.package_name,
            names: session.names,
            paths: session.paths,
        });
        Ok(())
    }

    async fn abandon_install_session(&self, session_id: i32) -> Result<()> {
        self.staged.lock().remove(&session_id);
        Ok(())
    }

    async fn uninstall(&self, package_name: &str, flags: UninstallFlags) -> Result<()> {
        self.take_failure()?;
        if let Some((code, reason)) = self.rejected.lock().get(package_name).cloned() {
            return Err(Error::CommitRejected { code, reason });
        }
        self.uninstalled
            .lock()
            .push((package_name.to_string(), flags));
        Ok(())
    }

    fn shutdown(&self) {
        *self.state.lock() = ChannelState::Disconnected;
    }
}

struct QueueFactory {
    channels: Mutex<VecDeque<Arc<FakeChannel>>>,
    made: Arc<AtomicUsize>,
}

impl RecycleFactory<dyn PrivilegedChannel> for QueueFactory {
    fn name(&self) -> &str {
        "fake"
    }

    fn make(&self) -> Result<Arc<dyn PrivilegedChannel>> {
        let next = self
            .channels
            .lock()
            .pop_front()
            .ok_or_else(|| Error::ChannelFailure {
                channel: "fake".to_string(),
                reason: "no more channels".to_string(),
            })?;
        self.made.fetch_add(1, Ordering::SeqCst);
        let channel: Arc<dyn PrivilegedChannel> = next;
        Ok(channel)
    }

    fn shutdown(&self, entity: &dyn PrivilegedChannel) -> Result<()> {
        entity.shutdown();
        Ok(())
    }
}

/// Pool handing out `channels` in order, plus a counter of builds
pub fn fake_pool(
    channels: Vec<Arc<FakeChannel>>,
) -> (Recycler<dyn PrivilegedChannel>, impl Fn() -> usize) {
    let made = Arc::new(AtomicUsize::new(0));
    let pool = Recycler::new(QueueFactory {
        channels: Mutex::new(channels.into()),
        made: Arc::clone(&made),
    });
    (pool, move || made.load(Ordering::SeqCst))
}
