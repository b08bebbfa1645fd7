// src/session/mod.rs

//! Install and uninstall sessions
//!
//! An [`InstallSession`] drives one workflow through its states and
//! publishes every stage on its progress stream:
//!
//! ```text
//! install:   Idle → Resolving → Resolved → Analysing → Analysed → Installing → Completed | Failed
//! uninstall: Idle → ResolvingUninstall → ReadyToUninstall → Uninstalling → Completed | Failed
//! ```
//!
//! Completed and Failed are final; [`InstallSession::reset`] is the only way
//! back to Idle. Callers serialize the mutating calls of one session. The
//! privileged channel is acquired on the first install or uninstall and
//! handed back to its pool when that operation ends or the session closes.
//!
//! # Example
//!
//! ```ignore
//! let session = manager.create(SessionOptions::default());
//! let mut events = session.progress();
//! session.resolve_install(&[InputLocator::parse("app.apk")]).await?;
//! session.analyse().await?;
//! session.install().await?;
//! ```

mod batch;
mod install;
mod manager;
mod source;
mod uninstall;


pub use batch::{BatchMember, MemberResult, MemberState};
pub use install::{InstallUnit, plan_units};
pub use manager::SessionManager;
pub use source::{HttpNetworkResolver, InputLocator, NetworkResolver};
pub use uninstall::UninstallInfo;

use crate::analyser::{self, AnalysisResult, DataEntity, SelectableEntity, SignatureMatchStatus};
use crate::authorizer::{Authorizer, AuthorizerKind, ChannelPools};
use crate::config::{CallerHint, ConfigEntity, ConfigResolver};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressStream};
use batch::{members_for, run_batch};
use chrono::{DateTime, Utc};
use install::{InstallContext, delete_sources, install_unit};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Resolving,
    Resolved,
    Analysing,
    Analysed,
    Installing,
    ResolvingUninstall,
    ReadyToUninstall,
    Uninstalling,
    Completed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Resolving => "resolving",
            SessionState::Resolved => "resolved",
            SessionState::Analysing => "analysing",
            SessionState::Analysed => "analysed",
            SessionState::Installing => "installing",
            SessionState::ResolvingUninstall => "resolving-uninstall",
            SessionState::ReadyToUninstall => "ready-to-uninstall",
            SessionState::Uninstalling => "uninstalling",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Whether an operation is running in this state
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Resolving
                | SessionState::Analysing
                | SessionState::Installing
                | SessionState::ResolvingUninstall
                | SessionState::Uninstalling
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// One package (with its splits) or one module
    Single,
    /// Independent packages, each installed on its own
    Batch,
}

/// Failure recorded in a session's error slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    /// State the session was in when it failed
    pub stage: SessionState,
    pub message: String,
    pub session_fatal: bool,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Downloads and extracted entries go under `<cache_dir>/<session id>`
    pub cache_dir: PathBuf,
    /// Who asked for the install; picks the package config
    pub caller: Option<CallerHint>,
    /// Use this authorizer instead of the configured one
    pub authorizer: Option<AuthorizerKind>,
    pub customize_authorizer: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("sideloader"),
            caller: None,
            authorizer: None,
            customize_authorizer: None,
        }
    }
}

impl SessionOptions {
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_caller(mut self, caller: CallerHint) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_authorizer(mut self, kind: AuthorizerKind) -> Self {
        self.authorizer = Some(kind);
        self
    }

    pub fn with_customize_authorizer(mut self, command: impl Into<String>) -> Self {
        self.customize_authorizer = Some(command.into());
        self
    }
}

/// Process-wide collaborators every session uses
#[derive(Clone)]
pub struct SessionDeps {
    pub resolver: Arc<ConfigResolver>,
    pub pools: Arc<ChannelPools>,
    pub device: Arc<dyn Device>,
    pub network: Arc<dyn NetworkResolver>,
}

impl SessionDeps {
    pub fn new(
        resolver: Arc<ConfigResolver>,
        pools: Arc<ChannelPools>,
        device: Arc<dyn Device>,
    ) -> Self {
        Self {
            resolver,
            pools,
            device,
            network: Arc::new(HttpNetworkResolver::new()),
        }
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkResolver>) -> Self {
        self.network = network;
        self
    }
}

#[derive(Default)]
struct SessionInner {
    state: Option<SessionState>,
    error: Option<SessionError>,
    config: Option<ConfigEntity>,
    data: Vec<DataEntity>,
    analysis: Option<AnalysisResult>,
    mode: Option<SessionMode>,
    signature_confirmed: bool,
    background: Option<bool>,
    members: Vec<BatchMember>,
    uninstall: Option<UninstallInfo>,
    closed: bool,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        self.state.unwrap_or(SessionState::Idle)
    }
}

/// One install or uninstall workflow
pub struct InstallSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    deps: SessionDeps,
    options: SessionOptions,
    progress: ProgressStream,
    cancel: CancellationToken,
    inner: Mutex<SessionInner>,
    authorizer: Mutex<Option<Arc<Authorizer>>>,
}

impl InstallSession {
    pub fn new(id: Uuid, deps: SessionDeps, options: SessionOptions) -> Self {
        debug!("Session[{}]: created", id);
        Self {
            id,
            created_at: Utc::now(),
            deps,
            options,
            progress: ProgressStream::new(),
            cancel: CancellationToken::new(),
            inner: Mutex::new(SessionInner::default()),
            authorizer: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state()
    }

    pub fn error(&self) -> Option<SessionError> {
        self.inner.lock().error.clone()
    }

    /// Effective config, once resolved
    pub fn config(&self) -> Option<ConfigEntity> {
        self.inner.lock().config.clone()
    }

    pub fn data(&self) -> Vec<DataEntity> {
        self.inner.lock().data.clone()
    }

    /// Entities found by the last successful analysis
    pub fn entities(&self) -> Vec<SelectableEntity> {
        self.inner
            .lock()
            .analysis
            .as_ref()
            .map(|a| a.entities.clone())
            .unwrap_or_default()
    }

    pub fn analysis(&self) -> Option<AnalysisResult> {
        self.inner.lock().analysis.clone()
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.inner.lock().mode
    }

    /// Batch members, one per selected package
    ///
    /// Known once analysis picks batch mode and kept in step with the
    /// selection, so each member's stream can be subscribed before
    /// [`install`](Self::install). A member keeps its stream across
    /// selection edits while its package stays selected.
    pub fn members(&self) -> Vec<BatchMember> {
        self.inner.lock().members.clone()
    }

    pub fn member_results(&self) -> Vec<MemberResult> {
        self.inner
            .lock()
            .members
            .iter()
            .map(|m| MemberResult {
                name: m.name().to_string(),
                state: m.state(),
            })
            .collect()
    }

    /// Whether any batch member failed
    pub fn has_failures(&self) -> bool {
        self.inner
            .lock()
            .members
            .iter()
            .any(|m| matches!(m.state(), MemberState::Failed(_)))
    }

    pub fn uninstall_info(&self) -> Option<UninstallInfo> {
        self.inner.lock().uninstall.clone()
    }

    /// Whether progress is presented as a background indicator
    ///
    /// Follows the install mode until [`background`](Self::background) is called.
    pub fn is_background(&self) -> bool {
        let inner = self.inner.lock();
        inner.background.unwrap_or_else(|| {
            inner
                .config
                .as_ref()
                .is_some_and(|c| c.install_mode.is_background())
        })
    }

    pub fn background(&self, value: bool) {
        debug!("Session[{}]: background = {}", self.id, value);
        self.inner.lock().background = Some(value);
    }

    /// Subscribe to events sent from now on
    pub fn progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn progress_stream(&self) -> &ProgressStream {
        &self.progress
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Scratch directory owned by this session
    pub fn work_dir(&self) -> PathBuf {
        self.options.cache_dir.join(self.id.to_string())
    }

    /// Move from one of `from` to `next`
    fn begin(&self, from: &[SessionState], next: SessionState) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::InvalidState("session is closed".to_string()));
        }
        let current = inner.state();
        if !from.contains(&current) {
            return Err(Error::InvalidState(format!(
                "cannot enter {} from {}",
                next, current
            )));
        }
        inner.state = Some(next);
        Ok(())
    }

    fn finish(&self, state: SessionState, event: ProgressEvent) {
        self.inner.lock().state = Some(state);
        info!("Session[{}]: {}", self.id, state);
        self.progress.emit(event);
    }

    /// Record `err` in the error slot, move to Failed and publish
    fn fail(&self, err: Error, event: impl FnOnce(String) -> ProgressEvent) -> Error {
        let message = err.user_message();
        let stage = {
            let mut inner = self.inner.lock();
            let stage = inner.state();
            inner.state = Some(SessionState::Failed);
            inner.error = Some(SessionError {
                stage,
                message: message.clone(),
                session_fatal: err.is_session_fatal(),
            });
            stage
        };
        error!("Session[{}]: {} failed: {}", self.id, stage, err);
        self.progress.emit(event(message));
        err
    }

    /// Run a pre-commit stage that closing the session aborts
    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }

    fn resolve_config(&self) -> Result<ConfigEntity> {
        let mut config = self
            .deps
            .resolver
            .resolve_for_caller(self.options.caller.as_ref())?;
        if let Some(kind) = self.options.authorizer {
            if kind == AuthorizerKind::Global {
                warn!("Session[{}]: ignoring 'global' authorizer override", self.id);
            } else {
                config.authorizer = kind;
                if let Some(command) = &self.options.customize_authorizer {
                    config.customize_authorizer = command.clone();
                }
            }
        }
        debug!(
            "Session[{}]: using config '{}' via {}",
            self.id, config.name, config.authorizer
        );
        Ok(config)
    }

    fn authorizer(&self, config: &ConfigEntity) -> Result<Arc<Authorizer>> {
        let mut slot = self.authorizer.lock();
        if let Some(authorizer) = slot.as_ref() {
            return Ok(Arc::clone(authorizer));
        }
        let authorizer = Arc::new(
            self.deps
                .pools
                .authorizer(config.authorizer, config.customize_command())?,
        );
        *slot = Some(Arc::clone(&authorizer));
        Ok(authorizer)
    }

    fn release_authorizer(&self) {
        if let Some(authorizer) = self.authorizer.lock().take() {
            debug!("Session[{}]: releasing {} channel", self.id, authorizer.kind());
            authorizer.release();
        }
    }

    fn current_config(&self) -> Result<ConfigEntity> {
        self.inner
            .lock()
            .config
            .clone()
            .ok_or_else(|| Error::InvalidState("session has no config".to_string()))
    }

    /// Turn input locators into local data
    ///
    /// Local paths are used in place; remote ones are downloaded into the
    /// session's work directory.
    pub async fn resolve_install(&self, inputs: &[InputLocator]) -> Result<()> {
        self.begin(&[SessionState::Idle], SessionState::Resolving)?;
        self.progress.emit(ProgressEvent::Resolving);

        let result = async {
            let config = self.resolve_config()?;
            let downloads = self.work_dir().join("downloads");
            let data = self
                .cancellable(source::resolve_all(
                    inputs,
                    self.deps.network.as_ref(),
                    &downloads,
                    &self.progress,
                    &self.cancel,
                ))
                .await?;
            Ok::<_, Error>((config, data))
        }
        .await;

        match result {
            Ok((config, data)) => {
                info!("Session[{}]: resolved {} input(s)", self.id, data.len());
                {
                    let mut inner = self.inner.lock();
                    inner.config = Some(config);
                    inner.data = data;
                }
                self.finish(SessionState::Resolved, ProgressEvent::ResolveSuccess);
                Ok(())
            }
            Err(e) => Err(self.fail(e, |_| ProgressEvent::ResolveFailed)),
        }
    }

    /// Classify the resolved data and pick a default selection
    pub async fn analyse(&self) -> Result<()> {
        self.begin(&[SessionState::Resolved], SessionState::Analysing)?;
        self.progress.emit(ProgressEvent::Analysing);

        let data = self.data();
        let result = self
            .cancellable(analyser::analyse(&data, self.deps.device.as_ref()))
            .await;

        match result {
            Ok(analysis) => {
                let mode = if analysis.is_batch() {
                    SessionMode::Batch
                } else {
                    SessionMode::Single
                };
                info!(
                    "Session[{}]: {} in {:?} mode, {} entities",
                    self.id,
                    analysis.data_type,
                    mode,
                    analysis.entities.len()
                );
                {
                    let mut inner = self.inner.lock();
                    inner.members = match mode {
                        SessionMode::Batch => batch_members(&analysis.entities, &[]),
                        SessionMode::Single => Vec::new(),
                    };
                    inner.analysis = Some(analysis);
                    inner.mode = Some(mode);
                }
                self.finish(SessionState::Analysed, ProgressEvent::AnalyseSuccess);
                Ok(())
            }
            Err(e) => Err(self.fail(e, |_| ProgressEvent::AnalyseFailed)),
        }
    }

    /// Accept installing over differently-signed packages
    pub fn confirm_signature_mismatch(&self) {
        info!("Session[{}]: signature mismatch confirmed", self.id);
        self.inner.lock().signature_confirmed = true;
    }

    /// Change whether the entity at `index` will be installed
    ///
    /// The base of a single package cannot be deselected.
    pub fn set_selected(&self, index: usize, selected: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state() != SessionState::Analysed {
            return Err(Error::InvalidState(format!(
                "selection can only change after analysis, state is {}",
                inner.state()
            )));
        }
        let single = inner.mode == Some(SessionMode::Single);
        let analysis = inner
            .analysis
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no analysis".to_string()))?;
        let split_capable = analysis.data_type.is_split_capable();
        let item = analysis.entities.get_mut(index).ok_or_else(|| {
            Error::InvalidState(format!("no entity at index {}", index))
        })?;
        if !selected && single && split_capable && item.entity.is_root() {
            return Err(Error::InvalidState(format!(
                "the base of {} is mandatory",
                item.entity.package_name
            )));
        }
        item.selected = selected;

        if inner.mode == Some(SessionMode::Batch) {
            let members = inner
                .analysis
                .as_ref()
                .map(|a| batch_members(&a.entities, &inner.members))
                .unwrap_or_default();
            inner.members = members;
        }
        Ok(())
    }

    /// Install the selection
    ///
    /// A single package is committed as one set. In batch mode every unit
    /// installs on its own; the session completes once all members are
    /// done and fails only when every one of them failed.
    pub async fn install(&self) -> Result<()> {
        let (config, mode, units, data) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::InvalidState("session is closed".to_string()));
            }
            if inner.state() != SessionState::Analysed {
                return Err(Error::InvalidState(format!(
                    "install requires a finished analysis, state is {}",
                    inner.state()
                )));
            }
            let analysis = inner
                .analysis
                .as_ref()
                .ok_or_else(|| Error::InvalidState("no analysis".to_string()))?;
            if !inner.signature_confirmed {
                if let Some(pkg) = analysis
                    .packages
                    .iter()
                    .find(|p| p.signature == SignatureMatchStatus::Mismatch)
                {
                    warn!(
                        "Session[{}]: {} is signed differently from the installed app",
                        self.id, pkg.package_name
                    );
                    return Err(Error::SignatureMismatch {
                        package: pkg.package_name.clone(),
                    });
                }
            }
            let units = plan_units(&analysis.entities)?;
            if units.is_empty() {
                return Err(Error::InvalidState("nothing selected".to_string()));
            }
            let config = inner
                .config
                .clone()
                .ok_or_else(|| Error::InvalidState("session has no config".to_string()))?;
            let mode = inner.mode.unwrap_or(SessionMode::Single);
            if mode == SessionMode::Batch {
                let members = members_for(units.clone(), &inner.members);
                inner.members = members;
            }
            inner.state = Some(SessionState::Installing);
            (config, mode, units, inner.data.clone())
        };

        let result = self.run_install(&config, mode, units, &data).await;
        self.release_authorizer();
        result
    }

    async fn run_install(
        &self,
        config: &ConfigEntity,
        mode: SessionMode,
        units: Vec<InstallUnit>,
        data: &[DataEntity],
    ) -> Result<()> {
        let prepared = self
            .authorizer(config)
            .and_then(|a| Ok((a, self.deps.resolver.root_implementation()?)));
        let (authorizer, root) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail(e, ProgressEvent::InstallFailed)),
        };
        let work_dir = self.work_dir();
        let ctx = InstallContext {
            authorizer: &authorizer,
            config,
            root,
            work_dir: &work_dir,
            cancel: &self.cancel,
        };

        match mode {
            SessionMode::Single => {
                let unit = &units[0];
                match install_unit(unit, &ctx, &self.progress).await {
                    Ok(()) => {
                        self.finish(SessionState::Completed, ProgressEvent::InstallSuccess);
                        if config.auto_delete {
                            delete_sources(&deletable_sources(data, &units, &[]));
                        }
                        Ok(())
                    }
                    Err(e) => Err(self.fail(e, ProgressEvent::InstallFailed)),
                }
            }
            SessionMode::Batch => {
                let members = self.members();
                let failed = run_batch(&members, &ctx, &self.progress).await;
                let (done, broken): (Vec<&BatchMember>, Vec<&BatchMember>) = members
                    .iter()
                    .partition(|m| m.state() == MemberState::Completed);
                info!(
                    "Session[{}]: batch finished, {} installed, {} failed",
                    self.id,
                    done.len(),
                    failed
                );

                if done.is_empty() {
                    let err = Error::InvalidState(format!(
                        "all {} batch members failed",
                        members.len()
                    ));
                    return Err(self.fail(err, ProgressEvent::InstallFailed));
                }
                self.finish(SessionState::Completed, ProgressEvent::InstallSuccess);
                if config.auto_delete {
                    let done: Vec<InstallUnit> = done.iter().map(|m| m.unit().clone()).collect();
                    let broken: Vec<InstallUnit> =
                        broken.iter().map(|m| m.unit().clone()).collect();
                    delete_sources(&deletable_sources(data, &done, &broken));
                }
                Ok(())
            }
        }
    }

    /// Look up an installed package before removing it
    pub async fn resolve_uninstall(&self, package_name: &str) -> Result<UninstallInfo> {
        self.begin(&[SessionState::Idle], SessionState::ResolvingUninstall)?;
        self.progress.emit(ProgressEvent::Resolving);

        let result = async {
            let config = self.resolve_config()?;
            let info = self
                .cancellable(uninstall::resolve(self.deps.device.as_ref(), package_name))
                .await?;
            Ok::<_, Error>((config, info))
        }
        .await;

        match result {
            Ok((config, info)) => {
                {
                    let mut inner = self.inner.lock();
                    inner.config = Some(config);
                    inner.uninstall = Some(info.clone());
                }
                self.finish(SessionState::ReadyToUninstall, ProgressEvent::ResolveSuccess);
                Ok(info)
            }
            Err(e) => Err(self.fail(e, |_| ProgressEvent::ResolveFailed)),
        }
    }

    /// Remove the package resolved by [`resolve_uninstall`](Self::resolve_uninstall)
    pub async fn uninstall(&self, package_name: &str) -> Result<()> {
        {
            let inner = self.inner.lock();
            let resolved = inner.uninstall.as_ref().map(|u| u.package_name.as_str());
            if inner.state() == SessionState::ReadyToUninstall && resolved != Some(package_name) {
                return Err(Error::InvalidState(format!(
                    "{} was not resolved for removal",
                    package_name
                )));
            }
        }
        self.begin(&[SessionState::ReadyToUninstall], SessionState::Uninstalling)?;
        self.progress.emit(ProgressEvent::Uninstalling);

        let result = async {
            let config = self.current_config()?;
            let flags = self.deps.resolver.uninstall_flags()?;
            let authorizer = self.authorizer(&config)?;
            info!(
                "Session[{}]: removing {} via {} (flags {:#x})",
                self.id,
                package_name,
                authorizer.kind(),
                flags.bits()
            );
            authorizer.uninstall(package_name, flags).await
        }
        .await;
        self.release_authorizer();

        match result {
            Ok(()) => {
                self.finish(SessionState::Completed, ProgressEvent::UninstallSuccess);
                Ok(())
            }
            Err(e) => Err(self.fail(e, ProgressEvent::UninstallFailed)),
        }
    }

    /// Clear all results and return to Idle
    pub fn reset(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::InvalidState("session is closed".to_string()));
            }
            if inner.state().is_busy() {
                return Err(Error::InvalidState(format!(
                    "cannot reset while {}",
                    inner.state()
                )));
            }
            let background = inner.background;
            *inner = SessionInner {
                background,
                ..Default::default()
            };
        }
        self.release_authorizer();
        remove_dir_quietly(&self.work_dir());
        debug!("Session[{}]: reset", self.id);
        Ok(())
    }

    /// Abort pre-commit work, release the channel and drop scratch files
    ///
    /// A commit already handed to the backend runs to completion.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.cancel.cancel();
        self.release_authorizer();
        remove_dir_quietly(&self.work_dir());
        self.progress.emit(ProgressEvent::Finished);
        debug!("Session[{}]: closed", self.id);
    }
}

impl Drop for InstallSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for InstallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("mode", &self.mode())
            .finish()
    }
}

fn remove_dir_quietly(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Could not remove {}: {}", dir.display(), e);
        }
    }
}

/// Members for the current selection of a batch
///
/// An unplannable selection keeps the existing members; `install` reports it.
fn batch_members(entities: &[SelectableEntity], existing: &[BatchMember]) -> Vec<BatchMember> {
    match plan_units(entities) {
        Ok(units) => members_for(units, existing),
        Err(e) => {
            debug!("Batch selection cannot be planned yet: {}", e);
            existing.to_vec()
        }
    }
}

/// Local inputs whose every unit installed
fn deletable_sources(data: &[DataEntity], done: &[InstallUnit], failed: &[InstallUnit]) -> Vec<PathBuf> {
    data.iter()
        .filter(|d| d.is_local())
        .filter(|d| done.iter().any(|u| u.containers().contains(d.path.as_path())))
        .filter(|d| !failed.iter().any(|u| u.containers().contains(d.path.as_path())))
        .map(|d| d.path.clone())
        .collect()
}
