// src/authorizer/pools.rs

//! Routing from an authorizer kind to its channel pool

use super::{
    Authorizer, AuthorizerKind, BrokerChannel, PrivilegedChannel, ShellChannel,
    UnprivilegedChannel,
};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::recycle::{DEFAULT_RECYCLE_DELAY, RecycleFactory, Recycler, RecyclerManager};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where the backends live
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Command that opens a root shell
    pub su_command: String,
    pub shizuku_socket: PathBuf,
    pub dhizuku_socket: PathBuf,
    pub recycle_delay: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            su_command: "su".to_string(),
            shizuku_socket: PathBuf::from("/dev/socket/shizuku"),
            dhizuku_socket: PathBuf::from("/dev/socket/dhizuku"),
            recycle_delay: DEFAULT_RECYCLE_DELAY,
        }
    }
}

impl PoolOptions {
    pub fn with_su_command(mut self, command: impl Into<String>) -> Self {
        self.su_command = command.into();
        self
    }

    pub fn with_shizuku_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.shizuku_socket = path.into();
        self
    }

    pub fn with_dhizuku_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.dhizuku_socket = path.into();
        self
    }

    pub fn with_recycle_delay(mut self, delay: Duration) -> Self {
        self.recycle_delay = delay;
        self
    }
}

struct ShellFactory {
    kind: AuthorizerKind,
    command: String,
}

impl RecycleFactory<dyn PrivilegedChannel> for ShellFactory {
    fn name(&self) -> &str {
        &self.command
    }

    fn make(&self) -> Result<Arc<dyn PrivilegedChannel>> {
        let channel: Arc<dyn PrivilegedChannel> =
            Arc::new(ShellChannel::new(self.kind, self.command.clone()));
        Ok(channel)
    }

    fn shutdown(&self, entity: &dyn PrivilegedChannel) -> Result<()> {
        entity.shutdown();
        Ok(())
    }
}

struct BrokerFactory {
    kind: AuthorizerKind,
    socket: PathBuf,
}

impl RecycleFactory<dyn PrivilegedChannel> for BrokerFactory {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn make(&self) -> Result<Arc<dyn PrivilegedChannel>> {
        let channel: Arc<dyn PrivilegedChannel> =
            Arc::new(BrokerChannel::new(self.kind, self.socket.clone()));
        Ok(channel)
    }

    fn shutdown(&self, entity: &dyn PrivilegedChannel) -> Result<()> {
        entity.shutdown();
        Ok(())
    }
}

struct UnprivilegedFactory {
    device: Arc<dyn Device>,
}

impl RecycleFactory<dyn PrivilegedChannel> for UnprivilegedFactory {
    fn name(&self) -> &str {
        "none"
    }

    fn make(&self) -> Result<Arc<dyn PrivilegedChannel>> {
        let channel: Arc<dyn PrivilegedChannel> =
            Arc::new(UnprivilegedChannel::new(Arc::clone(&self.device)));
        Ok(channel)
    }

    fn shutdown(&self, entity: &dyn PrivilegedChannel) -> Result<()> {
        entity.shutdown();
        Ok(())
    }
}

/// Every channel pool of the process
///
/// Shells are pooled per command line and brokers per kind, so two
/// sessions asking for the same backend share one live channel.
pub struct ChannelPools {
    options: PoolOptions,
    shells: RecyclerManager<String, dyn PrivilegedChannel>,
    brokers: RecyclerManager<AuthorizerKind, dyn PrivilegedChannel>,
    unprivileged: Recycler<dyn PrivilegedChannel>,
    overrides: Mutex<HashMap<AuthorizerKind, Recycler<dyn PrivilegedChannel>>>,
}

impl ChannelPools {
    pub fn new(device: Arc<dyn Device>, options: PoolOptions) -> Self {
        let delay = options.recycle_delay;
        Self {
            shells: RecyclerManager::with_delay(delay),
            brokers: RecyclerManager::with_delay(delay),
            unprivileged: Recycler::with_delay(UnprivilegedFactory { device }, delay),
            overrides: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Serve `kind` from a caller-provided pool instead of the built-in backend
    pub fn with_pool(self, kind: AuthorizerKind, pool: Recycler<dyn PrivilegedChannel>) -> Self {
        self.overrides.lock().insert(kind, pool);
        self
    }

    /// Pool serving `kind`
    ///
    /// `customize` is the shell command used by [`AuthorizerKind::Customize`].
    pub fn pool(
        &self,
        kind: AuthorizerKind,
        customize: Option<&str>,
    ) -> Result<Recycler<dyn PrivilegedChannel>> {
        if let Some(pool) = self.overrides.lock().get(&kind) {
            return Ok(pool.clone());
        }

        match kind {
            AuthorizerKind::Global => Err(Error::ConfigResolution(
                "authorizer 'global' reached the channel pools unresolved".to_string(),
            )),
            AuthorizerKind::None => Ok(self.unprivileged.clone()),
            AuthorizerKind::Root => Ok(self.shell(kind, &self.options.su_command)),
            AuthorizerKind::Customize => {
                let command = customize
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| {
                        Error::ConfigResolution(
                            "customize authorizer has no command".to_string(),
                        )
                    })?;
                Ok(self.shell(kind, command))
            }
            AuthorizerKind::Shizuku => {
                Ok(self.broker(kind, self.options.shizuku_socket.clone()))
            }
            AuthorizerKind::Dhizuku => {
                Ok(self.broker(kind, self.options.dhizuku_socket.clone()))
            }
        }
    }

    fn shell(&self, kind: AuthorizerKind, command: &str) -> Recycler<dyn PrivilegedChannel> {
        self.shells.get(&command.to_string(), || ShellFactory {
            kind,
            command: command.to_string(),
        })
    }

    fn broker(&self, kind: AuthorizerKind, socket: PathBuf) -> Recycler<dyn PrivilegedChannel> {
        self.brokers.get(&kind, || BrokerFactory { kind, socket })
    }

    /// Authorizer bound to the pool for `kind`
    pub fn authorizer(&self, kind: AuthorizerKind, customize: Option<&str>) -> Result<Authorizer> {
        let pool = self.pool(kind, customize)?;
        debug!("Routing {} requests to pool {}", kind, pool.name());
        Ok(Authorizer::new(kind, pool))
    }

    /// Tear down every channel
    pub fn shutdown(&self) {
        self.shells.clear();
        self.brokers.clear();
        self.unprivileged.recycle_forcibly();
        for pool in self.overrides.lock().values() {
            pool.recycle_forcibly();
        }
    }
}
