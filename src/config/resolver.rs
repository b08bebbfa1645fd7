// src/config/resolver.rs

//! Package config, then global preferences, then built-in default
//!
//! The cascade itself is the pure function [`cascade`]; [`ConfigResolver`]
//! only gathers its three inputs from the stores.

use super::{
    AppRepo, CallerHint, ConfigEntity, ConfigRepo, InstallMode, PreferenceKey, Preferences,
    RootImplementation,
};
use crate::authorizer::{AuthorizerKind, UninstallFlags};
use crate::device::Manufacturer;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Global preferences that `Global` fields defer to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalDefaults {
    pub authorizer: Option<AuthorizerKind>,
    pub customize_authorizer: String,
    pub install_mode: Option<InstallMode>,
}

impl GlobalDefaults {
    pub fn load(prefs: &dyn Preferences) -> Result<Self> {
        let authorizer = prefs
            .get(PreferenceKey::Authorizer)?
            .and_then(|v| AuthorizerKind::parse(&v));
        let install_mode = prefs
            .get(PreferenceKey::InstallMode)?
            .and_then(|v| InstallMode::parse(&v));
        let customize_authorizer = prefs
            .get(PreferenceKey::CustomizeAuthorizer)?
            .unwrap_or_default();
        Ok(Self {
            authorizer,
            customize_authorizer,
            install_mode,
        })
    }
}

/// Facts about the running process that pick fallbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverContext {
    pub manufacturer: Manufacturer,
    /// Running as the platform's system installer
    pub system_installer: bool,
}

impl Default for ResolverContext {
    fn default() -> Self {
        Self {
            manufacturer: Manufacturer::Unknown,
            system_installer: false,
        }
    }
}

impl ResolverContext {
    /// Authorizer used when neither the config nor the preferences name one
    pub fn fallback_authorizer(&self) -> AuthorizerKind {
        if self.system_installer {
            AuthorizerKind::None
        } else {
            AuthorizerKind::Shizuku
        }
    }
}

/// Resolve `Global` fields of the chosen record
///
/// `record` is the package's bound config, `first_stored` the first
/// config on file. With neither, the built-in default for the device's
/// manufacturer is used. The result never holds `Global`.
pub fn cascade(
    record: Option<ConfigEntity>,
    first_stored: Option<ConfigEntity>,
    global: &GlobalDefaults,
    context: &ResolverContext,
) -> Result<ConfigEntity> {
    let mut config = record
        .or(first_stored)
        .unwrap_or_else(|| ConfigEntity::builtin(context.manufacturer));

    if config.authorizer == AuthorizerKind::Global {
        config.authorizer = global
            .authorizer
            .filter(|a| *a != AuthorizerKind::Global)
            .unwrap_or_else(|| context.fallback_authorizer());
        config.customize_authorizer = global.customize_authorizer.clone();
    }
    if config.install_mode == InstallMode::Global {
        config.install_mode = global
            .install_mode
            .filter(|m| *m != InstallMode::Global)
            .unwrap_or(InstallMode::Dialog);
    }

    if !config.is_resolved() {
        return Err(Error::ConfigResolution(format!(
            "config '{}' still defers to global after cascading",
            config.name
        )));
    }
    Ok(config)
}

pub struct ConfigResolver {
    configs: Arc<dyn ConfigRepo>,
    apps: Arc<dyn AppRepo>,
    prefs: Arc<dyn Preferences>,
    context: ResolverContext,
}

impl ConfigResolver {
    pub fn new(
        configs: Arc<dyn ConfigRepo>,
        apps: Arc<dyn AppRepo>,
        prefs: Arc<dyn Preferences>,
        context: ResolverContext,
    ) -> Self {
        Self {
            configs,
            apps,
            prefs,
            context,
        }
    }

    pub fn context(&self) -> &ResolverContext {
        &self.context
    }

    /// Effective config for `package_name` (`None` for an unknown caller)
    pub fn resolve(&self, package_name: Option<&str>) -> Result<ConfigEntity> {
        let mut binding = self.apps.find_by_package_name(package_name)?;
        if binding.is_none() && package_name.is_some() {
            binding = self.apps.find_by_package_name(None)?;
        }

        let record = match binding {
            Some(binding) => {
                let found = self.configs.find(binding.config_id)?;
                if found.is_none() {
                    warn!(
                        "Binding for {} points at missing config {}",
                        package_name.unwrap_or("<default>"),
                        binding.config_id
                    );
                }
                found
            }
            None => None,
        };
        let first_stored = if record.is_none() {
            self.configs.all()?.into_iter().next()
        } else {
            None
        };

        let global = GlobalDefaults::load(self.prefs.as_ref())?;
        let config = cascade(record, first_stored, &global, &self.context)?;
        debug!(
            "Config for {}: '{}' via {} ({})",
            package_name.unwrap_or("<default>"),
            config.name,
            config.authorizer,
            config.install_mode
        );
        Ok(config)
    }

    pub fn resolve_for_caller(&self, caller: Option<&CallerHint>) -> Result<ConfigEntity> {
        let package = caller.and_then(CallerHint::package_name);
        self.resolve(package.as_deref())
    }

    /// Uninstall flags from the preferences
    pub fn uninstall_flags(&self) -> Result<UninstallFlags> {
        let bits = self
            .prefs
            .get(PreferenceKey::UninstallFlags)?
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);
        Ok(UninstallFlags::from_bits(bits))
    }

    /// Root solution used to flash modules; Magisk unless configured
    pub fn root_implementation(&self) -> Result<RootImplementation> {
        Ok(self
            .prefs
            .get(PreferenceKey::RootImplementation)?
            .and_then(|v| RootImplementation::parse(&v))
            .unwrap_or(RootImplementation::Magisk))
    }
}
