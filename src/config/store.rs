// src/config/store.rs

//! Narrow views of the persistent stores the resolver reads

use super::ConfigEntity;
use crate::error::Result;

/// Binding of a package (or, with no package, of everything) to a config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBinding {
    pub id: Option<i64>,
    /// `None` is the fallback binding used for unknown callers
    pub package_name: Option<String>,
    pub config_id: i64,
}

impl AppBinding {
    pub fn new(package_name: Option<String>, config_id: i64) -> Self {
        Self {
            id: None,
            package_name,
            config_id,
        }
    }
}

pub trait ConfigRepo: Send + Sync {
    fn find(&self, id: i64) -> Result<Option<ConfigEntity>>;

    /// All configs in insertion order
    fn all(&self) -> Result<Vec<ConfigEntity>>;

    /// Store `entity`, assigning its id
    fn insert(&self, entity: &mut ConfigEntity) -> Result<i64>;
}

pub trait AppRepo: Send + Sync {
    fn find_by_package_name(&self, package_name: Option<&str>) -> Result<Option<AppBinding>>;

    fn all(&self) -> Result<Vec<AppBinding>>;

    /// Store `binding`, replacing any binding of the same package
    fn insert(&self, binding: &mut AppBinding) -> Result<i64>;
}

/// Keys of the scalar preference store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    Authorizer,
    CustomizeAuthorizer,
    InstallMode,
    UninstallFlags,
    RootImplementation,
}

impl PreferenceKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceKey::Authorizer => "authorizer",
            PreferenceKey::CustomizeAuthorizer => "customize_authorizer",
            PreferenceKey::InstallMode => "install_mode",
            PreferenceKey::UninstallFlags => "uninstall_flags",
            PreferenceKey::RootImplementation => "root_implementation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorizer" => Some(PreferenceKey::Authorizer),
            "customize_authorizer" => Some(PreferenceKey::CustomizeAuthorizer),
            "install_mode" => Some(PreferenceKey::InstallMode),
            "uninstall_flags" => Some(PreferenceKey::UninstallFlags),
            "root_implementation" => Some(PreferenceKey::RootImplementation),
            _ => None,
        }
    }
}

pub trait Preferences: Send + Sync {
    fn get(&self, key: PreferenceKey) -> Result<Option<String>>;

    fn set(&self, key: PreferenceKey, value: &str) -> Result<()>;
}
