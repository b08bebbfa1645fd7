// src/config/mod.rs

//! Install configuration and its layered resolution
//!
//! A [`ConfigEntity`] is a stored profile: which authorizer to use, how to
//! present the install, which platform flags to pass. Packages are bound
//! to profiles through the app table; fields left at `Global` defer to the
//! global preferences. [`ConfigResolver`] turns all of that into one
//! concrete value per package.

mod resolver;
mod store;

pub use resolver::{ConfigResolver, GlobalDefaults, ResolverContext, cascade};
pub use store::{AppBinding, AppRepo, ConfigRepo, PreferenceKey, Preferences};

use crate::authorizer::{AuthorizerKind, InstallParams};
use crate::device::Manufacturer;
use std::fmt;
use url::Url;

/// How an install is presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallMode {
    /// Defer to the global preference
    Global,
    Dialog,
    AutoDialog,
    Notification,
    AutoNotification,
    /// Install silently
    Ignore,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMode::Global => "global",
            InstallMode::Dialog => "dialog",
            InstallMode::AutoDialog => "auto_dialog",
            InstallMode::Notification => "notification",
            InstallMode::AutoNotification => "auto_notification",
            InstallMode::Ignore => "ignore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(InstallMode::Global),
            "dialog" => Some(InstallMode::Dialog),
            "auto_dialog" => Some(InstallMode::AutoDialog),
            "notification" => Some(InstallMode::Notification),
            "auto_notification" => Some(InstallMode::AutoNotification),
            "ignore" => Some(InstallMode::Ignore),
            _ => None,
        }
    }

    /// Whether progress is shown as a persistent background indicator
    pub fn is_background(&self) -> bool {
        matches!(
            self,
            InstallMode::Notification | InstallMode::AutoNotification | InstallMode::Ignore
        )
    }

    /// Whether the install proceeds without waiting for the user
    pub fn is_automatic(&self) -> bool {
        matches!(
            self,
            InstallMode::AutoDialog | InstallMode::AutoNotification | InstallMode::Ignore
        )
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compiler filter for post-install dexopt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexoptMode {
    Verify,
    SpeedProfile,
    Speed,
    Everything,
}

impl DexoptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DexoptMode::Verify => "verify",
            DexoptMode::SpeedProfile => "speed-profile",
            DexoptMode::Speed => "speed",
            DexoptMode::Everything => "everything",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verify" => Some(DexoptMode::Verify),
            "speed-profile" => Some(DexoptMode::SpeedProfile),
            "speed" => Some(DexoptMode::Speed),
            "everything" => Some(DexoptMode::Everything),
            _ => None,
        }
    }
}

impl fmt::Display for DexoptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Platform install reason recorded with the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallReason {
    Unknown,
    Policy,
    DeviceRestore,
    DeviceSetup,
    User,
}

impl InstallReason {
    pub fn code(&self) -> i32 {
        match self {
            InstallReason::Unknown => 0,
            InstallReason::Policy => 1,
            InstallReason::DeviceRestore => 2,
            InstallReason::DeviceSetup => 3,
            InstallReason::User => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => InstallReason::Policy,
            2 => InstallReason::DeviceRestore,
            3 => InstallReason::DeviceSetup,
            4 => InstallReason::User,
            _ => InstallReason::Unknown,
        }
    }
}

/// Where the platform is told the package came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageSource {
    Unspecified,
    Other,
    Store,
    LocalFile,
    DownloadedFile,
}

impl PackageSource {
    pub fn code(&self) -> i32 {
        match self {
            PackageSource::Unspecified => 0,
            PackageSource::Other => 1,
            PackageSource::Store => 2,
            PackageSource::LocalFile => 3,
            PackageSource::DownloadedFile => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => PackageSource::Other,
            2 => PackageSource::Store,
            3 => PackageSource::LocalFile,
            4 => PackageSource::DownloadedFile,
            _ => PackageSource::Unspecified,
        }
    }
}

/// Root solution that flashes module archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootImplementation {
    Magisk,
    KernelSu,
    APatch,
}

impl RootImplementation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootImplementation::Magisk => "magisk",
            RootImplementation::KernelSu => "kernelsu",
            RootImplementation::APatch => "apatch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "magisk" => Some(RootImplementation::Magisk),
            "kernelsu" | "ksu" => Some(RootImplementation::KernelSu),
            "apatch" | "apd" => Some(RootImplementation::APatch),
            _ => None,
        }
    }

    /// Command line that installs the module archive at `path`
    pub fn module_install_command(&self, path: &str) -> Vec<String> {
        let argv: &[&str] = match self {
            RootImplementation::Magisk => &["magisk", "--install-module"],
            RootImplementation::KernelSu => &["ksud", "module", "install"],
            RootImplementation::APatch => &["apd", "module", "install"],
        };
        argv.iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(path.to_string()))
            .collect()
    }
}

impl fmt::Display for RootImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const MIUI_INSTALLER: &str = crate::device::MIUI_PACKAGE_INSTALLER;

/// A stored install profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntity {
    pub id: Option<i64>,
    pub name: String,
    pub description: String,
    pub authorizer: AuthorizerKind,
    /// Shell command for [`AuthorizerKind::Customize`]
    pub customize_authorizer: String,
    pub install_mode: InstallMode,
    pub installer: Option<String>,
    pub install_reason: InstallReason,
    pub package_source: PackageSource,
    /// Compile the package after a successful install
    pub enable_dexopt: bool,
    pub dexopt_mode: DexoptMode,
    /// Recompile even if the existing code is up to date
    pub force_dexopt: bool,
    pub auto_delete: bool,
    pub all_users: bool,
    pub allow_test_only: bool,
    pub allow_downgrade: bool,
}

impl Default for ConfigEntity {
    fn default() -> Self {
        Self {
            id: None,
            name: "Default".to_string(),
            description: String::new(),
            authorizer: AuthorizerKind::Global,
            customize_authorizer: String::new(),
            install_mode: InstallMode::Global,
            installer: None,
            install_reason: InstallReason::Unknown,
            package_source: PackageSource::Unspecified,
            enable_dexopt: false,
            dexopt_mode: DexoptMode::SpeedProfile,
            force_dexopt: false,
            auto_delete: false,
            all_users: false,
            allow_test_only: false,
            allow_downgrade: false,
        }
    }
}

impl ConfigEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Built-in default, with the vendor variant where one is needed
    pub fn builtin(manufacturer: Manufacturer) -> Self {
        match manufacturer {
            Manufacturer::Xiaomi => Self {
                install_mode: InstallMode::Dialog,
                installer: Some(MIUI_INSTALLER.to_string()),
                ..Default::default()
            },
            _ => Self::default(),
        }
    }

    pub fn with_authorizer(mut self, authorizer: AuthorizerKind) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_customize_authorizer(mut self, command: impl Into<String>) -> Self {
        self.customize_authorizer = command.into();
        self
    }

    pub fn with_install_mode(mut self, mode: InstallMode) -> Self {
        self.install_mode = mode;
        self
    }

    pub fn with_installer(mut self, installer: impl Into<String>) -> Self {
        self.installer = Some(installer.into());
        self
    }

    /// Enable post-install compilation with `mode`
    pub fn with_dexopt(mut self, mode: DexoptMode, force: bool) -> Self {
        self.enable_dexopt = true;
        self.dexopt_mode = mode;
        self.force_dexopt = force;
        self
    }

    pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    /// Whether both cascading fields hold concrete values
    pub fn is_resolved(&self) -> bool {
        self.authorizer != AuthorizerKind::Global && self.install_mode != InstallMode::Global
    }

    /// Custom shell command, if this profile uses one
    pub fn customize_command(&self) -> Option<&str> {
        (self.authorizer == AuthorizerKind::Customize)
            .then_some(self.customize_authorizer.trim())
            .filter(|c| !c.is_empty())
    }

    /// Platform session options for installing `package_name`
    pub fn install_params(&self, package_name: Option<&str>, total_size: Option<u64>) -> InstallParams {
        InstallParams {
            package_name: package_name.map(str::to_string),
            installer: self.installer.clone(),
            total_size,
            allow_test_only: self.allow_test_only,
            allow_downgrade: self.allow_downgrade,
            all_users: self.all_users,
            install_reason: self.install_reason.code(),
            package_source: self.package_source.code(),
        }
    }
}

/// Who asked for the install, as far as it can be told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerHint {
    /// Calling package name
    Package(String),
    /// `android-app://<package>/...` referrer
    Referrer(String),
    /// Authority of the content URI the data came from
    Authority(String),
}

const SYSTEM_AUTHORITIES: &[&str] = &["media", "com.android.externalstorage.documents"];

impl CallerHint {
    /// Package whose config should apply; `None` means the default binding
    pub fn package_name(&self) -> Option<String> {
        match self {
            CallerHint::Package(name) => Some(name.clone()).filter(|n| !n.is_empty()),
            CallerHint::Referrer(referrer) => {
                let url = Url::parse(referrer).ok()?;
                if url.scheme() != "android-app" {
                    return None;
                }
                url.host_str().map(str::to_string)
            }
            CallerHint::Authority(authority) => {
                if SYSTEM_AUTHORITIES.contains(&authority.as_str())
                    || authority.starts_with("com.android.providers.")
                {
                    return None;
                }
                let lower = authority.to_ascii_lowercase();
                let stripped = [".fileprovider", ".provider"]
                    .iter()
                    .find(|suffix| lower.ends_with(*suffix))
                    .map(|suffix| &authority[..authority.len() - suffix.len()])
                    .unwrap_or(authority);
                Some(stripped.to_string()).filter(|n| !n.is_empty())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_mode_roundtrip() {
        for mode in [
            InstallMode::Global,
            InstallMode::Dialog,
            InstallMode::AutoDialog,
            InstallMode::Notification,
            InstallMode::AutoNotification,
            InstallMode::Ignore,
        ] {
            assert_eq!(InstallMode::parse(mode.as_str()), Some(mode));
        }
        assert!(InstallMode::Notification.is_background());
        assert!(!InstallMode::Dialog.is_automatic());
    }

    #[test]
    fn test_xiaomi_builtin() {
        let config = ConfigEntity::builtin(Manufacturer::Xiaomi);
        assert_eq!(config.install_mode, InstallMode::Dialog);
        assert_eq!(config.installer.as_deref(), Some(MIUI_INSTALLER));
        assert_eq!(ConfigEntity::builtin(Manufacturer::Google), ConfigEntity::default());
    }

    #[test]
    fn test_customize_command_only_for_customize() {
        let config = ConfigEntity::default().with_customize_authorizer("su -c sh");
        assert_eq!(config.customize_command(), None);
        let config = config.with_authorizer(AuthorizerKind::Customize);
        assert_eq!(config.customize_command(), Some("su -c sh"));
    }

    #[test]
    fn test_module_install_command() {
        assert_eq!(
            RootImplementation::KernelSu.module_install_command("/c/m.zip"),
            vec!["ksud", "module", "install", "/c/m.zip"]
        );
        assert_eq!(RootImplementation::parse("APD"), Some(RootImplementation::APatch));
    }

    #[test]
    fn test_caller_hint_package() {
        assert_eq!(
            CallerHint::Referrer("android-app://com.android.chrome/".to_string()).package_name(),
            Some("com.android.chrome".to_string())
        );
        assert_eq!(
            CallerHint::Referrer("https://example.com".to_string()).package_name(),
            None
        );
        assert_eq!(
            CallerHint::Authority("org.telegram.messenger.provider".to_string()).package_name(),
            Some("org.telegram.messenger".to_string())
        );
        assert_eq!(
            CallerHint::Authority("com.example.FileProvider".to_string()).package_name(),
            Some("com.example".to_string())
        );
        assert_eq!(
            CallerHint::Authority("com.android.providers.downloads.documents".to_string())
                .package_name(),
            None
        );
        assert_eq!(CallerHint::Authority("media".to_string()).package_name(), None);
    }
}
