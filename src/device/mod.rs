// src/device/mod.rs

//! Device profile and capability queries
//!
//! The installer never probes hardware itself. Everything it needs to know
//! about the target (ABI preference order, screen density, locales, what is
//! already installed) comes through the [`Device`] trait. [`HostDevice`]
//! answers those questions with `getprop`, `pm` and `dumpsys`; tests supply
//! their own implementation.

mod host;

pub use host::HostDevice;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// CPU instruction set an APK or split can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Armeabi,
    ArmeabiV7a,
    Arm64V8a,
    X86,
    X86_64,
    Mips,
    Mips64,
}

impl Architecture {
    pub const ALL: [Architecture; 7] = [
        Architecture::Armeabi,
        Architecture::ArmeabiV7a,
        Architecture::Arm64V8a,
        Architecture::X86,
        Architecture::X86_64,
        Architecture::Mips,
        Architecture::Mips64,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Armeabi => "armeabi",
            Architecture::ArmeabiV7a => "armeabi-v7a",
            Architecture::Arm64V8a => "arm64-v8a",
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Mips => "mips",
            Architecture::Mips64 => "mips64",
        }
    }

    /// Parse an ABI name; split names use `_` where ABIs use `-`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "armeabi" => Some(Architecture::Armeabi),
            "armeabi_v7a" => Some(Architecture::ArmeabiV7a),
            "arm64_v8a" => Some(Architecture::Arm64V8a),
            "x86" => Some(Architecture::X86),
            "x86_64" => Some(Architecture::X86_64),
            "mips" => Some(Architecture::Mips),
            "mips64" => Some(Architecture::Mips64),
            _ => None,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Screen density bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Density {
    Ldpi,
    Mdpi,
    Tvdpi,
    Hdpi,
    Xhdpi,
    Xxhdpi,
    Xxxhdpi,
}

impl Density {
    /// All buckets, ascending by dpi
    pub const ALL: [Density; 7] = [
        Density::Ldpi,
        Density::Mdpi,
        Density::Tvdpi,
        Density::Hdpi,
        Density::Xhdpi,
        Density::Xxhdpi,
        Density::Xxxhdpi,
    ];

    pub fn dpi(&self) -> u32 {
        match self {
            Density::Ldpi => 120,
            Density::Mdpi => 160,
            Density::Tvdpi => 213,
            Density::Hdpi => 240,
            Density::Xhdpi => 320,
            Density::Xxhdpi => 480,
            Density::Xxxhdpi => 640,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Density::Ldpi => "ldpi",
            Density::Mdpi => "mdpi",
            Density::Tvdpi => "tvdpi",
            Density::Hdpi => "hdpi",
            Density::Xhdpi => "xhdpi",
            Density::Xxhdpi => "xxhdpi",
            Density::Xxxhdpi => "xxxhdpi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Device vendor, as far as installer defaults care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Manufacturer {
    Google,
    Samsung,
    Xiaomi,
    Huawei,
    Oppo,
    Vivo,
    OnePlus,
    Unknown,
}

impl Manufacturer {
    /// Parse `ro.product.manufacturer`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Manufacturer::Google,
            "samsung" => Manufacturer::Samsung,
            "xiaomi" | "redmi" | "poco" => Manufacturer::Xiaomi,
            "huawei" | "honor" => Manufacturer::Huawei,
            "oppo" | "realme" => Manufacturer::Oppo,
            "vivo" => Manufacturer::Vivo,
            "oneplus" => Manufacturer::OnePlus,
            _ => Manufacturer::Unknown,
        }
    }
}

/// Immutable description of what the device can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Supported ABIs, most preferred first
    pub abis: Vec<Architecture>,
    /// Physical screen density
    pub density_dpi: u32,
    /// BCP-47 locale tags, most preferred first
    pub locales: Vec<String>,
    pub manufacturer: Manufacturer,
    pub sdk_int: u32,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            abis: vec![
                Architecture::Arm64V8a,
                Architecture::ArmeabiV7a,
                Architecture::Armeabi,
            ],
            density_dpi: 440,
            locales: vec!["en-US".to_string()],
            manufacturer: Manufacturer::Unknown,
            sdk_int: 34,
        }
    }
}

impl DeviceProfile {
    pub fn with_abis(mut self, abis: Vec<Architecture>) -> Self {
        self.abis = abis;
        self
    }

    pub fn with_density(mut self, dpi: u32) -> Self {
        self.density_dpi = dpi;
        self
    }

    pub fn with_locales<S: Into<String>>(mut self, locales: Vec<S>) -> Self {
        self.locales = locales.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: Manufacturer) -> Self {
        self.manufacturer = manufacturer;
        self
    }

    /// Position of `arch` in the preference list
    pub fn abi_rank(&self, arch: Architecture) -> Option<usize> {
        self.abis.iter().position(|a| *a == arch)
    }
}

/// A package as currently installed on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub package_name: String,
    pub label: Option<String>,
    pub version_name: Option<String>,
    pub version_code: Option<i64>,
    /// Path of the installed base APK
    pub base_apk: Option<PathBuf>,
    /// Bytes of app data, when it can be measured
    pub data_size: Option<u64>,
}

impl InstalledPackage {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            label: None,
            version_name: None,
            version_code: None,
            base_apk: None,
            data_size: None,
        }
    }
}

/// Capability query over the target device
#[async_trait]
pub trait Device: Send + Sync {
    fn profile(&self) -> &DeviceProfile;

    /// Whether this process runs as the system installer
    fn is_system_installer(&self) -> bool {
        false
    }

    /// Look up an installed package; `Ok(None)` when absent
    async fn installed_package(&self, package_name: &str) -> Result<Option<InstalledPackage>>;

    /// Hand APK files to the platform's user-confirmed install flow
    async fn request_interactive_install(&self, apks: &[PathBuf]) -> Result<()>;

    /// Hand a package to the platform's user-confirmed uninstall flow
    async fn request_interactive_uninstall(&self, package_name: &str) -> Result<()>;
}

/// Vendor installer shipped on MIUI / HyperOS
pub const MIUI_PACKAGE_INSTALLER: &str = "com.miui.packageinstaller";

/// Oldest MIUI installer that copes with session installs from third parties
pub const MIN_MIUI_INSTALLER_VERSION: i64 = 54100;

/// Per-process cache of capability checks
///
/// Each value is computed on first use and kept for the lifetime of the
/// struct.
pub struct DeviceCapabilities {
    device: Arc<dyn Device>,
    vendor_installer: OnceCell<Option<i64>>,
    session_install: OnceCell<bool>,
}

impl DeviceCapabilities {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            vendor_installer: OnceCell::new(),
            session_install: OnceCell::new(),
        }
    }

    async fn vendor_installer_version(&self) -> Option<i64> {
        *self
            .vendor_installer
            .get_or_init(|| async {
                match self.device.installed_package(MIUI_PACKAGE_INSTALLER).await {
                    Ok(Some(pkg)) => Some(pkg.version_code.unwrap_or(0)),
                    Ok(None) => None,
                    Err(e) => {
                        debug!("Vendor installer lookup failed: {}", e);
                        None
                    }
                }
            })
            .await
    }

    /// Whether the MIUI package installer is present
    pub async fn has_vendor_installer(&self) -> bool {
        self.vendor_installer_version().await.is_some()
    }

    /// Whether session-based installs can be used on this device
    ///
    /// Only Xiaomi devices with an outdated vendor installer say no, and a
    /// system installer is always allowed.
    pub async fn session_install_supported(&self) -> bool {
        *self
            .session_install
            .get_or_init(|| async {
                if self.device.is_system_installer() {
                    return true;
                }
                if self.device.profile().manufacturer != Manufacturer::Xiaomi {
                    return true;
                }
                match self.vendor_installer_version().await {
                    Some(version) => {
                        debug!("MIUI package installer version {}", version);
                        version >= MIN_MIUI_INSTALLER_VERSION
                    }
                    None => true,
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::FakeDevice;

    #[test]
    fn test_architecture_parse_accepts_split_spelling() {
        assert_eq!(Architecture::parse("arm64_v8a"), Some(Architecture::Arm64V8a));
        assert_eq!(Architecture::parse("arm64-v8a"), Some(Architecture::Arm64V8a));
        assert_eq!(Architecture::parse("x86_64"), Some(Architecture::X86_64));
        assert_eq!(Architecture::parse("X86"), Some(Architecture::X86));
        assert_eq!(Architecture::parse("riscv64"), None);
    }

    #[test]
    fn test_density_parse() {
        assert_eq!(Density::parse("xxhdpi"), Some(Density::Xxhdpi));
        assert_eq!(Density::parse("TVDPI"), Some(Density::Tvdpi));
        assert_eq!(Density::parse("nodpi"), None);
        assert_eq!(Density::Xxxhdpi.dpi(), 640);
    }

    #[test]
    fn test_manufacturer_aliases() {
        assert_eq!(Manufacturer::parse("Xiaomi"), Manufacturer::Xiaomi);
        assert_eq!(Manufacturer::parse("POCO"), Manufacturer::Xiaomi);
        assert_eq!(Manufacturer::parse("Fairphone"), Manufacturer::Unknown);
    }

    #[test]
    fn test_abi_rank() {
        let profile = DeviceProfile::default();
        assert_eq!(profile.abi_rank(Architecture::Arm64V8a), Some(0));
        assert_eq!(profile.abi_rank(Architecture::X86), None);
    }

    #[tokio::test]
    async fn test_session_install_supported_off_xiaomi() {
        let device = FakeDevice::new(DeviceProfile::default());
        let caps = DeviceCapabilities::new(Arc::new(device));
        assert!(caps.session_install_supported().await);
        assert!(!caps.has_vendor_installer().await);
    }

    #[tokio::test]
    async fn test_old_miui_installer_blocks_session_install() {
        let device = FakeDevice::new(
            DeviceProfile::default().with_manufacturer(Manufacturer::Xiaomi),
        )
        .with_installed(InstalledPackage {
            version_code: Some(54000),
            ..InstalledPackage::new(MIUI_PACKAGE_INSTALLER)
        });
        let caps = DeviceCapabilities::new(Arc::new(device));
        assert!(caps.has_vendor_installer().await);
        assert!(!caps.session_install_supported().await);
    }

    #[tokio::test]
    async fn test_recent_miui_installer_allows_session_install() {
        let device = FakeDevice::new(
            DeviceProfile::default().with_manufacturer(Manufacturer::Xiaomi),
        )
        .with_installed(InstalledPackage {
            version_code: Some(MIN_MIUI_INSTALLER_VERSION),
            ..InstalledPackage::new(MIUI_PACKAGE_INSTALLER)
        });
        let caps = DeviceCapabilities::new(Arc::new(device));
        assert!(caps.session_install_supported().await);
    }

    #[tokio::test]
    async fn test_capabilities_are_cached() {
        let device = Arc::new(FakeDevice::new(
            DeviceProfile::default().with_manufacturer(Manufacturer::Xiaomi),
        ));
        let caps = DeviceCapabilities::new(device.clone());
        caps.session_install_supported().await;
        caps.session_install_supported().await;
        caps.has_vendor_installer().await;
        assert_eq!(device.lookups(MIUI_PACKAGE_INSTALLER), 1);
    }
}
