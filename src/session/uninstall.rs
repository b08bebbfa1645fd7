// src/session/uninstall.rs

//! Package removal sub-flow

use crate::device::{Device, InstalledPackage};
use crate::error::{Error, Result};
use tracing::debug;

/// What the user is asked to confirm before removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallInfo {
    pub package_name: String,
    pub label: Option<String>,
    pub version_name: Option<String>,
    pub version_code: Option<i64>,
    /// Bytes of app data that go with the package unless kept
    pub data_size: Option<u64>,
}

impl UninstallInfo {
    /// Label if known, else the package name
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.package_name)
    }
}

impl From<InstalledPackage> for UninstallInfo {
    fn from(pkg: InstalledPackage) -> Self {
        Self {
            package_name: pkg.package_name,
            label: pkg.label,
            version_name: pkg.version_name,
            version_code: pkg.version_code,
            data_size: pkg.data_size,
        }
    }
}

/// Look up `package_name` on the device
pub(crate) async fn resolve(device: &dyn Device, package_name: &str) -> Result<UninstallInfo> {
    if package_name.trim().is_empty() {
        return Err(Error::InputResolution("empty package name".to_string()));
    }
    let installed = device
        .installed_package(package_name)
        .await?
        .ok_or_else(|| {
            Error::InputResolution(format!("{} is not installed", package_name))
        })?;
    debug!("Resolved {} for removal", package_name);
    Ok(installed.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProfile;
    use crate::test_fixtures::FakeDevice;

    #[tokio::test]
    async fn test_resolve_reads_installed_metadata() {
        let mut pkg = InstalledPackage::new("com.example");
        pkg.label = Some("Example".to_string());
        pkg.data_size = Some(4096);
        let device = FakeDevice::new(DeviceProfile::default()).with_installed(pkg);

        let info = resolve(&device, "com.example").await.unwrap();
        assert_eq!(info.display_name(), "Example");
        assert_eq!(info.data_size, Some(4096));
    }

    #[tokio::test]
    async fn test_resolve_missing_package() {
        let device = FakeDevice::new(DeviceProfile::default());
        assert!(matches!(
            resolve(&device, "com.absent").await,
            Err(Error::InputResolution(_))
        ));
        assert!(matches!(
            resolve(&device, " ").await,
            Err(Error::InputResolution(_))
        ));
    }
}
