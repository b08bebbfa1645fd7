// src/device/host.rs

//! Device queries backed by the platform's command-line tools

use super::{Architecture, Device, DeviceProfile, InstalledPackage, Manufacturer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, warn};

/// Android system uid
const SYSTEM_UID: u32 = 1000;

/// The device this process is running on
#[derive(Debug, Clone)]
pub struct HostDevice {
    profile: DeviceProfile,
    uid: Option<u32>,
}

impl HostDevice {
    /// Read the device profile from system properties
    pub async fn probe() -> Result<Self> {
        let abis = getprop("ro.product.cpu.abilist")
            .await?
            .split(',')
            .filter_map(|abi| Architecture::parse(abi.trim()))
            .collect::<Vec<_>>();

        let density_dpi = match getprop("ro.sf.lcd_density").await?.parse::<u32>() {
            Ok(dpi) => dpi,
            Err(_) => physical_density().await.unwrap_or(160),
        };

        let mut locale = getprop("persist.sys.locale").await?;
        if locale.is_empty() {
            locale = getprop("ro.product.locale").await?;
        }
        let locales = if locale.is_empty() {
            vec!["en-US".to_string()]
        } else {
            vec![locale]
        };

        let manufacturer = Manufacturer::parse(&getprop("ro.product.manufacturer").await?);
        let sdk_int = getprop("ro.build.version.sdk")
            .await?
            .parse()
            .unwrap_or(0);

        let profile = DeviceProfile {
            abis: if abis.is_empty() {
                DeviceProfile::default().abis
            } else {
                abis
            },
            density_dpi,
            locales,
            manufacturer,
            sdk_int,
        };
        debug!("Probed device profile: {:?}", profile);

        Ok(Self {
            profile,
            uid: current_uid(),
        })
    }

    /// Use a known profile instead of probing
    pub fn with_profile(profile: DeviceProfile) -> Self {
        Self {
            profile,
            uid: current_uid(),
        }
    }
}

#[async_trait]
impl Device for HostDevice {
    fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    fn is_system_installer(&self) -> bool {
        self.uid == Some(SYSTEM_UID)
    }

    async fn installed_package(&self, package_name: &str) -> Result<Option<InstalledPackage>> {
        let paths = match run("pm", &["path", package_name]).await {
            Ok(out) => out,
            // pm exits non-zero for unknown packages
            Err(Error::ChannelFailure { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let base_apk = parse_pm_path(&paths);
        if base_apk.is_none() {
            return Ok(None);
        }

        let mut pkg = InstalledPackage::new(package_name);
        pkg.base_apk = base_apk;

        match run("dumpsys", &["package", package_name]).await {
            Ok(dump) => {
                let (code, name) = parse_dumpsys_versions(&dump);
                pkg.version_code = code;
                pkg.version_name = name;
            }
            Err(e) => warn!("dumpsys failed for {}: {}", package_name, e),
        }
        Ok(Some(pkg))
    }

    async fn request_interactive_install(&self, apks: &[PathBuf]) -> Result<()> {
        let [apk] = apks else {
            return Err(Error::CapabilityDenied {
                authorizer: "none".to_string(),
                operation: format!("install {} split files without privilege", apks.len()),
            });
        };
        let uri = format!("file://{}", apk.display());
        run(
            "am",
            &[
                "start",
                "-W",
                "-a",
                "android.intent.action.VIEW",
                "-t",
                "application/vnd.android.package-archive",
                "-d",
                &uri,
            ],
        )
        .await?;
        Ok(())
    }

    async fn request_interactive_uninstall(&self, package_name: &str) -> Result<()> {
        let uri = format!("package:{}", package_name);
        run(
            "am",
            &["start", "-W", "-a", "android.intent.action.DELETE", "-d", &uri],
        )
        .await?;
        Ok(())
    }
}

async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(Error::ChannelFailure {
            channel: "device".to_string(),
            reason: format!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn getprop(name: &str) -> Result<String> {
    Ok(run("getprop", &[name]).await?.trim().to_string())
}

async fn physical_density() -> Option<u32> {
    let out = run("wm", &["density"]).await.ok()?;
    out.lines()
        .find_map(|line| line.strip_prefix("Physical density:"))
        .and_then(|v| v.trim().parse().ok())
}

fn current_uid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

/// Pick the base APK out of `pm path` output
pub(crate) fn parse_pm_path(output: &str) -> Option<PathBuf> {
    let paths: Vec<&str> = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .collect();
    paths
        .iter()
        .find(|p| Path::new(p).file_name().is_some_and(|n| n == "base.apk"))
        .or_else(|| paths.first())
        .map(PathBuf::from)
}

pub(crate) fn parse_dumpsys_versions(dump: &str) -> (Option<i64>, Option<String>) {
    static CODE: OnceLock<Option<Regex>> = OnceLock::new();
    static NAME: OnceLock<Option<Regex>> = OnceLock::new();

    let code = CODE
        .get_or_init(|| Regex::new(r"versionCode=(\d+)").ok())
        .as_ref()
        .and_then(|re| re.captures(dump))
        .and_then(|c| c[1].parse().ok());
    let name = NAME
        .get_or_init(|| Regex::new(r"versionName=(\S+)").ok())
        .as_ref()
        .and_then(|re| re.captures(dump))
        .map(|c| c[1].to_string());
    (code, name)
}
