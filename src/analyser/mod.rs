// src/analyser/mod.rs

//! Container classification, entity extraction and split selection
//!
//! Each resolved input ([`DataEntity`]) is sniffed for its container shape
//! ([`DataType`]), unpacked into [`InstallEntity`] values, and given a
//! default selection for the device. Candidates whose package is already
//! installed are checked against the installed signing identity.
//!
//! # Example
//!
//! ```ignore
//! let result = analyser::analyse(&data, device.as_ref()).await?;
//! for item in result.entities.iter().filter(|e| e.selected) {
//!     println!("{}", item.entity.install_name());
//! }
//! ```

mod containers;
mod detect;
pub mod manifest;
mod select;
mod signature;

pub use containers::{extract, materialize};
pub use detect::{declared_default_locale, detect};
pub use select::{
    SplitCategory, match_locale, normalize_locale, normalize_split_name, prioritized_densities,
    select, split_category,
};
pub use signature::{
    SignatureMatchStatus, compare_signatures, signing_identity, signing_identity_bytes,
};

use crate::device::{Architecture, Density, Device, InstalledPackage};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

/// Flavour of a split-APK archive, told apart by its metadata file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFlavor {
    /// `toc.pb` or `base.apk` at the root
    Apks,
    /// `info.json`
    Apkm,
    /// `manifest.json`
    Xapk,
}

impl ArchiveFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFlavor::Apks => "apks",
            ArchiveFlavor::Apkm => "apkm",
            ArchiveFlavor::Xapk => "xapk",
        }
    }
}

/// Recognised container shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    SingleApk,
    /// Several loose APK files making up one package
    SplitApkSet,
    SplitApkArchive(ArchiveFlavor),
    /// Several loose APK files of different packages
    MultiApkLoose,
    MultiApkZip,
    ModuleArchive,
    /// An APK that also carries a module descriptor
    MixedModuleApk,
    /// A module archive that also carries APKs
    MixedModuleZip,
    None,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::SingleApk => "apk",
            DataType::SplitApkSet => "split-apk-set",
            DataType::SplitApkArchive(flavor) => flavor.as_str(),
            DataType::MultiApkLoose => "multi-apk",
            DataType::MultiApkZip => "multi-apk-zip",
            DataType::ModuleArchive => "module",
            DataType::MixedModuleApk => "module-apk",
            DataType::MixedModuleZip => "module-zip",
            DataType::None => "none",
        }
    }

    pub fn is_split_capable(&self) -> bool {
        matches!(
            self,
            DataType::SingleApk | DataType::SplitApkSet | DataType::SplitApkArchive(_)
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a resolved input came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOrigin {
    Local,
    /// Downloaded into the cache directory
    Downloaded(Url),
}

/// One resolved input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntity {
    pub path: PathBuf,
    pub origin: DataOrigin,
}

impl DataEntity {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            origin: DataOrigin::Local,
        }
    }

    pub fn downloaded(path: impl Into<PathBuf>, url: Url) -> Self {
        Self {
            path: path.into(),
            origin: DataOrigin::Downloaded(url),
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == DataOrigin::Local
    }
}

/// Where an entity's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySource {
    File(PathBuf),
    ZipEntry { archive: PathBuf, entry: String },
}

impl fmt::Display for EntitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntitySource::File(path) => write!(f, "{}", path.display()),
            EntitySource::ZipEntry { archive, entry } => {
                write!(f, "{}!{}", archive.display(), entry)
            }
        }
    }
}

/// Fields of a module's `module.prop`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub version_code: Option<i64>,
    pub author: Option<String>,
    pub description: Option<String>,
}

/// Role of an entity within its package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Base,
    Split {
        /// Split name as declared by the manifest
        name: String,
        category: SplitCategory,
        /// Feature split this configuration split belongs to
        config_for: Option<String>,
    },
    DexMetadata,
    Module(ModuleInfo),
}

/// One unit offered for install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEntity {
    pub package_name: String,
    pub version_code: Option<i64>,
    pub version_name: Option<String>,
    pub label: Option<String>,
    pub kind: EntityKind,
    pub source: EntitySource,
    /// ABIs with native libraries inside the APK
    pub abis: Vec<Architecture>,
    /// Input the entity was found in
    pub container: PathBuf,
    pub size: u64,
}

impl InstallEntity {
    /// File name used when staging into an install session
    pub fn install_name(&self) -> String {
        match &self.kind {
            EntityKind::Base => "base.apk".to_string(),
            EntityKind::Split { name, .. } => format!("split_{}.apk", name),
            EntityKind::DexMetadata => "base.dm".to_string(),
            EntityKind::Module(info) => format!("{}.zip", info.id),
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self.kind, EntityKind::Module(_))
    }

    /// Whether this entity is installed on its own, not as part of another
    pub fn is_root(&self) -> bool {
        matches!(self.kind, EntityKind::Base | EntityKind::Module(_))
    }

    pub fn arch(&self) -> Option<Architecture> {
        match &self.kind {
            EntityKind::Split {
                category: SplitCategory::Abi(arch),
                ..
            } => Some(*arch),
            _ => None,
        }
    }

    pub fn density(&self) -> Option<Density> {
        match &self.kind {
            EntityKind::Split {
                category: SplitCategory::Density(density),
                ..
            } => Some(*density),
            _ => None,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Split {
                category: SplitCategory::Language(lang),
                ..
            } => Some(lang),
            _ => None,
        }
    }
}

/// An entity plus whether it will be installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableEntity {
    pub entity: InstallEntity,
    pub selected: bool,
}

impl SelectableEntity {
    pub fn new(entity: InstallEntity, selected: bool) -> Self {
        Self { entity, selected }
    }
}

/// Installed-state check for one candidate package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageAnalysis {
    pub package_name: String,
    pub installed: Option<InstalledPackage>,
    pub signature: SignatureMatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub data_type: DataType,
    pub entities: Vec<SelectableEntity>,
    pub packages: Vec<PackageAnalysis>,
}

impl AnalysisResult {
    /// Packages and modules that install independently of each other
    pub fn root_units(&self) -> Vec<String> {
        let units: BTreeSet<&str> = self
            .entities
            .iter()
            .filter(|e| e.entity.is_root())
            .map(|e| e.entity.package_name.as_str())
            .collect();
        units.into_iter().map(str::to_string).collect()
    }

    pub fn is_batch(&self) -> bool {
        self.root_units().len() > 1
    }

    pub fn has_signature_mismatch(&self) -> bool {
        self.packages
            .iter()
            .any(|p| p.signature == SignatureMatchStatus::Mismatch)
    }
}

/// Classify and unpack `data`, then pick defaults for the device
pub async fn analyse(data: &[DataEntity], device: &dyn Device) -> Result<AnalysisResult> {
    if data.is_empty() {
        return Err(Error::InputResolution("nothing to analyse".to_string()));
    }

    let owned = data.to_vec();
    let containers = tokio::task::spawn_blocking(move || {
        owned
            .iter()
            .map(|item| {
                let data_type = detect(&item.path)?;
                let entities = extract(&item.path, data_type)?;
                let default_locale = declared_default_locale(&item.path, data_type);
                Ok(Container {
                    data_type,
                    entities,
                    default_locale,
                })
            })
            .collect::<Result<Vec<_>>>()
    })
    .await
    .map_err(|e| Error::InvalidState(format!("analysis task failed: {}", e)))??;

    let profile = device.profile();
    let (data_type, entities) = combine(containers, profile)?;
    info!(
        "Analysed {} input(s) as {} with {} entities",
        data.len(),
        data_type,
        entities.len()
    );

    let packages = check_packages(&entities, device).await;
    Ok(AnalysisResult {
        data_type,
        entities,
        packages,
    })
}

/// One classified input
struct Container {
    data_type: DataType,
    entities: Vec<InstallEntity>,
    default_locale: Option<String>,
}

/// Merge per-input results into one selection
fn combine(
    containers: Vec<Container>,
    profile: &crate::device::DeviceProfile,
) -> Result<(DataType, Vec<SelectableEntity>)> {
    if containers.len() == 1 {
        let container = containers.into_iter().next().ok_or_else(|| {
            Error::InvalidState("container list emptied during analysis".to_string())
        })?;
        let data_type = container.data_type;
        let selected = select(
            container.entities,
            data_type,
            profile,
            container.default_locale.as_deref(),
        )?;
        return Ok((data_type, selected));
    }

    if containers.iter().all(|c| c.data_type == DataType::SingleApk) {
        let entities: Vec<InstallEntity> =
            containers.into_iter().flat_map(|c| c.entities).collect();
        let packages: BTreeSet<&str> = entities.iter().map(|e| e.package_name.as_str()).collect();
        let has_splits = entities
            .iter()
            .any(|e| matches!(e.kind, EntityKind::Split { .. }));
        let data_type = if packages.len() == 1 && has_splits {
            DataType::SplitApkSet
        } else {
            DataType::MultiApkLoose
        };
        debug!("Loose APKs grouped as {}", data_type);
        return Ok((data_type, select(entities, data_type, profile, None)?));
    }

    let mut merged = Vec::new();
    for container in containers {
        merged.extend(select(
            container.entities,
            container.data_type,
            profile,
            container.default_locale.as_deref(),
        )?);
    }
    Ok((DataType::MultiApkLoose, merged))
}

async fn check_packages(entities: &[SelectableEntity], device: &dyn Device) -> Vec<PackageAnalysis> {
    let mut seen = BTreeSet::new();
    let mut packages = Vec::new();
    // Selected bases first so the identity checked is the one to be installed
    let mut bases: Vec<&SelectableEntity> = entities
        .iter()
        .filter(|e| matches!(e.entity.kind, EntityKind::Base))
        .collect();
    bases.sort_by_key(|e| !e.selected);

    for base in bases {
        let name = &base.entity.package_name;
        if !seen.insert(name.clone()) {
            continue;
        }
        let installed = match device.installed_package(name).await {
            Ok(installed) => installed,
            Err(e) => {
                warn!("Could not look up installed {}: {}", name, e);
                packages.push(PackageAnalysis {
                    package_name: name.clone(),
                    installed: None,
                    signature: SignatureMatchStatus::UnknownError,
                });
                continue;
            }
        };
        let signature = match &installed {
            None => SignatureMatchStatus::NotInstalled,
            Some(pkg) => signature::check_installed(&base.entity, pkg).await,
        };
        if signature == SignatureMatchStatus::Mismatch {
            warn!("Signature of {} differs from the installed package", name);
        }
        packages.push(PackageAnalysis {
            package_name: name.clone(),
            installed,
            signature,
        });
    }
    packages
}
