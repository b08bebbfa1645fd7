// src/analyser/containers.rs

//! Unpacking classified containers into install entities
//!
//! Nested APKs are read in memory to get at their manifests; nothing is
//! written to disk until [`materialize`] is called for an entity that is
//! about to be staged.

use super::detect::{
    ANDROID_MANIFEST, MAX_METADATA_LEN, MODULE_PROP, MODULE_PROP_COMMON, entry_names,
    is_apk_entry, read_entry, read_entry_limited,
};
use super::manifest::{ApkManifest, parse_manifest};
use super::select::{SplitCategory, split_category};
use super::{DataType, EntityKind, EntitySource, InstallEntity, ModuleInfo};
use crate::device::Architecture;
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Manifest plus native code of one APK
struct ApkInfo {
    manifest: ApkManifest,
    abis: Vec<Architecture>,
}

fn inspect_apk<R: Read + Seek>(zip: &mut ZipArchive<R>, what: &str) -> Result<ApkInfo> {
    let xml = read_entry(zip, ANDROID_MANIFEST).ok_or_else(|| {
        Error::InputResolution(format!("{} has no {}", what, ANDROID_MANIFEST))
    })?;
    let manifest = parse_manifest(&xml)?;

    let mut abis = Vec::new();
    for name in entry_names(zip) {
        let Some(rest) = name.strip_prefix("lib/") else {
            continue;
        };
        let Some(arch) = rest.split('/').next().and_then(Architecture::parse) else {
            continue;
        };
        if !abis.contains(&arch) {
            abis.push(arch);
        }
    }
    Ok(ApkInfo { manifest, abis })
}

fn entity_for(info: ApkInfo, source: EntitySource, container: &Path, size: u64) -> InstallEntity {
    let ApkInfo { manifest, abis } = info;
    let kind = match manifest.split {
        Some(name) => {
            let category = if manifest.is_feature_split {
                SplitCategory::Feature
            } else {
                split_category(&name)
            };
            EntityKind::Split {
                name,
                category,
                config_for: manifest.config_for_split,
            }
        }
        None => EntityKind::Base,
    };
    InstallEntity {
        package_name: manifest.package_name,
        version_code: manifest.version_code,
        version_name: manifest.version_name,
        label: manifest.label,
        kind,
        source,
        abis,
        container: container.to_path_buf(),
        size,
    }
}

/// Parse `module.prop` (`key=value` lines)
pub(crate) fn parse_module_prop(text: &str) -> Result<ModuleInfo> {
    let mut info = ModuleInfo::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "id" => info.id = value,
            "name" => info.name = Some(value),
            "version" => info.version = Some(value),
            "versionCode" => info.version_code = value.parse().ok(),
            "author" => info.author = Some(value),
            "description" => info.description = Some(value),
            _ => {}
        }
    }
    if info.id.is_empty() {
        return Err(Error::InputResolution(
            "module.prop does not declare an id".to_string(),
        ));
    }
    Ok(info)
}

fn module_entity<R: Read + Seek>(zip: &mut ZipArchive<R>, path: &Path) -> Result<InstallEntity> {
    let prop = read_entry_limited(zip, MODULE_PROP, MAX_METADATA_LEN)
        .or_else(|| read_entry_limited(zip, MODULE_PROP_COMMON, MAX_METADATA_LEN))
        .ok_or_else(|| {
            Error::InputResolution(format!("{} has no module.prop", path.display()))
        })?;
    let info = parse_module_prop(&String::from_utf8_lossy(&prop))?;
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    Ok(InstallEntity {
        package_name: info.id.clone(),
        version_code: info.version_code,
        version_name: info.version.clone(),
        label: info.name.clone(),
        kind: EntityKind::Module(info),
        source: EntitySource::File(path.to_path_buf()),
        abis: Vec::new(),
        container: path.to_path_buf(),
        size,
    })
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| {
        Error::InputResolution(format!("{} is not a readable archive: {}", path.display(), e))
    })
}

/// Every APK and dex metadata file nested in an archive
fn nested_apks<R: Read + Seek>(zip: &mut ZipArchive<R>, path: &Path) -> Result<Vec<InstallEntity>> {
    let names = entry_names(zip);
    let mut entities = Vec::new();
    let mut dex_metadata = Vec::new();

    for name in names {
        if name.ends_with(".dm") {
            dex_metadata.push(name);
            continue;
        }
        if !is_apk_entry(&name) {
            continue;
        }
        let bytes = read_entry(zip, &name).ok_or_else(|| {
            Error::InputResolution(format!("cannot read {} from {}", name, path.display()))
        })?;
        let size = bytes.len() as u64;
        let mut inner = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            Error::InputResolution(format!("{} is not a valid APK: {}", name, e))
        })?;
        let info = inspect_apk(&mut inner, &name)?;
        debug!("Found {} in {}", name, path.display());
        let source = EntitySource::ZipEntry {
            archive: path.to_path_buf(),
            entry: name,
        };
        entities.push(entity_for(info, source, path, size));
    }

    // Dex metadata only makes sense next to exactly one base
    let base = entities
        .iter()
        .find(|e| matches!(e.kind, EntityKind::Base))
        .map(|e| (e.package_name.clone(), e.version_code, e.version_name.clone()));
    if let Some((package, version_code, version_name)) = base {
        for name in dex_metadata {
            let size = zip.by_name(&name).map(|f| f.size()).unwrap_or(0);
            entities.push(InstallEntity {
                package_name: package.clone(),
                version_code,
                version_name: version_name.clone(),
                label: None,
                kind: EntityKind::DexMetadata,
                source: EntitySource::ZipEntry {
                    archive: path.to_path_buf(),
                    entry: name,
                },
                abis: Vec::new(),
                container: path.to_path_buf(),
                size,
            });
        }
    }
    Ok(entities)
}

/// Unpack the entities of one classified input
pub fn extract(path: &Path, data_type: DataType) -> Result<Vec<InstallEntity>> {
    let entities = match data_type {
        DataType::SingleApk | DataType::SplitApkSet | DataType::MultiApkLoose => {
            let mut zip = open_archive(path)?;
            let info = inspect_apk(&mut zip, &path.display().to_string())?;
            let size = fs::metadata(path)?.len();
            vec![entity_for(
                info,
                EntitySource::File(path.to_path_buf()),
                path,
                size,
            )]
        }
        DataType::SplitApkArchive(_) | DataType::MultiApkZip => {
            let mut zip = open_archive(path)?;
            nested_apks(&mut zip, path)?
        }
        DataType::ModuleArchive => {
            let mut zip = open_archive(path)?;
            vec![module_entity(&mut zip, path)?]
        }
        DataType::MixedModuleApk => {
            let mut zip = open_archive(path)?;
            let module = module_entity(&mut zip, path)?;
            let info = inspect_apk(&mut zip, &path.display().to_string())?;
            let size = module.size;
            vec![
                module,
                entity_for(info, EntitySource::File(path.to_path_buf()), path, size),
            ]
        }
        DataType::MixedModuleZip => {
            let mut zip = open_archive(path)?;
            let mut entities = vec![module_entity(&mut zip, path)?];
            entities.extend(nested_apks(&mut zip, path)?);
            entities
        }
        DataType::None => {
            return Err(Error::Classification {
                path: path.display().to_string(),
                reason: "no installable content".to_string(),
            });
        }
    };

    if entities.is_empty() {
        return Err(Error::InputResolution(format!(
            "{} contains no installable entities",
            path.display()
        )));
    }
    Ok(entities)
}

/// Make `source` available as a plain file, copying zip entries into `dir`
pub fn materialize(source: &EntitySource, dir: &Path) -> Result<PathBuf> {
    match source {
        EntitySource::File(path) => Ok(path.clone()),
        EntitySource::ZipEntry { archive, entry } => {
            fs::create_dir_all(dir)?;
            let target = dir.join(entry.replace('/', "_"));
            let mut zip = open_archive(archive)?;
            let mut file = zip.by_name(entry)?;
            let mut out = File::create(&target)?;
            io::copy(&mut file, &mut out)?;
            debug!("Extracted {} to {}", entry, target.display());
            Ok(target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::ArchiveFlavor;
    use crate::test_fixtures::{ManifestSpec, apk_bytes, write_file, zip_bytes};
    use tempfile::TempDir;

    #[test]
    fn test_single_apk_with_native_code() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            dir.path(),
            "app.apk",
            &apk_bytes(&ManifestSpec::new("com.example", 3), &["arm64-v8a", "x86_64"]),
        );
        let entities = extract(&path, DataType::SingleApk).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].kind, EntityKind::Base);
        assert_eq!(entities[0].version_code, Some(3));
        assert_eq!(
            entities[0].abis,
            vec![Architecture::Arm64V8a, Architecture::X86_64]
        );
    }

    #[test]
    fn test_apks_archive_entities() {
        let dir = TempDir::new().unwrap();
        let archive = zip_bytes(&[
            ("toc.pb", vec![0]),
            (
                "splits/base-master.apk",
                apk_bytes(&ManifestSpec::new("com.example", 5), &[]),
            ),
            (
                "splits/base-arm64_v8a.apk",
                apk_bytes(&ManifestSpec::new("com.example", 5).split("config.arm64_v8a"), &["arm64-v8a"]),
            ),
            (
                "splits/base-master_2.apk",
                apk_bytes(&ManifestSpec::new("com.example", 5), &[]),
            ),
            ("base.dm", vec![1, 2, 3]),
        ]);
        let path = write_file(dir.path(), "bundle.apks", &archive);

        let entities = extract(&path, DataType::SplitApkArchive(ArchiveFlavor::Apks)).unwrap();
        let names: Vec<String> = entities.iter().map(|e| e.install_name()).collect();
        assert_eq!(
            names,
            vec![
                "base.apk".to_string(),
                "split_config.arm64_v8a.apk".to_string(),
                "base.dm".to_string(),
            ]
        );
        assert_eq!(entities[1].arch(), Some(Architecture::Arm64V8a));
    }

    #[test]
    fn test_module_prop() {
        let info = parse_module_prop(
            "# comment\nid=zygisk_example\nname=Example Module\nversion=v1.2\nversionCode=12\n",
        )
        .unwrap();
        assert_eq!(info.id, "zygisk_example");
        assert_eq!(info.name.as_deref(), Some("Example Module"));
        assert_eq!(info.version_code, Some(12));
        assert!(parse_module_prop("name=No Id\n").is_err());
    }

    #[test]
    fn test_mixed_module_zip() {
        let dir = TempDir::new().unwrap();
        let archive = zip_bytes(&[
            ("module.prop", b"id=example\nname=Example\n".to_vec()),
            (
                "system/app/Example.apk",
                apk_bytes(&ManifestSpec::new("com.example", 1), &[]),
            ),
        ]);
        let path = write_file(dir.path(), "module.zip", &archive);
        let entities = extract(&path, DataType::MixedModuleZip).unwrap();
        assert_eq!(entities.len(), 2);
        assert!(entities[0].is_module());
        assert_eq!(entities[1].package_name, "com.example");
    }

    #[test]
    fn test_materialize_copies_zip_entry() {
        let dir = TempDir::new().unwrap();
        let archive = zip_bytes(&[("splits/base.apk", b"payload".to_vec())]);
        let path = write_file(dir.path(), "bundle.apks", &archive);
        let source = EntitySource::ZipEntry {
            archive: path.clone(),
            entry: "splits/base.apk".to_string(),
        };

        let staged = materialize(&source, &dir.path().join("stage")).unwrap();
        assert_eq!(fs::read(&staged).unwrap(), b"payload");
        assert_eq!(
            materialize(&EntitySource::File(path.clone()), dir.path()).unwrap(),
            path
        );
    }

    #[test]
    fn test_corrupt_nested_apk_is_input_error() {
        let dir = TempDir::new().unwrap();
        let archive = zip_bytes(&[("base.apk", b"garbage".to_vec())]);
        let path = write_file(dir.path(), "bundle.apks", &archive);
        let result = extract(&path, DataType::SplitApkArchive(ArchiveFlavor::Apks));
        assert!(matches!(result, Err(Error::InputResolution(_))));
    }
}
