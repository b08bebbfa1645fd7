// src/analyser/detect.rs

//! Sniffing the container shape of an input file
//!
//! Detection looks at what the archive holds, never at the file name,
//! except for one fallback: an unreadable file named `*.apk` is still
//! offered as a single APK so the manifest reader can report what is wrong
//! with it.

use super::select::normalize_locale;
use super::{ArchiveFlavor, DataType};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

pub(crate) const MODULE_PROP: &str = "module.prop";
pub(crate) const MODULE_PROP_COMMON: &str = "common/module.prop";
pub(crate) const ANDROID_MANIFEST: &str = "AndroidManifest.xml";
const XAPK_MANIFEST: &str = "manifest.json";
const APKM_INFO: &str = "info.json";
const APKS_TOC: &str = "toc.pb";

/// Upper bound on the buffer reserved from a declared entry size
const PREALLOC_LIMIT: u64 = 1 << 20;
/// Largest metadata entry (JSON descriptors, `module.prop`) read into memory
pub(crate) const MAX_METADATA_LEN: u64 = 1 << 20;

/// `manifest.json` of an XAPK
#[derive(Debug, Deserialize)]
struct XapkManifest {
    package_name: Option<String>,
    version_code: Option<serde_json::Value>,
    split_apks: Option<Vec<serde_json::Value>>,
    /// OBB payloads; accepted as a marker, not installed
    expansions: Option<Vec<serde_json::Value>>,
    default_locale: Option<String>,
}

impl XapkManifest {
    fn is_complete(&self) -> bool {
        self.package_name.is_some()
            && self.version_code.is_some()
            && (self.split_apks.is_some() || self.expansions.is_some())
    }
}

/// `info.json` of an APKM
#[derive(Debug, Deserialize)]
struct ApkmInfo {
    pname: Option<String>,
    versioncode: Option<serde_json::Value>,
    default_locale: Option<String>,
}

impl ApkmInfo {
    fn is_complete(&self) -> bool {
        self.pname.is_some() && self.versioncode.is_some()
    }
}

/// Bytes to reserve for an entry that declares `declared` bytes
///
/// The declared size comes from the archive and is not trusted; the buffer
/// grows past this as real bytes arrive.
fn prealloc_len(declared: u64) -> usize {
    declared.min(PREALLOC_LIMIT) as usize
}

pub(crate) fn read_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut file = zip.by_name(name).ok()?;
    let mut buf = Vec::with_capacity(prealloc_len(file.size()));
    file.read_to_end(&mut buf).ok()?;
    Some(buf)
}

/// Read an entry that must not exceed `limit` bytes
///
/// Oversized entries read as absent.
pub(crate) fn read_entry_limited<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Option<Vec<u8>> {
    let file = zip.by_name(name).ok()?;
    let mut buf = Vec::with_capacity(prealloc_len(file.size().min(limit)));
    file.take(limit + 1).read_to_end(&mut buf).ok()?;
    if buf.len() as u64 > limit {
        debug!("Entry {} exceeds {} bytes, ignoring it", name, limit);
        return None;
    }
    Some(buf)
}

fn read_json<R: Read + Seek, T: serde::de::DeserializeOwned>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> Option<T> {
    let bytes = read_entry_limited(zip, name, MAX_METADATA_LEN)?;
    serde_json::from_slice(&bytes).ok()
}

/// Entry names in archive order
pub(crate) fn entry_names<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Vec<String> {
    (0..zip.len())
        .filter_map(|i| zip.by_index(i).ok().map(|f| f.name().to_string()))
        .collect()
}

/// Whether a zip entry name is an APK payload worth unpacking
pub(crate) fn is_apk_entry(name: &str) -> bool {
    if !name.ends_with(".apk") || name.starts_with("standalones/") {
        return false;
    }
    let file = name.rsplit('/').next().unwrap_or(name);
    !file.starts_with("base-master_")
}

/// Classify an opened archive
pub fn classify_archive<R: Read + Seek>(zip: &mut ZipArchive<R>) -> DataType {
    let names = entry_names(zip);
    let has = |wanted: &str| names.iter().any(|n| n == wanted);
    let has_apks = names.iter().any(|n| is_apk_entry(n));

    if has(MODULE_PROP) || has(MODULE_PROP_COMMON) {
        if has(ANDROID_MANIFEST) {
            return DataType::MixedModuleApk;
        }
        if has_apks {
            return DataType::MixedModuleZip;
        }
        return DataType::ModuleArchive;
    }

    if has(XAPK_MANIFEST)
        && read_json::<_, XapkManifest>(zip, XAPK_MANIFEST).is_some_and(|m| m.is_complete())
    {
        return DataType::SplitApkArchive(ArchiveFlavor::Xapk);
    }

    if has(APKM_INFO) && read_json::<_, ApkmInfo>(zip, APKM_INFO).is_some_and(|i| i.is_complete())
    {
        return DataType::SplitApkArchive(ArchiveFlavor::Apkm);
    }

    if has(ANDROID_MANIFEST) {
        return DataType::SingleApk;
    }

    let has_base = names.iter().any(|n| {
        let file = n.rsplit('/').next().unwrap_or(n);
        file == "base.apk" || file == "base-master.apk"
    });
    if has(APKS_TOC) || has_base {
        return DataType::SplitApkArchive(ArchiveFlavor::Apks);
    }

    if has_apks {
        return DataType::MultiApkZip;
    }

    DataType::None
}

/// Determine the container shape of the file at `path`
pub fn detect(path: &Path) -> Result<DataType> {
    let file = File::open(path).map_err(|e| {
        Error::InputResolution(format!("cannot open {}: {}", path.display(), e))
    })?;

    let data_type = match ZipArchive::new(file) {
        Ok(mut zip) => classify_archive(&mut zip),
        Err(e) => {
            let is_apk = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("apk"));
            if is_apk {
                DataType::SingleApk
            } else {
                return Err(Error::Classification {
                    path: path.display().to_string(),
                    reason: format!("not a zip archive: {}", e),
                });
            }
        }
    };

    debug!("Detected {} as {}", path.display(), data_type);
    if data_type == DataType::None {
        return Err(Error::Classification {
            path: path.display().to_string(),
            reason: "no installable content".to_string(),
        });
    }
    Ok(data_type)
}

/// Fallback locale named by a split archive's descriptor
///
/// Only XAPK and APKM descriptors carry one, as `default_locale`.
pub fn declared_default_locale(path: &Path, data_type: DataType) -> Option<String> {
    let DataType::SplitApkArchive(flavor) = data_type else {
        return None;
    };
    let mut zip = ZipArchive::new(File::open(path).ok()?).ok()?;
    let declared = match flavor {
        ArchiveFlavor::Xapk => read_json::<_, XapkManifest>(&mut zip, XAPK_MANIFEST)?.default_locale,
        ArchiveFlavor::Apkm => read_json::<_, ApkmInfo>(&mut zip, APKM_INFO)?.default_locale,
        ArchiveFlavor::Apks => None,
    };
    declared
        .map(|tag| normalize_locale(&tag))
        .filter(|tag| !tag.is_empty())
}
