// src/analyser/signature.rs

//! Signing identity of APKs
//!
//! The identity is the SHA-256 of the first signer's certificate taken
//! from the APK Signing Block (scheme v3, then v2). APKs signed only with
//! the jar scheme fall back to a digest of their `META-INF` signature
//! block file, which is stable for the same key and content.

use super::detect::{entry_names, read_entry};
use super::{EntitySource, InstallEntity};
use crate::device::InstalledPackage;
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

const EOCD_MAGIC: u32 = 0x0605_4b50;
const EOCD_MIN_SIZE: usize = 22;
const MAX_COMMENT: usize = 0xFFFF;
const SIG_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
const V2_BLOCK_ID: u32 = 0x7109_871a;
const V3_BLOCK_ID: u32 = 0xf053_68c0;

/// How a candidate relates to an installed package of the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureMatchStatus {
    NotInstalled,
    Match,
    Mismatch,
    UnknownError,
}

impl SignatureMatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMatchStatus::NotInstalled => "not-installed",
            SignatureMatchStatus::Match => "match",
            SignatureMatchStatus::Mismatch => "mismatch",
            SignatureMatchStatus::UnknownError => "unknown",
        }
    }
}

impl fmt::Display for SignatureMatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bounds-checked little-endian reader over a byte slice
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    /// A `u32` length-prefixed sub-slice
    fn prefixed(&mut self) -> Option<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

fn find_eocd(apk: &[u8]) -> Option<usize> {
    if apk.len() < EOCD_MIN_SIZE {
        return None;
    }
    let lowest = apk.len().saturating_sub(EOCD_MIN_SIZE + MAX_COMMENT);
    (lowest..=apk.len() - EOCD_MIN_SIZE)
        .rev()
        .find(|&i| apk[i..i + 4] == EOCD_MAGIC.to_le_bytes())
}

/// The id-value pairs of the APK Signing Block, if there is one
fn signing_block_pairs(apk: &[u8]) -> Option<Vec<(u32, &[u8])>> {
    let eocd = find_eocd(apk)?;
    let cd_offset = u32::from_le_bytes(apk.get(eocd + 16..eocd + 20)?.try_into().ok()?) as usize;
    let footer = apk.get(cd_offset.checked_sub(24)?..cd_offset)?;
    if &footer[8..] != SIG_BLOCK_MAGIC {
        return None;
    }
    let size = u64::from_le_bytes(footer[..8].try_into().ok()?) as usize;
    let start = cd_offset.checked_sub(size.checked_add(8)?)?;
    let pairs = apk.get(start + 8..cd_offset - 24)?;

    let mut reader = Reader::new(pairs);
    let mut out = Vec::new();
    while !reader.is_empty() {
        let len = reader.u64()? as usize;
        let value = reader.take(len)?;
        let mut pair = Reader::new(value);
        let id = pair.u32()?;
        out.push((id, &value[4..]));
    }
    Some(out)
}

/// First certificate of the first signer in a v2/v3 signature value
fn first_certificate(value: &[u8]) -> Option<&[u8]> {
    let mut signers = Reader::new(Reader::new(value).prefixed()?);
    let signer = signers.prefixed()?;
    let signed_data = Reader::new(signer).prefixed()?;
    let mut fields = Reader::new(signed_data);
    let _digests = fields.prefixed()?;
    let mut certificates = Reader::new(fields.prefixed()?);
    certificates.prefixed()
}

fn hex_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn v1_identity(apk: &[u8]) -> Option<String> {
    let mut zip = ZipArchive::new(Cursor::new(apk)).ok()?;
    let block = entry_names(&mut zip).into_iter().find(|name| {
        let upper = name.to_ascii_uppercase();
        upper.starts_with("META-INF/")
            && (upper.ends_with(".RSA") || upper.ends_with(".DSA") || upper.ends_with(".EC"))
    })?;
    let bytes = read_entry(&mut zip, &block)?;
    Some(hex_sha256(&bytes))
}

/// Signing identity of an APK held in memory
///
/// `Ok(None)` means the APK carries no signature this reader understands.
pub fn signing_identity_bytes(apk: &[u8]) -> Result<Option<String>> {
    if let Some(pairs) = signing_block_pairs(apk) {
        for wanted in [V3_BLOCK_ID, V2_BLOCK_ID] {
            if let Some((_, value)) = pairs.iter().find(|(id, _)| *id == wanted) {
                let cert = first_certificate(value).ok_or_else(|| {
                    Error::InputResolution("malformed APK signing block".to_string())
                })?;
                return Ok(Some(hex_sha256(cert)));
            }
        }
    }
    Ok(v1_identity(apk))
}

/// Signing identity of the APK at `path`
pub fn signing_identity(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path)?;
    signing_identity_bytes(&bytes)
}

/// Compare two identities; either side unknown is an error status
pub fn compare_signatures(candidate: Option<&str>, installed: Option<&str>) -> SignatureMatchStatus {
    match (candidate, installed) {
        (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => SignatureMatchStatus::Match,
        (Some(_), Some(_)) => SignatureMatchStatus::Mismatch,
        _ => SignatureMatchStatus::UnknownError,
    }
}

fn entity_bytes(source: &EntitySource) -> Result<Vec<u8>> {
    match source {
        EntitySource::File(path) => Ok(fs::read(path)?),
        EntitySource::ZipEntry { archive, entry } => {
            let mut zip = ZipArchive::new(File::open(archive)?)?;
            read_entry(&mut zip, entry).ok_or_else(|| {
                Error::InputResolution(format!("cannot read {} from {}", entry, archive.display()))
            })
        }
    }
}

fn identities(source: &EntitySource, installed: &Path) -> Result<(Option<String>, Option<String>)> {
    let candidate = signing_identity_bytes(&entity_bytes(source)?)?;
    let current = signing_identity(installed)?;
    Ok((candidate, current))
}

/// Compare a candidate base against the installed copy of its package
pub(crate) async fn check_installed(
    candidate: &InstallEntity,
    installed: &InstalledPackage,
) -> SignatureMatchStatus {
    let Some(base_apk) = installed.base_apk.clone() else {
        debug!(
            "Installed {} has no known base APK; signature unknown",
            installed.package_name
        );
        return SignatureMatchStatus::UnknownError;
    };
    let source = candidate.source.clone();
    let result: std::result::Result<Result<_>, _> =
        tokio::task::spawn_blocking(move || identities(&source, &base_apk)).await;

    match result {
        Ok(Ok((candidate_id, installed_id))) => {
            compare_signatures(candidate_id.as_deref(), installed_id.as_deref())
        }
        Ok(Err(e)) => {
            warn!(
                "Signature check for {} failed: {}",
                installed.package_name, e
            );
            SignatureMatchStatus::UnknownError
        }
        Err(e) => {
            warn!("Signature check task failed: {}", e);
            SignatureMatchStatus::UnknownError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{ManifestSpec, apk_bytes, sign_v2, write_file, zip_bytes};
    use tempfile::TempDir;

    fn unsigned() -> Vec<u8> {
        apk_bytes(&ManifestSpec::new("com.example", 1), &[])
    }

    #[test]
    fn test_v2_certificate_digest() {
        let signed = sign_v2(&unsigned(), b"certificate-a");
        let identity = signing_identity_bytes(&signed).unwrap();
        assert_eq!(identity, Some(hex_sha256(b"certificate-a")));
    }

    #[test]
    fn test_signed_apk_is_still_a_valid_zip() {
        let signed = sign_v2(&unsigned(), b"certificate-a");
        assert!(ZipArchive::new(Cursor::new(signed)).is_ok());
    }

    #[test]
    fn test_v1_fallback() {
        let apk = zip_bytes(&[
            ("AndroidManifest.xml", vec![0]),
            ("META-INF/CERT.RSA", b"pkcs7".to_vec()),
        ]);
        assert_eq!(
            signing_identity_bytes(&apk).unwrap(),
            Some(hex_sha256(b"pkcs7"))
        );
    }

    #[test]
    fn test_unsigned_has_no_identity() {
        assert_eq!(signing_identity_bytes(&unsigned()).unwrap(), None);
    }

    #[test]
    fn test_compare_signatures() {
        assert_eq!(
            compare_signatures(Some("ab"), Some("AB")),
            SignatureMatchStatus::Match
        );
        assert_eq!(
            compare_signatures(Some("ab"), Some("cd")),
            SignatureMatchStatus::Mismatch
        );
        assert_eq!(
            compare_signatures(None, Some("cd")),
            SignatureMatchStatus::UnknownError
        );
    }

    #[tokio::test]
    async fn test_check_installed_reads_both_sides() {
        let dir = TempDir::new().unwrap();
        let candidate_path = write_file(dir.path(), "new.apk", &sign_v2(&unsigned(), b"key-1"));
        let installed_path = write_file(dir.path(), "old.apk", &sign_v2(&unsigned(), b"key-2"));

        let entity = InstallEntity {
            package_name: "com.example".to_string(),
            version_code: Some(1),
            version_name: None,
            label: None,
            kind: crate::analyser::EntityKind::Base,
            source: EntitySource::File(candidate_path.clone()),
            abis: Vec::new(),
            container: candidate_path,
            size: 0,
        };
        let mut installed = InstalledPackage::new("com.example");
        assert_eq!(
            check_installed(&entity, &installed).await,
            SignatureMatchStatus::UnknownError
        );

        installed.base_apk = Some(installed_path);
        assert_eq!(
            check_installed(&entity, &installed).await,
            SignatureMatchStatus::Mismatch
        );
    }
}
