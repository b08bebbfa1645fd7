// src/analyser/manifest.rs

//! Reader for compiled (binary XML) `AndroidManifest.xml`
//!
//! Only the attributes the installer needs are extracted: package identity,
//! version, split name and SDK bounds. Attribute names are matched by their
//! framework resource id first, since obfuscators routinely blank the
//! string names, and by name otherwise.

use crate::error::{Error, Result};

const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_TYPE: u16 = 0x0003;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = 0xFFFF_FFFF;

const TYPE_STRING: u8 = 0x03;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;
const TYPE_INT_BOOLEAN: u8 = 0x12;

pub(crate) const ATTR_LABEL: u32 = 0x0101_0001;
pub(crate) const ATTR_MIN_SDK_VERSION: u32 = 0x0101_020c;
pub(crate) const ATTR_VERSION_CODE: u32 = 0x0101_021b;
pub(crate) const ATTR_VERSION_NAME: u32 = 0x0101_021c;
pub(crate) const ATTR_TARGET_SDK_VERSION: u32 = 0x0101_0270;
pub(crate) const ATTR_IS_FEATURE_SPLIT: u32 = 0x0101_055b;

/// Identity of one APK
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApkManifest {
    pub package_name: String,
    pub version_code: Option<i64>,
    pub version_name: Option<String>,
    /// Present on split APKs only
    pub split: Option<String>,
    pub config_for_split: Option<String>,
    pub is_feature_split: bool,
    /// Literal application label; resource references are not resolved
    pub label: Option<String>,
    pub min_sdk: Option<u32>,
    pub target_sdk: Option<u32>,
}

impl ApkManifest {
    pub fn is_split(&self) -> bool {
        self.split.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Other,
}

struct Attr {
    name: String,
    resource_id: Option<u32>,
    value: AttrValue,
}

impl Attr {
    fn is(&self, resource_id: u32, name: &str) -> bool {
        self.resource_id == Some(resource_id) || self.name == name
    }

    fn as_string(&self) -> Option<String> {
        match &self.value {
            AttrValue::Str(s) => Some(s.clone()),
            AttrValue::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match &self.value {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_bool(&self) -> bool {
        match &self.value {
            AttrValue::Bool(b) => *b,
            AttrValue::Str(s) => s == "true",
            _ => false,
        }
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::InputResolution(format!("malformed binary manifest: {}", reason.into()))
}

fn u16_at(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| malformed(format!("truncated at {}", offset)))
}

fn u32_at(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| malformed(format!("truncated at {}", offset)))
}

struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    fn parse(chunk: &[u8]) -> Result<Self> {
        let count = u32_at(chunk, 8)? as usize;
        let flags = u32_at(chunk, 16)?;
        let strings_start = u32_at(chunk, 20)? as usize;
        let header_size = u16_at(chunk, 2)? as usize;
        let utf8 = flags & UTF8_FLAG != 0;

        let mut strings = Vec::with_capacity(count);
        for i in 0..count {
            let offset = u32_at(chunk, header_size + i * 4)? as usize;
            let at = strings_start + offset;
            let s = if utf8 {
                Self::read_utf8(chunk, at)?
            } else {
                Self::read_utf16(chunk, at)?
            };
            strings.push(s);
        }
        Ok(Self { strings })
    }

    fn read_utf8(chunk: &[u8], mut at: usize) -> Result<String> {
        // UTF-16 length, then UTF-8 byte length; each is 1 or 2 bytes
        for pass in 0..2 {
            let first = *chunk.get(at).ok_or_else(|| malformed("string"))?;
            let len_bytes = if first & 0x80 != 0 { 2 } else { 1 };
            if pass == 1 {
                let len = if len_bytes == 2 {
                    (((first & 0x7f) as usize) << 8)
                        | *chunk.get(at + 1).ok_or_else(|| malformed("string"))? as usize
                } else {
                    first as usize
                };
                let start = at + len_bytes;
                let bytes = chunk
                    .get(start..start + len)
                    .ok_or_else(|| malformed("string bytes"))?;
                return Ok(String::from_utf8_lossy(bytes).into_owned());
            }
            at += len_bytes;
        }
        Err(malformed("string"))
    }

    fn read_utf16(chunk: &[u8], at: usize) -> Result<String> {
        let first = u16_at(chunk, at)? as usize;
        let (len, start) = if first & 0x8000 != 0 {
            let second = u16_at(chunk, at + 2)? as usize;
            (((first & 0x7fff) << 16) | second, at + 4)
        } else {
            (first, at + 2)
        };
        let units = (0..len)
            .map(|i| u16_at(chunk, start + i * 2))
            .collect::<Result<Vec<u16>>>()?;
        Ok(String::from_utf16_lossy(&units))
    }

    fn get(&self, index: u32) -> Option<&str> {
        if index == NO_INDEX {
            return None;
        }
        self.strings.get(index as usize).map(String::as_str)
    }
}

/// Parse a compiled manifest
pub fn parse_manifest(data: &[u8]) -> Result<ApkManifest> {
    if u16_at(data, 0)? != RES_XML_TYPE {
        return Err(malformed("not a binary XML document"));
    }
    let header_size = u16_at(data, 2)? as usize;
    let total = (u32_at(data, 4)? as usize).min(data.len());

    let mut pool: Option<StringPool> = None;
    let mut resource_ids: Vec<u32> = Vec::new();
    let mut manifest = ApkManifest::default();
    let mut saw_manifest = false;

    let mut offset = header_size;
    while offset + 8 <= total {
        let chunk_type = u16_at(data, offset)?;
        let chunk_size = u32_at(data, offset + 4)? as usize;
        if chunk_size < 8 || offset + chunk_size > total {
            return Err(malformed(format!("bad chunk size {} at {}", chunk_size, offset)));
        }
        let chunk = &data[offset..offset + chunk_size];

        match chunk_type {
            RES_STRING_POOL_TYPE => pool = Some(StringPool::parse(chunk)?),
            RES_XML_RESOURCE_MAP_TYPE => {
                let chunk_header = u16_at(chunk, 2)? as usize;
                resource_ids = (chunk_header..chunk_size)
                    .step_by(4)
                    .map(|at| u32_at(chunk, at))
                    .collect::<Result<_>>()?;
            }
            RES_XML_START_ELEMENT_TYPE => {
                let pool = pool.as_ref().ok_or_else(|| malformed("element before string pool"))?;
                let (name, attrs) = parse_element(chunk, pool, &resource_ids)?;
                match name.as_str() {
                    "manifest" => {
                        saw_manifest = true;
                        apply_manifest_attrs(&mut manifest, &attrs);
                    }
                    "uses-sdk" => {
                        for attr in &attrs {
                            if attr.is(ATTR_MIN_SDK_VERSION, "minSdkVersion") {
                                manifest.min_sdk = attr.as_int().map(|v| v as u32);
                            } else if attr.is(ATTR_TARGET_SDK_VERSION, "targetSdkVersion") {
                                manifest.target_sdk = attr.as_int().map(|v| v as u32);
                            }
                        }
                    }
                    "application" => {
                        if let Some(label) = attrs.iter().find(|a| a.is(ATTR_LABEL, "label")) {
                            manifest.label = match &label.value {
                                AttrValue::Str(s) => Some(s.clone()),
                                _ => None,
                            };
                        }
                        // Nothing past <application> matters
                        break;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        offset += chunk_size;
    }

    if !saw_manifest || manifest.package_name.is_empty() {
        return Err(malformed("no <manifest package=...> element"));
    }
    Ok(manifest)
}

fn apply_manifest_attrs(manifest: &mut ApkManifest, attrs: &[Attr]) {
    for attr in attrs {
        if attr.is(ATTR_VERSION_CODE, "versionCode") {
            manifest.version_code = attr.as_int();
        } else if attr.is(ATTR_VERSION_NAME, "versionName") {
            manifest.version_name = attr.as_string();
        } else if attr.is(ATTR_IS_FEATURE_SPLIT, "isFeatureSplit") {
            manifest.is_feature_split = attr.as_bool();
        } else if attr.name == "package" {
            manifest.package_name = attr.as_string().unwrap_or_default();
        } else if attr.name == "split" {
            manifest.split = attr.as_string();
        } else if attr.name == "configForSplit" {
            manifest.config_for_split = attr.as_string().filter(|s| !s.is_empty());
        }
    }
}

fn parse_element(chunk: &[u8], pool: &StringPool, resource_ids: &[u32]) -> Result<(String, Vec<Attr>)> {
    let header_size = u16_at(chunk, 2)? as usize;
    let ext = header_size;
    let name_index = u32_at(chunk, ext + 4)?;
    let attr_start = u16_at(chunk, ext + 8)? as usize;
    let attr_size = u16_at(chunk, ext + 10)? as usize;
    let attr_count = u16_at(chunk, ext + 12)? as usize;

    let name = pool.get(name_index).unwrap_or_default().to_string();
    let mut attrs = Vec::with_capacity(attr_count);
    for i in 0..attr_count {
        let at = ext + attr_start + i * attr_size;
        let name_idx = u32_at(chunk, at + 4)?;
        let raw = u32_at(chunk, at + 8)?;
        let data_type = *chunk.get(at + 15).ok_or_else(|| malformed("attribute"))?;
        let value_data = u32_at(chunk, at + 16)?;

        let value = if raw != NO_INDEX {
            AttrValue::Str(pool.get(raw).unwrap_or_default().to_string())
        } else {
            match data_type {
                TYPE_STRING => AttrValue::Str(pool.get(value_data).unwrap_or_default().to_string()),
                TYPE_INT_DEC | TYPE_INT_HEX => AttrValue::Int(value_data as i32 as i64),
                TYPE_INT_BOOLEAN => AttrValue::Bool(value_data != 0),
                _ => AttrValue::Other,
            }
        };
        attrs.push(Attr {
            name: pool.get(name_idx).unwrap_or_default().to_string(),
            resource_id: resource_ids.get(name_idx as usize).copied(),
            value,
        });
    }
    Ok((name, attrs))
}
