// src/analyser/select.rs

//! Choosing which entities of a container to install
//!
//! Split containers keep the base, dex metadata and every feature split,
//! then pick one ABI split, one density split and one language split for
//! the device. Multi-APK containers pick the best base per package. Mixed
//! module containers start empty and leave the choice to the caller.

use super::{DataType, EntityKind, InstallEntity, SelectableEntity};
use crate::device::{Architecture, Density, DeviceProfile};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// What a configuration split applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitCategory {
    Abi(Architecture),
    Density(Density),
    /// Normalised language tag, e.g. `en` or `zh-tw`
    Language(String),
    Feature,
}

impl fmt::Display for SplitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitCategory::Abi(arch) => write!(f, "abi:{}", arch),
            SplitCategory::Density(density) => write!(f, "density:{}", density),
            SplitCategory::Language(lang) => write!(f, "language:{}", lang),
            SplitCategory::Feature => write!(f, "feature"),
        }
    }
}

/// Strip packaging decoration from a split name
///
/// `split_config.arm64_v8a.apk`, `config.arm64_v8a` and
/// `feature.config.arm64_v8a` all normalise to `arm64-v8a`; `base-en`
/// becomes `en`.
pub fn normalize_split_name(name: &str) -> String {
    let mut name = name.strip_suffix(".apk").unwrap_or(name);
    name = name.strip_prefix("split_").unwrap_or(name);
    name = name.strip_prefix("base-").unwrap_or(name);
    name = name.strip_prefix("config.").unwrap_or(name);
    if let Some(pos) = name.rfind(".config.") {
        name = &name[pos + ".config.".len()..];
    }
    name.replace('_', "-")
}

/// Classify a split by its (raw or normalised) name
pub fn split_category(name: &str) -> SplitCategory {
    let normalized = normalize_split_name(name);
    if let Some(arch) = Architecture::parse(&normalized) {
        return SplitCategory::Abi(arch);
    }
    if let Some(density) = Density::parse(&normalized) {
        return SplitCategory::Density(density);
    }
    if is_language_tag(&normalized) {
        return SplitCategory::Language(normalize_locale(&normalized));
    }
    SplitCategory::Feature
}

fn is_language_tag(tag: &str) -> bool {
    let mut parts = tag.split('-');
    let language = parts.next().unwrap_or_default();
    (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_alphabetic())
}

/// Lower-case a locale tag, fold Android's `-r` region marker and map
/// retired ISO 639 codes to their current form
pub fn normalize_locale(tag: &str) -> String {
    let tag = tag.replace('_', "-").to_ascii_lowercase();
    let mut parts: Vec<String> = tag
        .split('-')
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, p)| match p.strip_prefix('r') {
            Some(region) if i > 0 && region.len() == 2 => region.to_string(),
            _ => p.to_string(),
        })
        .collect();
    if let Some(language) = parts.first_mut() {
        *language = match language.as_str() {
            "iw" => "he".to_string(),
            "in" => "id".to_string(),
            "ji" => "yi".to_string(),
            other => other.to_string(),
        };
    }
    parts.join("-")
}

fn language_of(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

/// Density buckets in the order they should be tried
///
/// Buckets at or above the device density come first, nearest first, then
/// the buckets below it, nearest first.
pub fn prioritized_densities(device_dpi: u32) -> Vec<Density> {
    let mut order: Vec<Density> = Density::ALL
        .into_iter()
        .filter(|d| d.dpi() >= device_dpi)
        .collect();
    order.extend(Density::ALL.into_iter().rev().filter(|d| d.dpi() < device_dpi));
    order
}

/// Pick the language split for the device's locale list
///
/// Each device locale is tried for an exact match, then for a match on
/// the language alone. Failing that, the archive's declared default is
/// used when it is on offer, and `en` last.
pub fn match_locale<'a>(
    device_locales: &[String],
    available: &'a [String],
    declared_default: Option<&str>,
) -> Option<&'a String> {
    for locale in device_locales {
        let wanted = normalize_locale(locale);
        if let Some(found) = available.iter().find(|a| **a == wanted) {
            return Some(found);
        }
        let language = language_of(&wanted);
        if let Some(found) = available.iter().find(|a| language_of(a) == language) {
            return Some(found);
        }
    }
    declared_default
        .and_then(|tag| available.iter().find(|a| a.as_str() == tag))
        .or_else(|| available.iter().find(|a| a.as_str() == "en"))
}

/// Default selection for the entities of one container
///
/// `default_locale` is the fallback language the container declares, if any.
pub fn select(
    entities: Vec<InstallEntity>,
    data_type: DataType,
    profile: &DeviceProfile,
    default_locale: Option<&str>,
) -> Result<Vec<SelectableEntity>> {
    match data_type {
        DataType::MixedModuleApk | DataType::MixedModuleZip => Ok(entities
            .into_iter()
            .map(|entity| SelectableEntity::new(entity, false))
            .collect()),
        DataType::MultiApkZip | DataType::MultiApkLoose => Ok(select_best_bases(entities, profile)),
        DataType::ModuleArchive => Ok(entities
            .into_iter()
            .map(|entity| SelectableEntity::new(entity, true))
            .collect()),
        DataType::SingleApk | DataType::SplitApkSet | DataType::SplitApkArchive(_) => {
            select_splits(entities, profile, default_locale)
        }
        DataType::None => Err(Error::InvalidState(
            "cannot select from an unclassified container".to_string(),
        )),
    }
}

/// Best-ranked ABI an entity can run with on this device
///
/// `Some(usize::MAX)` marks an entity without native code.
fn abi_score(entity: &InstallEntity, profile: &DeviceProfile) -> Option<usize> {
    if entity.abis.is_empty() {
        return Some(usize::MAX);
    }
    entity.abis.iter().filter_map(|a| profile.abi_rank(*a)).min()
}

fn select_best_bases(entities: Vec<InstallEntity>, profile: &DeviceProfile) -> Vec<SelectableEntity> {
    let mut best: BTreeMap<String, usize> = BTreeMap::new();
    for (index, entity) in entities.iter().enumerate() {
        if !matches!(entity.kind, EntityKind::Base) {
            continue;
        }
        let Some(score) = abi_score(entity, profile) else {
            continue;
        };
        match best.get(&entity.package_name) {
            Some(&current) => {
                let other = &entities[current];
                let other_score = abi_score(other, profile).unwrap_or(usize::MAX);
                let better = score < other_score
                    || (score == other_score
                        && entity.version_code.unwrap_or(0) > other.version_code.unwrap_or(0));
                if better {
                    best.insert(entity.package_name.clone(), index);
                }
            }
            None => {
                best.insert(entity.package_name.clone(), index);
            }
        }
    }

    entities
        .into_iter()
        .enumerate()
        .map(|(index, entity)| {
            let selected = match entity.kind {
                EntityKind::Base => best.get(&entity.package_name) == Some(&index),
                EntityKind::Module(_) => true,
                _ => false,
            };
            if matches!(entity.kind, EntityKind::Base) && !best.contains_key(&entity.package_name)
            {
                warn!(
                    "No build of {} runs on this device; leaving it unselected",
                    entity.package_name
                );
            }
            SelectableEntity::new(entity, selected)
        })
        .collect()
}

/// Splits of one base or feature, keyed by package and owning split
type SplitGroup = (String, Option<String>);

fn select_splits(
    entities: Vec<InstallEntity>,
    profile: &DeviceProfile,
    default_locale: Option<&str>,
) -> Result<Vec<SelectableEntity>> {
    let mut groups: BTreeMap<SplitGroup, Vec<usize>> = BTreeMap::new();
    for (index, entity) in entities.iter().enumerate() {
        if let EntityKind::Split { config_for, category, .. } = &entity.kind {
            if *category != SplitCategory::Feature {
                groups
                    .entry((entity.package_name.clone(), config_for.clone()))
                    .or_default()
                    .push(index);
            }
        }
    }

    let mut chosen = vec![false; entities.len()];
    for (index, entity) in entities.iter().enumerate() {
        chosen[index] = matches!(
            entity.kind,
            EntityKind::Base
                | EntityKind::DexMetadata
                | EntityKind::Split {
                    category: SplitCategory::Feature,
                    ..
                }
        );
    }

    let densities = prioritized_densities(profile.density_dpi);
    for ((package, owner), members) in &groups {
        let category_of = |i: &usize| match &entities[*i].kind {
            EntityKind::Split { category, .. } => Some(category.clone()),
            _ => None,
        };

        let abis: Vec<(usize, Architecture)> = members
            .iter()
            .filter_map(|i| match category_of(i) {
                Some(SplitCategory::Abi(arch)) => Some((*i, arch)),
                _ => None,
            })
            .collect();
        if !abis.is_empty() {
            let pick = profile
                .abis
                .iter()
                .find_map(|want| abis.iter().find(|(_, a)| a == want));
            match pick {
                Some((i, arch)) => {
                    debug!("Split[{}]: using ABI {}", package, arch);
                    chosen[*i] = true;
                }
                None => {
                    let offered: Vec<&str> = abis.iter().map(|(_, a)| a.as_str()).collect();
                    return Err(Error::SplitResolution {
                        package: package.clone(),
                        reason: format!(
                            "no ABI split for this device{} (offered: {})",
                            owner
                                .as_ref()
                                .map(|o| format!(" in feature {}", o))
                                .unwrap_or_default(),
                            offered.join(", ")
                        ),
                    });
                }
            }
        }

        let dens: Vec<(usize, Density)> = members
            .iter()
            .filter_map(|i| match category_of(i) {
                Some(SplitCategory::Density(d)) => Some((*i, d)),
                _ => None,
            })
            .collect();
        if let Some((i, density)) = densities
            .iter()
            .find_map(|want| dens.iter().find(|(_, d)| d == want))
        {
            debug!("Split[{}]: using density {}", package, density);
            chosen[*i] = true;
        }

        let langs: Vec<(usize, String)> = members
            .iter()
            .filter_map(|i| match category_of(i) {
                Some(SplitCategory::Language(l)) => Some((*i, l)),
                _ => None,
            })
            .collect();
        let tags: Vec<String> = langs.iter().map(|(_, l)| l.clone()).collect();
        if let Some(tag) = match_locale(&profile.locales, &tags, default_locale) {
            if let Some((i, _)) = langs.iter().find(|(_, l)| l == tag) {
                debug!("Split[{}]: using language {}", package, tag);
                chosen[*i] = true;
            }
        }
    }

    Ok(entities
        .into_iter()
        .zip(chosen)
        .map(|(entity, selected)| SelectableEntity::new(entity, selected))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::{ArchiveFlavor, EntitySource, ModuleInfo};
    use std::path::PathBuf;

    fn entity(package: &str, kind: EntityKind) -> InstallEntity {
        InstallEntity {
            package_name: package.to_string(),
            version_code: Some(1),
            version_name: None,
            label: None,
            kind,
            source: EntitySource::File(PathBuf::from("/in/x.apk")),
            abis: Vec::new(),
            container: PathBuf::from("/in/x.apks"),
            size: 0,
        }
    }

    fn split(package: &str, raw: &str) -> InstallEntity {
        entity(
            package,
            EntityKind::Split {
                name: raw.to_string(),
                category: split_category(raw),
                config_for: None,
            },
        )
    }

    fn selected_names(result: &[SelectableEntity]) -> Vec<String> {
        result
            .iter()
            .filter(|e| e.selected)
            .map(|e| e.entity.install_name())
            .collect()
    }

    #[test]
    fn test_normalize_split_name() {
        assert_eq!(normalize_split_name("split_config.arm64_v8a.apk"), "arm64-v8a");
        assert_eq!(normalize_split_name("config.xxhdpi"), "xxhdpi");
        assert_eq!(normalize_split_name("base-en"), "en");
        assert_eq!(normalize_split_name("feature.config.hdpi"), "hdpi");
        assert_eq!(normalize_split_name("dynamic_feature"), "dynamic-feature");
    }

    #[test]
    fn test_split_category() {
        assert_eq!(
            split_category("config.arm64_v8a"),
            SplitCategory::Abi(Architecture::Arm64V8a)
        );
        assert_eq!(
            split_category("config.xhdpi"),
            SplitCategory::Density(Density::Xhdpi)
        );
        assert_eq!(
            split_category("config.zh_rTW"),
            SplitCategory::Language("zh-tw".to_string())
        );
        assert_eq!(split_category("camera_module"), SplitCategory::Feature);
    }

    #[test]
    fn test_legacy_locale_codes() {
        assert_eq!(normalize_locale("iw-IL"), "he-il");
        assert_eq!(normalize_locale("in"), "id");
        assert_eq!(normalize_locale("ji"), "yi");
    }

    #[test]
    fn test_prioritized_densities_nearest_above_then_nearest_below() {
        // 200 dpi sits between mdpi (160) and tvdpi (213)
        assert_eq!(
            prioritized_densities(200),
            vec![
                Density::Tvdpi,
                Density::Hdpi,
                Density::Xhdpi,
                Density::Xxhdpi,
                Density::Xxxhdpi,
                Density::Mdpi,
                Density::Ldpi,
            ]
        );
        assert_eq!(prioritized_densities(480)[0], Density::Xxhdpi);
    }

    #[test]
    fn test_density_resolution_prefers_nearest_above() {
        let profile = DeviceProfile::default().with_density(400);
        let pick = |available: &[&str]| {
            let mut entities = vec![entity("com.example", EntityKind::Base)];
            entities.extend(available.iter().map(|n| split("com.example", n)));
            let result = select(entities, DataType::SplitApkSet, &profile, None).unwrap();
            selected_names(&result)
        };

        // L1 = xhdpi (320) < D = 400 < L2 = xxhdpi (480) < L3 = xxxhdpi (640)
        let all = ["config.xhdpi", "config.xxhdpi", "config.xxxhdpi"];
        assert!(pick(&all).contains(&"split_config.xxhdpi.apk".to_string()));
        let upper = pick(&["config.xhdpi", "config.xxxhdpi"]);
        assert!(upper.contains(&"split_config.xxxhdpi.apk".to_string()));
        let lower = pick(&["config.xhdpi"]);
        assert!(lower.contains(&"split_config.xhdpi.apk".to_string()));
    }

    #[test]
    fn test_split_selection_picks_one_of_each() {
        let profile = DeviceProfile::default()
            .with_abis(vec![Architecture::Arm64V8a, Architecture::ArmeabiV7a])
            .with_density(440)
            .with_locales(vec!["de-DE", "en-US"]);
        let entities = vec![
            entity("com.example", EntityKind::Base),
            entity("com.example", EntityKind::DexMetadata),
            split("com.example", "config.armeabi_v7a"),
            split("com.example", "config.arm64_v8a"),
            split("com.example", "config.xhdpi"),
            split("com.example", "config.xxhdpi"),
            split("com.example", "config.en"),
            split("com.example", "config.de"),
            split("com.example", "feature_camera"),
        ];

        let result = select(
            entities,
            DataType::SplitApkArchive(ArchiveFlavor::Apks),
            &profile,
            None,
        )
        .unwrap();
        assert_eq!(
            selected_names(&result),
            vec![
                "base.apk".to_string(),
                "base.dm".to_string(),
                "split_config.arm64_v8a.apk".to_string(),
                "split_config.xxhdpi.apk".to_string(),
                "split_config.de.apk".to_string(),
                "split_feature_camera.apk".to_string(),
            ]
        );
    }

    #[test]
    fn test_locale_falls_back_to_english() {
        let available = vec!["en".to_string(), "fr".to_string()];
        assert_eq!(
            match_locale(&["ja-JP".to_string()], &available, None),
            Some(&"en".to_string())
        );
        assert_eq!(
            match_locale(&["fr-CA".to_string()], &available, None),
            Some(&"fr".to_string())
        );
        assert_eq!(
            match_locale(&["ja-JP".to_string()], &["fr".to_string()], None),
            None
        );
    }

    #[test]
    fn test_locale_prefers_declared_default() {
        let available = vec!["de".to_string(), "en".to_string(), "fr".to_string()];
        assert_eq!(
            match_locale(&["ja-JP".to_string()], &available, Some("de")),
            Some(&"de".to_string())
        );
        // A device match still wins over the declared default
        assert_eq!(
            match_locale(&["fr-FR".to_string()], &available, Some("de")),
            Some(&"fr".to_string())
        );
        // A declared default the archive does not ship falls through to en
        assert_eq!(
            match_locale(&["ja-JP".to_string()], &available, Some("it")),
            Some(&"en".to_string())
        );
    }

    #[test]
    fn test_split_selection_uses_declared_default() {
        let profile = DeviceProfile::default().with_locales(vec!["ja-JP".to_string()]);
        let entities = vec![
            entity("com.example", EntityKind::Base),
            split("com.example", "config.en"),
            split("com.example", "config.es"),
        ];
        let result = select(
            entities,
            DataType::SplitApkArchive(ArchiveFlavor::Xapk),
            &profile,
            Some("es"),
        )
        .unwrap();
        assert_eq!(
            selected_names(&result),
            vec!["base.apk".to_string(), "split_config.es.apk".to_string()]
        );
    }

    #[test]
    fn test_missing_abi_split_is_an_error() {
        let profile = DeviceProfile::default().with_abis(vec![Architecture::X86_64]);
        let entities = vec![
            entity("com.example", EntityKind::Base),
            split("com.example", "config.arm64_v8a"),
        ];
        let result = select(entities, DataType::SplitApkSet, &profile, None);
        assert!(matches!(result, Err(Error::SplitResolution { .. })));
    }

    #[test]
    fn test_multi_apk_prefers_abi_then_version() {
        let profile = DeviceProfile::default();
        let mut arm32 = entity("com.a", EntityKind::Base);
        arm32.abis = vec![Architecture::ArmeabiV7a];
        arm32.version_code = Some(10);
        let mut arm64 = entity("com.a", EntityKind::Base);
        arm64.abis = vec![Architecture::Arm64V8a];
        arm64.version_code = Some(9);
        let mut old_b = entity("com.b", EntityKind::Base);
        old_b.version_code = Some(1);
        let mut new_b = entity("com.b", EntityKind::Base);
        new_b.version_code = Some(2);

        let result = select(
            vec![arm32, arm64, old_b, new_b],
            DataType::MultiApkZip,
            &profile,
            None,
        )
        .unwrap();
        let flags: Vec<bool> = result.iter().map(|e| e.selected).collect();
        assert_eq!(flags, vec![false, true, false, true]);
    }

    #[test]
    fn test_mixed_module_starts_deselected() {
        let module = entity(
            "example_module",
            EntityKind::Module(ModuleInfo {
                id: "example_module".to_string(),
                ..Default::default()
            }),
        );
        let result = select(
            vec![module, entity("com.example", EntityKind::Base)],
            DataType::MixedModuleZip,
            &DeviceProfile::default(),
            None,
        )
        .unwrap();
        assert!(result.iter().all(|e| !e.selected));
    }
}
