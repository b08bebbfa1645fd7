// src/session/install.rs

//! Committing one installable unit
//!
//! A unit is everything selected for one package (base, splits, dex
//! metadata) or one module archive. APK units go through a single
//! platform install session, so the platform accepts the whole set or
//! none of it. Modules are flashed by the root solution's own installer.

use crate::analyser::{EntityKind, InstallEntity, SelectableEntity, materialize};
use crate::authorizer::{Authorizer, denied, pm};
use crate::config::{ConfigEntity, RootImplementation};
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressStream};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Selected entities that install together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallUnit {
    /// Package name, or module id
    pub name: String,
    pub entities: Vec<InstallEntity>,
}

impl InstallUnit {
    pub fn is_module(&self) -> bool {
        self.entities.iter().any(InstallEntity::is_module)
    }

    pub fn total_size(&self) -> u64 {
        self.entities.iter().map(|e| e.size).sum()
    }

    /// Inputs this unit was read from
    pub fn containers(&self) -> BTreeSet<&Path> {
        self.entities.iter().map(|e| e.container.as_path()).collect()
    }
}

/// Group the selection into units, in first-seen order
///
/// A package only forms a unit when its base (or module) is selected;
/// stray splits of an unselected package are left out.
pub fn plan_units(entities: &[SelectableEntity]) -> Result<Vec<InstallUnit>> {
    let mut units: Vec<InstallUnit> = Vec::new();
    for item in entities.iter().filter(|e| e.selected && e.entity.is_root()) {
        let name = &item.entity.package_name;
        if units.iter().any(|u| &u.name == name) {
            return Err(Error::InvalidState(format!(
                "more than one base selected for {}",
                name
            )));
        }
        units.push(InstallUnit {
            name: name.clone(),
            entities: vec![item.entity.clone()],
        });
    }

    for item in entities.iter().filter(|e| e.selected && !e.entity.is_root()) {
        match units
            .iter_mut()
            .find(|u| u.name == item.entity.package_name && !u.is_module())
        {
            Some(unit) => unit.entities.push(item.entity.clone()),
            None => debug!(
                "Skipping {} of unselected package {}",
                item.entity.install_name(),
                item.entity.package_name
            ),
        }
    }
    Ok(units)
}

/// What a unit install needs from its session
pub(crate) struct InstallContext<'a> {
    pub authorizer: &'a Authorizer,
    pub config: &'a ConfigEntity,
    pub root: RootImplementation,
    pub work_dir: &'a Path,
    pub cancel: &'a CancellationToken,
}

/// Install one unit, reporting to `progress`
pub(crate) async fn install_unit(
    unit: &InstallUnit,
    ctx: &InstallContext<'_>,
    progress: &ProgressStream,
) -> Result<()> {
    progress.emit(ProgressEvent::Installing {
        package: unit.name.clone(),
        percent: 0.0,
    });
    if unit.is_module() {
        install_module(unit, ctx, progress).await
    } else {
        install_apks(unit, ctx, progress).await
    }
}

/// Extract the unit's entities into `dir`, naming each for the session
fn stage(unit: &InstallUnit, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    unit.entities
        .iter()
        .map(|e| Ok((e.install_name(), materialize(&e.source, dir)?)))
        .collect()
}

async fn staged(unit: &InstallUnit, ctx: &InstallContext<'_>) -> Result<Vec<(String, PathBuf)>> {
    let owned = unit.clone();
    let dir = ctx.work_dir.join(&unit.name);
    tokio::task::spawn_blocking(move || stage(&owned, &dir))
        .await
        .map_err(|e| Error::InvalidState(format!("staging task failed: {}", e)))?
}

async fn install_apks(
    unit: &InstallUnit,
    ctx: &InstallContext<'_>,
    progress: &ProgressStream,
) -> Result<()> {
    let apks = staged(unit, ctx).await?;
    progress.emit(ProgressEvent::Installing {
        package: unit.name.clone(),
        percent: 0.5,
    });

    // Last point at which closing the session stops the install
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let params = ctx
        .config
        .install_params(Some(&unit.name), Some(unit.total_size()));
    info!(
        "Committing {} ({} file(s)) via {}",
        unit.name,
        apks.len(),
        ctx.authorizer.kind()
    );
    ctx.authorizer.install_apks(&params, &apks).await?;
    progress.emit(ProgressEvent::Installing {
        package: unit.name.clone(),
        percent: 1.0,
    });
    dexopt(&unit.name, ctx).await;
    Ok(())
}

/// Compile a freshly installed package when the profile asks for it
///
/// Failures are logged only; the package is already installed.
async fn dexopt(package_name: &str, ctx: &InstallContext<'_>) {
    if !ctx.config.enable_dexopt {
        return;
    }
    let kind = ctx.authorizer.kind();
    if !kind.can_exec() {
        debug!("Skipping dexopt of {}: {} cannot run commands", package_name, kind);
        return;
    }

    let argv = pm::compile(package_name, ctx.config.dexopt_mode, ctx.config.force_dexopt);
    info!("Compiling {} ({})", package_name, ctx.config.dexopt_mode);
    match ctx.authorizer.exec(&argv).await {
        Ok(output) if output.success() => {
            debug!("Dexopt of {} done: {}", package_name, output.output.trim())
        }
        Ok(output) => warn!(
            "Dexopt of {} exited with {}: {}",
            package_name,
            output.exit_code,
            output.output.trim()
        ),
        Err(e) => warn!("Dexopt of {} failed: {}", package_name, e),
    }
}

async fn install_module(
    unit: &InstallUnit,
    ctx: &InstallContext<'_>,
    progress: &ProgressStream,
) -> Result<()> {
    if !ctx.authorizer.kind().can_exec() {
        return Err(denied(ctx.authorizer.kind(), "install modules"));
    }
    let module = unit
        .entities
        .iter()
        .find(|e| matches!(e.kind, EntityKind::Module(_)))
        .ok_or_else(|| Error::InvalidState(format!("{} has no module entity", unit.name)))?;

    let dir = ctx.work_dir.join(&unit.name);
    let source = module.source.clone();
    let path = tokio::task::spawn_blocking(move || materialize(&source, &dir))
        .await
        .map_err(|e| Error::InvalidState(format!("staging task failed: {}", e)))??;

    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let argv = ctx.root.module_install_command(&path.to_string_lossy());
    info!("Flashing module {} with {}", unit.name, ctx.root);
    let output = ctx.authorizer.exec(&argv).await?;
    for line in output.lines() {
        progress.emit(ProgressEvent::ModuleOutput(line.to_string()));
    }
    if !output.success() {
        return Err(Error::ChannelFailure {
            channel: ctx.authorizer.kind().to_string(),
            reason: format!("{} exited with {}", argv.join(" "), output.exit_code),
        });
    }
    Ok(())
}

/// Remove local inputs of an installed unit
pub(crate) fn delete_sources(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => info!("Deleted installed source {}", path.display()),
            Err(e) => warn!("Could not delete {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::{EntitySource, ModuleInfo, SplitCategory};

    fn entity(package: &str, kind: EntityKind) -> InstallEntity {
        InstallEntity {
            package_name: package.to_string(),
            version_code: Some(1),
            version_name: None,
            label: None,
            kind,
            source: EntitySource::File(PathBuf::from(format!("/in/{}.apk", package))),
            abis: Vec::new(),
            container: PathBuf::from(format!("/in/{}.apk", package)),
            size: 10,
        }
    }

    fn split(package: &str, name: &str) -> InstallEntity {
        entity(
            package,
            EntityKind::Split {
                name: name.to_string(),
                category: SplitCategory::Feature,
                config_for: None,
            },
        )
    }

    #[test]
    fn test_plan_groups_splits_under_base() {
        let entities = vec![
            SelectableEntity::new(split("com.a", "feature"), true),
            SelectableEntity::new(entity("com.a", EntityKind::Base), true),
            SelectableEntity::new(entity("com.b", EntityKind::Base), true),
            SelectableEntity::new(split("com.b", "extra"), false),
        ];
        let units = plan_units(&entities).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "com.a");
        assert_eq!(units[0].entities.len(), 2);
        assert_eq!(units[0].total_size(), 20);
        assert_eq!(units[1].entities.len(), 1);
    }

    #[test]
    fn test_plan_skips_splits_of_unselected_base() {
        let entities = vec![
            SelectableEntity::new(entity("com.a", EntityKind::Base), false),
            SelectableEntity::new(split("com.a", "feature"), true),
        ];
        assert!(plan_units(&entities).unwrap().is_empty());
    }

    #[test]
    fn test_plan_rejects_two_bases_of_one_package() {
        let entities = vec![
            SelectableEntity::new(entity("com.a", EntityKind::Base), true),
            SelectableEntity::new(entity("com.a", EntityKind::Base), true),
        ];
        assert!(matches!(
            plan_units(&entities),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_module_unit() {
        let module = entity(
            "zygisk-demo",
            EntityKind::Module(ModuleInfo {
                id: "zygisk-demo".to_string(),
                ..Default::default()
            }),
        );
        let units = plan_units(&[SelectableEntity::new(module, true)]).unwrap();
        assert!(units[0].is_module());
    }
}
