// src/commands/config.rs

//! Install profile CLI commands
//!
//! Profiles, package bindings and the global preferences they fall back to.

use super::{open_manager, parse_authorizer};
use anyhow::{Result, anyhow};
use sideloader::config::{
    AppBinding, AppRepo, ConfigEntity, ConfigRepo, DexoptMode, InstallMode, PreferenceKey,
    Preferences, RootImplementation,
};
use sideloader::db::SqliteStore;
use sideloader::device::DeviceCapabilities;
use tracing::info;

fn print_config(config: &ConfigEntity) {
    match config.id {
        Some(id) => println!("[{}] {}", id, config.name),
        None => println!("{} (built-in)", config.name),
    }
    if !config.description.is_empty() {
        println!("  {}", config.description);
    }
    println!("  authorizer:   {}", config.authorizer);
    if let Some(command) = config.customize_command() {
        println!("  command:      {}", command);
    }
    println!("  install mode: {}", config.install_mode.as_str());
    if let Some(installer) = &config.installer {
        println!("  installer:    {}", installer);
    }
    let flags: Vec<&str> = [
        (config.auto_delete, "auto-delete"),
        (config.all_users, "all-users"),
        (config.allow_downgrade, "allow-downgrade"),
        (config.allow_test_only, "allow-test-only"),
    ]
    .iter()
    .filter(|(on, _)| *on)
    .map(|(_, name)| *name)
    .collect();
    if !flags.is_empty() {
        println!("  flags:        {}", flags.join(", "));
    }
    if config.enable_dexopt {
        println!(
            "  dexopt:       {}{}",
            config.dexopt_mode,
            if config.force_dexopt { " (forced)" } else { "" }
        );
    }
}

/// List stored profiles, bindings and preferences
pub fn cmd_config_list(db_path: &str) -> Result<()> {
    let store = SqliteStore::open(db_path)?;

    let configs = ConfigRepo::all(&store)?;
    if configs.is_empty() {
        println!("No profiles stored.");
    }
    for config in &configs {
        print_config(config);
    }

    let bindings = AppRepo::all(&store)?;
    if !bindings.is_empty() {
        println!("\nBindings ({}):", bindings.len());
        for binding in &bindings {
            println!(
                "  {} -> {}",
                binding.package_name.as_deref().unwrap_or("<default>"),
                binding.config_id
            );
        }
    }

    let prefs = store.preferences()?;
    if !prefs.is_empty() {
        println!("\nPreferences:");
        for pref in &prefs {
            println!("  {} = {}", pref.key, pref.value);
        }
    }
    Ok(())
}

/// Show the profile an install for `package` would use
pub async fn cmd_config_show(db_path: &str, package: Option<&str>) -> Result<()> {
    let (manager, _store) = open_manager(db_path, None).await?;
    let deps = manager.deps();
    let config = deps.resolver.resolve(package)?;

    println!("Effective profile for {}:", package.unwrap_or("<default>"));
    print_config(&config);
    println!(
        "  uninstall:    flags {:#x}",
        deps.resolver.uninstall_flags()?.bits()
    );
    println!("  modules via:  {}", deps.resolver.root_implementation()?);

    let caps = DeviceCapabilities::new(deps.device.clone());
    println!(
        "  session installs: {}",
        if caps.session_install_supported().await {
            "supported"
        } else {
            "unsupported"
        }
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_config_add(
    db_path: &str,
    name: &str,
    description: Option<&str>,
    authorizer: &str,
    customize: Option<&str>,
    install_mode: &str,
    installer: Option<&str>,
    flags: (bool, bool, bool, bool),
    dexopt: Option<(&str, bool)>,
) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    let (auto_delete, all_users, allow_downgrade, allow_test_only) = flags;

    let mode = InstallMode::parse(install_mode)
        .ok_or_else(|| anyhow!("Unknown install mode '{}'", install_mode))?;
    let mut config = ConfigEntity::new(name)
        .with_authorizer(parse_authorizer(authorizer)?)
        .with_install_mode(mode)
        .with_auto_delete(auto_delete);
    if let Some(text) = description {
        config.description = text.to_string();
    }
    if let Some(command) = customize {
        config = config.with_customize_authorizer(command);
    }
    if let Some(installer) = installer {
        config = config.with_installer(installer);
    }
    config.all_users = all_users;
    config.allow_downgrade = allow_downgrade;
    config.allow_test_only = allow_test_only;
    if let Some((mode, force)) = dexopt {
        let mode = DexoptMode::parse(mode)
            .ok_or_else(|| anyhow!("Unknown dexopt mode '{}'", mode))?;
        config = config.with_dexopt(mode, force);
    }

    let id = store.insert_config(&mut config)?;
    info!("Added profile {} ({})", id, name);
    println!("Added profile {}: {}", id, name);
    Ok(())
}

pub fn cmd_config_remove(db_path: &str, id: i64) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    if ConfigRepo::find(&store, id)?.is_none() {
        return Err(anyhow!("Profile {} does not exist", id));
    }
    store.delete_config(id)?;
    println!("Removed profile {}", id);
    Ok(())
}

pub fn cmd_config_bind(db_path: &str, id: i64, package: Option<&str>) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    if ConfigRepo::find(&store, id)?.is_none() {
        return Err(anyhow!("Profile {} does not exist", id));
    }
    let mut binding = AppBinding::new(package.map(str::to_string), id);
    store.insert_binding(&mut binding)?;
    println!("Bound {} to profile {}", package.unwrap_or("<default>"), id);
    Ok(())
}

pub fn cmd_config_unbind(db_path: &str, package: Option<&str>) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    store.remove_binding(package)?;
    println!("Unbound {}", package.unwrap_or("<default>"));
    Ok(())
}

fn parse_key(key: &str) -> Result<PreferenceKey> {
    PreferenceKey::parse(key).ok_or_else(|| anyhow!("Unknown preference '{}'", key))
}

/// Reject values the resolver would silently ignore
fn validate(key: PreferenceKey, value: &str) -> Result<()> {
    let valid = match key {
        PreferenceKey::Authorizer => parse_authorizer(value).is_ok(),
        PreferenceKey::CustomizeAuthorizer => true,
        PreferenceKey::InstallMode => InstallMode::parse(value).is_some(),
        PreferenceKey::UninstallFlags => value.trim().parse::<u32>().is_ok(),
        PreferenceKey::RootImplementation => RootImplementation::parse(value).is_some(),
    };
    if !valid {
        return Err(anyhow!("Invalid value '{}' for {}", value, key.as_str()));
    }
    Ok(())
}

pub fn cmd_config_set(db_path: &str, key: &str, value: &str) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    let key = parse_key(key)?;
    validate(key, value)?;
    store.set(key, value)?;
    println!("{} = {}", key.as_str(), value);
    Ok(())
}

pub fn cmd_config_unset(db_path: &str, key: &str) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    store.unset_preference(parse_key(key)?)?;
    println!("Cleared {}", key);
    Ok(())
}
