// src/commands/mod.rs
//! Command handlers for the sideloader CLI

mod config;
mod install;
pub mod progress;
mod uninstall;

pub use config::{
    cmd_config_add, cmd_config_bind, cmd_config_list, cmd_config_remove, cmd_config_set,
    cmd_config_show, cmd_config_unbind, cmd_config_unset,
};
pub use install::{InstallArgs, cmd_install};
pub use uninstall::cmd_uninstall;

use anyhow::{Context, Result};
use sideloader::authorizer::{AuthorizerKind, ChannelPools, PoolOptions};
use sideloader::config::{ConfigResolver, ResolverContext};
use sideloader::db::SqliteStore;
use sideloader::device::{Device, HostDevice};
use sideloader::session::{SessionDeps, SessionManager};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info};

/// Create the database and seed the profile for this device
pub async fn cmd_init(db_path: &str) -> Result<()> {
    info!("Initializing database at: {}", db_path);
    let store = SqliteStore::open(db_path)?;
    let device = HostDevice::probe().await?;
    match store.seed_default(device.profile().manufacturer)? {
        Some(id) => println!("Seeded default profile {}", id),
        None => debug!("No default profile needed"),
    }
    println!("Database initialized at: {}", db_path);
    Ok(())
}

/// Open the store and wire up a session manager for the host device
pub(crate) async fn open_manager(
    db_path: &str,
    su: Option<&str>,
) -> Result<(SessionManager, Arc<SqliteStore>)> {
    let store = Arc::new(
        SqliteStore::open(db_path).with_context(|| format!("opening {}", db_path))?,
    );
    let device = HostDevice::probe().await?;
    let context = ResolverContext {
        manufacturer: device.profile().manufacturer,
        system_installer: device.is_system_installer(),
    };
    store.seed_default(context.manufacturer)?;

    let device: Arc<dyn Device> = Arc::new(device);
    let resolver = ConfigResolver::new(store.clone(), store.clone(), store.clone(), context);
    let options = PoolOptions::default().with_su_command(su_command(su));
    let pools = ChannelPools::new(Arc::clone(&device), options);

    let deps = SessionDeps::new(Arc::new(resolver), Arc::new(pools), device);
    Ok((SessionManager::new(deps), store))
}

/// `su` as given, else the first one on `PATH`
fn su_command(explicit: Option<&str>) -> String {
    if let Some(command) = explicit {
        return command.to_string();
    }
    match which::which("su") {
        Ok(path) => path.display().to_string(),
        Err(_) => {
            debug!("No su binary on PATH");
            "su".to_string()
        }
    }
}

pub(crate) fn parse_authorizer(value: &str) -> Result<AuthorizerKind> {
    AuthorizerKind::parse(value).ok_or_else(|| anyhow::anyhow!("Unknown authorizer '{}'", value))
}

/// Ask a yes/no question on the terminal
pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
