// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ConfigCommands};
use commands::InstallArgs;
use sideloader::db::paths;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let db_path = cli
        .db_path
        .unwrap_or_else(paths::default_db_path)
        .display()
        .to_string();
    let cache_dir = cli
        .cache_dir
        .unwrap_or_else(|| paths::cache_dir(&db_path));

    match cli.command {
        Commands::Init => commands::cmd_init(&db_path).await,
        Commands::Install {
            inputs,
            yes,
            background,
            authorizer,
            customize,
            caller,
            su,
        } => {
            let args = InstallArgs {
                inputs,
                yes,
                background,
                authorizer,
                customize,
                caller,
                su,
            };
            commands::cmd_install(&db_path, cache_dir, args).await
        }
        Commands::Uninstall {
            package,
            yes,
            authorizer,
            su,
        } => {
            commands::cmd_uninstall(
                &db_path,
                cache_dir,
                &package,
                yes,
                authorizer.as_deref(),
                su.as_deref(),
            )
            .await
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::List => commands::cmd_config_list(&db_path),
            ConfigCommands::Show { package } => {
                commands::cmd_config_show(&db_path, package.as_deref()).await
            }
            ConfigCommands::Add {
                name,
                description,
                authorizer,
                customize,
                install_mode,
                installer,
                auto_delete,
                all_users,
                allow_downgrade,
                allow_test_only,
                dexopt,
                force_dexopt,
            } => commands::cmd_config_add(
                &db_path,
                &name,
                description.as_deref(),
                &authorizer,
                customize.as_deref(),
                &install_mode,
                installer.as_deref(),
                (auto_delete, all_users, allow_downgrade, allow_test_only),
                dexopt.as_deref().map(|mode| (mode, force_dexopt)),
            ),
            ConfigCommands::Remove { id } => commands::cmd_config_remove(&db_path, id),
            ConfigCommands::Bind { id, package } => {
                commands::cmd_config_bind(&db_path, id, package.as_deref())
            }
            ConfigCommands::Unbind { package } => {
                commands::cmd_config_unbind(&db_path, package.as_deref())
            }
            ConfigCommands::Set { key, value } => commands::cmd_config_set(&db_path, &key, &value),
            ConfigCommands::Unset { key } => commands::cmd_config_unset(&db_path, &key),
        },
    }
}
