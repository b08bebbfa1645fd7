// src/commands/uninstall.rs
//! Uninstall command

use super::progress::SessionProgress;
use super::{confirm, open_manager, parse_authorizer};
use anyhow::Result;
use sideloader::session::SessionOptions;
use std::path::PathBuf;

pub async fn cmd_uninstall(
    db_path: &str,
    cache_dir: PathBuf,
    package: &str,
    yes: bool,
    authorizer: Option<&str>,
    su: Option<&str>,
) -> Result<()> {
    let (manager, _store) = open_manager(db_path, su).await?;
    let mut options = SessionOptions::default().with_cache_dir(cache_dir);
    if let Some(kind) = authorizer {
        options = options.with_authorizer(parse_authorizer(kind)?);
    }

    let session = manager.create(options);
    let spinner = SessionProgress::new();
    let renderer = spinner.clone().spawn(session.progress_stream());

    let result = async {
        let info = session.resolve_uninstall(package).await?;
        let mut prompt = format!("Remove {}", info.display_name());
        if let Some(version) = &info.version_name {
            prompt.push_str(&format!(" {}", version));
        }
        if let Some(size) = info.data_size {
            prompt.push_str(&format!(" and {} KiB of app data", size / 1024));
        }
        prompt.push('?');

        if !yes && !spinner.suspend(|| confirm(&prompt))? {
            println!("Uninstall cancelled");
            return Ok(());
        }
        session.uninstall(package).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    manager.remove(&session.id());
    drop(session);
    let _ = renderer.await;
    result
}
