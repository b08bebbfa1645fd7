// src/commands/install.rs
//! Install command

use super::progress::SessionProgress;
use super::{confirm, open_manager, parse_authorizer};
use anyhow::Result;
use sideloader::config::CallerHint;
use sideloader::progress::LogProgress;
use sideloader::session::{InputLocator, InstallSession, MemberState, SessionMode, SessionOptions};
use sideloader::Error;
use std::path::PathBuf;
use tracing::info;

/// Options of `sideloader install`
#[derive(Debug, Default)]
pub struct InstallArgs {
    pub inputs: Vec<String>,
    pub yes: bool,
    pub background: bool,
    pub authorizer: Option<String>,
    pub customize: Option<String>,
    pub caller: Option<String>,
    pub su: Option<String>,
}

pub async fn cmd_install(db_path: &str, cache_dir: PathBuf, args: InstallArgs) -> Result<()> {
    let (manager, _store) = open_manager(db_path, args.su.as_deref()).await?;

    let mut options = SessionOptions::default().with_cache_dir(cache_dir);
    if let Some(kind) = &args.authorizer {
        options = options.with_authorizer(parse_authorizer(kind)?);
    }
    if let Some(command) = &args.customize {
        options = options.with_customize_authorizer(command.clone());
    }
    if let Some(caller) = &args.caller {
        options = options.with_caller(CallerHint::Package(caller.clone()));
    }

    let session = manager.create(options);
    if args.background {
        session.background(true);
    }
    let (spinner, renderer) = if session.is_background() {
        let renderer =
            LogProgress::spawn(format!("Session[{}]", session.id()), session.progress_stream());
        (SessionProgress::hidden(), renderer)
    } else {
        let spinner = SessionProgress::new();
        let renderer = spinner.clone().spawn(session.progress_stream());
        (spinner, renderer)
    };

    let result = run(&session, &spinner, &args).await;

    manager.remove(&session.id());
    drop(session);
    let _ = renderer.await;
    result
}

async fn run(session: &InstallSession, spinner: &SessionProgress, args: &InstallArgs) -> Result<()> {
    let inputs: Vec<InputLocator> = args.inputs.iter().map(|s| InputLocator::parse(s)).collect();
    session.resolve_install(&inputs).await?;
    session.analyse().await?;

    if let Some(analysis) = session.analysis() {
        info!(
            "Detected {} with {} entities",
            analysis.data_type,
            analysis.entities.len()
        );
        for item in &analysis.entities {
            let mark = if item.selected { "+" } else { " " };
            spinner.suspend(|| {
                println!(
                    "  {} {} {}",
                    mark,
                    item.entity.package_name,
                    item.entity.install_name()
                )
            });
        }
    }

    match session.install().await {
        Err(Error::SignatureMismatch { package }) => {
            let accepted = args.yes
                || spinner.suspend(|| {
                    confirm(&format!(
                        "{} is signed with a different key than the installed app. Install anyway?",
                        package
                    ))
                })?;
            if !accepted {
                println!("Install cancelled");
                return Ok(());
            }
            session.confirm_signature_mismatch();
            session.install().await?;
        }
        other => other?,
    }

    if session.mode() == Some(SessionMode::Batch) {
        for member in session.member_results() {
            match member.state {
                MemberState::Completed => println!("  [ok] {}", member.name),
                MemberState::Failed(reason) => println!("  [FAILED] {}: {}", member.name, reason),
                state => println!("  [{}] {}", state, member.name),
            }
        }
        if session.has_failures() {
            println!("Some packages failed to install");
        }
    }
    Ok(())
}
