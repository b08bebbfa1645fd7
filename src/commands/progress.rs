// src/commands/progress.rs
//! Terminal rendering of session progress
//!
//! A spinner line follows the session's stage; module installer output
//! and batch results are printed above it.

use indicatif::{ProgressBar, ProgressStyle};
use sideloader::{ProgressEvent, ProgressStream};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Spinner bound to one session
#[derive(Clone)]
pub struct SessionProgress {
    bar: ProgressBar,
}

impl SessionProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// A spinner that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Render every event of `stream` until the session finishes
    pub fn spawn(self, stream: &ProgressStream) -> JoinHandle<()> {
        let mut rx = stream.subscribe();
        let progress = self;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ProgressEvent::Finished) | Err(broadcast::error::RecvError::Closed) => {
                        progress.bar.finish_and_clear();
                        break;
                    }
                    Ok(event) => progress.handle(&event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        })
    }

    pub fn handle(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Preparing(fraction) => self
                .bar
                .set_message(format!("Downloading... {:.0}%", fraction * 100.0)),
            ProgressEvent::Resolving => self.bar.set_message("Resolving inputs..."),
            ProgressEvent::Analysing => self.bar.set_message("Analysing..."),
            ProgressEvent::ResolveSuccess | ProgressEvent::AnalyseSuccess => {}
            ProgressEvent::Installing { package, percent } => self
                .bar
                .set_message(format!("Installing {} ({:.0}%)", package, percent * 100.0)),
            ProgressEvent::ModuleOutput(line) => self.bar.println(format!("  {}", line)),
            ProgressEvent::Uninstalling => self.bar.set_message("Uninstalling..."),
            ProgressEvent::InstallSuccess => self.bar.println("Installed"),
            ProgressEvent::UninstallSuccess => self.bar.println("Uninstalled"),
            failure if failure.is_failure() => self.bar.println(format!("[FAILED] {}", failure)),
            _ => {}
        }
    }

    /// Pause the spinner while the user answers a prompt
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bar.suspend(f)
    }
}

impl Default for SessionProgress {
    fn default() -> Self {
        Self::new()
    }
}
