// src/progress.rs

//! Session progress as a live event stream
//!
//! Every session owns one [`ProgressStream`]. Stages publish
//! [`ProgressEvent`]s to it in the order they happen and any number of
//! subscribers receive them.
//!
//! The stream is live, not replayed: a subscriber only sees events sent
//! after it subscribed. Subscribe before calling the operation whose
//! progress you want.
//!
//! # Example
//!
//! ```ignore
//! use sideloader::progress::{LogProgress, ProgressStream};
//!
//! let stream = ProgressStream::new();
//! let _log = LogProgress::spawn("install", &stream);
//! let mut rx = stream.subscribe();
//!
//! session.install().await?;
//! while let Ok(event) = rx.try_recv() {
//!     println!("{}", event);
//! }
//! ```

use std::fmt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Events buffered per subscriber before it starts lagging
pub const DEFAULT_CAPACITY: usize = 256;

/// One stage transition of a session
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Download or copy of remote input, as a fraction in `0.0..=1.0`
    Preparing(f32),
    Resolving,
    ResolveFailed,
    ResolveSuccess,
    Analysing,
    AnalyseFailed,
    AnalyseSuccess,
    Installing { package: String, percent: f32 },
    /// A line printed by a module installer
    ModuleOutput(String),
    InstallSuccess,
    InstallFailed(String),
    Uninstalling,
    UninstallSuccess,
    UninstallFailed(String),
    /// The session was closed; nothing follows
    Finished,
}

impl ProgressEvent {
    /// Stage name, without payload
    pub fn stage(&self) -> &'static str {
        match self {
            ProgressEvent::Preparing(_) => "preparing",
            ProgressEvent::Resolving => "resolving",
            ProgressEvent::ResolveFailed => "resolve-failed",
            ProgressEvent::ResolveSuccess => "resolve-success",
            ProgressEvent::Analysing => "analysing",
            ProgressEvent::AnalyseFailed => "analyse-failed",
            ProgressEvent::AnalyseSuccess => "analyse-success",
            ProgressEvent::Installing { .. } => "installing",
            ProgressEvent::ModuleOutput(_) => "module-output",
            ProgressEvent::InstallSuccess => "install-success",
            ProgressEvent::InstallFailed(_) => "install-failed",
            ProgressEvent::Uninstalling => "uninstalling",
            ProgressEvent::UninstallSuccess => "uninstall-success",
            ProgressEvent::UninstallFailed(_) => "uninstall-failed",
            ProgressEvent::Finished => "finished",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProgressEvent::ResolveFailed
                | ProgressEvent::AnalyseFailed
                | ProgressEvent::InstallFailed(_)
                | ProgressEvent::UninstallFailed(_)
        )
    }

    /// Whether the operation that emitted this event is over
    pub fn is_terminal(&self) -> bool {
        self.is_failure()
            || matches!(
                self,
                ProgressEvent::InstallSuccess
                    | ProgressEvent::UninstallSuccess
                    | ProgressEvent::Finished
            )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Preparing(fraction) => {
                write!(f, "preparing {:.0}%", fraction * 100.0)
            }
            ProgressEvent::Installing { package, percent } => {
                write!(f, "installing {} {:.0}%", package, percent * 100.0)
            }
            ProgressEvent::ModuleOutput(line) => write!(f, "{}", line),
            ProgressEvent::InstallFailed(reason) => write!(f, "install failed: {}", reason),
            ProgressEvent::UninstallFailed(reason) => {
                write!(f, "uninstall failed: {}", reason)
            }
            other => write!(f, "{}", other.stage()),
        }
    }
}

/// Multi-subscriber hub for one session's events
#[derive(Debug, Clone)]
pub struct ProgressStream {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive events sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish `event`; with no subscribers it is dropped
    pub fn emit(&self, event: ProgressEvent) {
        debug!("Progress: {}", event);
        let _ = self.tx.send(event);
    }
}

/// Mirrors a stream to tracing
pub struct LogProgress;

impl LogProgress {
    /// Log every event of `stream` under `name` until the stream closes
    pub fn spawn(name: impl Into<String>, stream: &ProgressStream) -> JoinHandle<()> {
        let name = name.into();
        let mut rx = stream.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Self::log(&name, &event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("{}: skipped {} progress events", name, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn log(name: &str, event: &ProgressEvent) {
        match event {
            ProgressEvent::Preparing(_) | ProgressEvent::Installing { .. } => {
                debug!("{}: {}", name, event)
            }
            e if e.is_failure() => error!("{}: {}", name, e),
            e => info!("{}: {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let stream = ProgressStream::new();
        let mut a = stream.subscribe();
        let mut b = stream.subscribe();

        stream.emit(ProgressEvent::Resolving);
        stream.emit(ProgressEvent::ResolveSuccess);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), ProgressEvent::Resolving);
            assert_eq!(rx.recv().await.unwrap(), ProgressEvent::ResolveSuccess);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let stream = ProgressStream::new();
        stream.emit(ProgressEvent::Resolving);

        let mut late = stream.subscribe();
        stream.emit(ProgressEvent::ResolveSuccess);

        assert_eq!(late.recv().await.unwrap(), ProgressEvent::ResolveSuccess);
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let stream = ProgressStream::new();
        stream.emit(ProgressEvent::Finished);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_terminal_events() {
        assert!(ProgressEvent::InstallSuccess.is_terminal());
        assert!(ProgressEvent::InstallFailed("x".to_string()).is_terminal());
        assert!(!ProgressEvent::Analysing.is_terminal());
        assert!(
            !ProgressEvent::Installing {
                package: "a".to_string(),
                percent: 0.5
            }
            .is_terminal()
        );
    }

    #[tokio::test]
    async fn test_channel_ends_only_after_every_clone_drops() {
        let stream = ProgressStream::new();
        let member = stream.clone();
        let mut rx = stream.subscribe();

        drop(stream);
        member.emit(ProgressEvent::InstallSuccess);
        assert_eq!(rx.recv().await.unwrap(), ProgressEvent::InstallSuccess);

        drop(member);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_log_progress_stops_when_stream_drops() {
        let stream = ProgressStream::new();
        let handle = LogProgress::spawn("test", &stream);
        stream.emit(ProgressEvent::Analysing);
        drop(stream);
        handle.await.unwrap();
    }
}
