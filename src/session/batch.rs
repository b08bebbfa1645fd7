// src/session/batch.rs

//! Independent installs of several units
//!
//! Every member owns its own progress stream and result. Members run
//! concurrently over the shared authorizer and one member's failure is
//! recorded on that member only.

use super::install::{InstallContext, InstallUnit, install_unit};
use crate::progress::{ProgressEvent, ProgressStream};
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Sub-state of one batch member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberState {
    /// Analysed and waiting for its turn
    Pending,
    Installing,
    Completed,
    Failed(String),
}

impl MemberState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MemberState::Completed | MemberState::Failed(_))
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberState::Pending => write!(f, "pending"),
            MemberState::Installing => write!(f, "installing"),
            MemberState::Completed => write!(f, "completed"),
            MemberState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One unit of a batch with its own progress and outcome
#[derive(Debug, Clone)]
pub struct BatchMember {
    unit: InstallUnit,
    state: Arc<Mutex<MemberState>>,
    progress: ProgressStream,
}

impl BatchMember {
    pub fn new(unit: InstallUnit) -> Self {
        Self {
            unit,
            state: Arc::new(Mutex::new(MemberState::Pending)),
            progress: ProgressStream::new(),
        }
    }

    /// Member reporting to an existing stream
    pub(crate) fn with_progress(unit: InstallUnit, progress: ProgressStream) -> Self {
        Self {
            unit,
            state: Arc::new(Mutex::new(MemberState::Pending)),
            progress,
        }
    }

    pub fn name(&self) -> &str {
        &self.unit.name
    }

    pub fn unit(&self) -> &InstallUnit {
        &self.unit
    }

    pub fn state(&self) -> MemberState {
        self.state.lock().clone()
    }

    /// Subscribe to this member's events only
    pub fn progress(&self) -> &ProgressStream {
        &self.progress
    }

    fn set_state(&self, state: MemberState) {
        *self.state.lock() = state;
    }

    async fn run(&self, ctx: &InstallContext<'_>) -> bool {
        self.set_state(MemberState::Installing);
        match install_unit(&self.unit, ctx, &self.progress).await {
            Ok(()) => {
                info!("Batch member {} installed", self.unit.name);
                self.set_state(MemberState::Completed);
                self.progress.emit(ProgressEvent::InstallSuccess);
                true
            }
            Err(e) => {
                let reason = e.user_message();
                warn!("Batch member {} failed: {}", self.unit.name, reason);
                self.set_state(MemberState::Failed(reason.clone()));
                self.progress.emit(ProgressEvent::InstallFailed(reason));
                false
            }
        }
    }
}

/// Snapshot of a member's outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResult {
    pub name: String,
    pub state: MemberState,
}

/// Members for `units`, keeping the stream of any member already known by name
///
/// Subscriptions taken after analysis therefore survive selection edits and
/// the start of the install.
pub(crate) fn members_for(units: Vec<InstallUnit>, existing: &[BatchMember]) -> Vec<BatchMember> {
    units
        .into_iter()
        .map(|unit| match existing.iter().find(|m| m.name() == unit.name) {
            Some(member) => BatchMember::with_progress(unit, member.progress.clone()),
            None => BatchMember::new(unit),
        })
        .collect()
}

/// Run every member to a terminal state
///
/// The session stream gets one `Installing` event per finished member,
/// with `percent` the share of members done.
pub(crate) async fn run_batch(
    members: &[BatchMember],
    ctx: &InstallContext<'_>,
    session_progress: &ProgressStream,
) -> usize {
    let total = members.len().max(1);
    let done = Mutex::new(0usize);

    let outcomes = join_all(members.iter().map(|member| {
        let done = &done;
        async move {
            let ok = member.run(ctx).await;
            let finished = {
                let mut done = done.lock();
                *done += 1;
                *done
            };
            session_progress.emit(ProgressEvent::Installing {
                package: member.name().to_string(),
                percent: finished as f32 / total as f32,
            });
            ok
        }
    }))
    .await;

    outcomes.into_iter().filter(|ok| !ok).count()
}
