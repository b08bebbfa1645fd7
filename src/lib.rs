// src/lib.rs

//! Sideloader
//!
//! Installs Android packages (single APKs, split sets, bundle archives and
//! root modules) through a privileged backend chosen per package.
//!
//! # Architecture
//!
//! - Recycling pools: expensive backend channels are shared and torn down
//!   after a grace period once the last user lets go
//! - Authorizers: one interface over root shells, brokered services and the
//!   unprivileged platform flow
//! - Sessions: an explicit state machine from raw input to installed
//!   package, observable through a progress stream
//! - Analysis: container classification plus device-aware split selection
//! - Configs: per-package profiles stored in SQLite, with global defaults

pub mod analyser;
pub mod authorizer;
pub mod config;
pub mod db;
pub mod device;
mod error;
pub mod progress;
pub mod recycle;
pub mod session;

#[cfg(test)]
mod test_fixtures;

pub use analyser::{AnalysisResult, DataEntity, DataType, InstallEntity, SelectableEntity};
pub use authorizer::{Authorizer, AuthorizerKind, ChannelPools, PoolOptions};
pub use config::{ConfigEntity, ConfigResolver, InstallMode};
pub use device::{Device, DeviceProfile};
pub use error::{Error, Result};
pub use progress::{LogProgress, ProgressEvent, ProgressStream};
pub use recycle::{Recyclable, RecycleFactory, Recycler, RecyclerManager};
pub use session::{
    InputLocator, InstallSession, SessionDeps, SessionManager, SessionMode, SessionOptions,
    SessionState,
};
