// src/cli/config.rs
//! Install profile management commands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// List stored profiles and bindings
    List,

    /// Show the effective profile for a package
    Show {
        /// Package name (optional - if omitted, shows the default)
        package: Option<String>,
    },

    /// Add a profile
    Add {
        /// Profile name
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// none, root, shizuku, dhizuku, customize or global
        #[arg(long, default_value = "global")]
        authorizer: String,

        /// Shell command for the customize backend
        #[arg(long)]
        customize: Option<String>,

        /// dialog, auto_dialog, notification, auto_notification, ignore or global
        #[arg(long, default_value = "global")]
        install_mode: String,

        /// Installer package name recorded on installed apps
        #[arg(long)]
        installer: Option<String>,

        /// Delete local sources after a successful install
        #[arg(long)]
        auto_delete: bool,

        /// Install for every user
        #[arg(long)]
        all_users: bool,

        #[arg(long)]
        allow_downgrade: bool,

        #[arg(long)]
        allow_test_only: bool,

        /// Compile after install: verify, speed-profile, speed or everything
        #[arg(long)]
        dexopt: Option<String>,

        /// Recompile even when the compiled code is current
        #[arg(long, requires = "dexopt")]
        force_dexopt: bool,
    },

    /// Delete a profile and its bindings
    Remove {
        /// Profile id
        id: i64,
    },

    /// Bind a package to a profile
    Bind {
        /// Profile id
        id: i64,

        /// Package name (optional - if omitted, binds the default)
        package: Option<String>,
    },

    /// Remove a package binding
    Unbind {
        /// Package name (optional - if omitted, unbinds the default)
        package: Option<String>,
    },

    /// Set a global preference
    Set {
        /// authorizer, customize_authorizer, install_mode, uninstall_flags or root_implementation
        key: String,
        value: String,
    },

    /// Clear a global preference
    Unset {
        key: String,
    },
}
