// src/authorizer/pm.rs

//! Command lines for the platform package manager and parsing of its replies

use super::{InstallParams, UninstallFlags};
use crate::config::DexoptMode;
use crate::error::{Error, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn failure_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Failure \[([A-Z0-9_]+)(?::\s*([^\]]*))?\]").ok())
        .as_ref()
}

fn session_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").ok()).as_ref()
}

pub(crate) fn install_create(params: &InstallParams) -> Vec<String> {
    let mut argv = vec!["pm".to_string(), "install-create".to_string(), "-r".to_string()];
    if params.allow_test_only {
        argv.push("-t".to_string());
    }
    if params.allow_downgrade {
        argv.push("-d".to_string());
    }
    if let Some(installer) = &params.installer {
        argv.push("-i".to_string());
        argv.push(installer.clone());
    }
    argv.push("--user".to_string());
    argv.push(if params.all_users { "all" } else { "current" }.to_string());
    if params.install_reason != 0 {
        argv.push("--install-reason".to_string());
        argv.push(params.install_reason.to_string());
    }
    if let Some(size) = params.total_size {
        argv.push("-S".to_string());
        argv.push(size.to_string());
    }
    argv
}

pub(crate) fn install_write(session_id: i32, name: &str, path: &Path) -> Vec<String> {
    vec![
        "pm".to_string(),
        "install-write".to_string(),
        session_id.to_string(),
        name.to_string(),
        path.display().to_string(),
    ]
}

pub(crate) fn install_commit(session_id: i32) -> Vec<String> {
    vec![
        "pm".to_string(),
        "install-commit".to_string(),
        session_id.to_string(),
    ]
}

pub(crate) fn install_abandon(session_id: i32) -> Vec<String> {
    vec![
        "pm".to_string(),
        "install-abandon".to_string(),
        session_id.to_string(),
    ]
}

pub(crate) fn uninstall(package_name: &str, flags: UninstallFlags) -> Vec<String> {
    let mut argv = vec!["pm".to_string(), "uninstall".to_string()];
    if flags.keep_data() {
        argv.push("-k".to_string());
    }
    if !flags.all_users() {
        argv.push("--user".to_string());
        argv.push("current".to_string());
    }
    argv.push(package_name.to_string());
    argv
}

/// `cmd package compile` for post-install dexopt
pub(crate) fn compile(package_name: &str, mode: DexoptMode, force: bool) -> Vec<String> {
    let mut argv = vec![
        "cmd".to_string(),
        "package".to_string(),
        "compile".to_string(),
        "-m".to_string(),
        mode.as_str().to_string(),
    ];
    if force {
        argv.push("-f".to_string());
    }
    argv.push(package_name.to_string());
    argv
}

/// Extract the id from `Success: created install session [1234]`
pub(crate) fn parse_session_id(output: &str) -> Result<i32> {
    if let Some(err) = parse_failure(output) {
        return Err(err);
    }
    session_pattern()
        .and_then(|re| re.captures(output))
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| Error::ChannelFailure {
            channel: "pm".to_string(),
            reason: format!("unexpected install-create output: {}", output.trim()),
        })
}

/// Turn the reply of a mutating `pm` call into a result
pub(crate) fn check_success(output: &str) -> Result<()> {
    if let Some(err) = parse_failure(output) {
        return Err(err);
    }
    if output.lines().any(|l| l.trim_start().starts_with("Success")) {
        return Ok(());
    }
    Err(Error::CommitRejected {
        code: failure_code("INSTALL_FAILED_INTERNAL_ERROR"),
        reason: output.trim().to_string(),
    })
}

/// Parse `Failure [INSTALL_FAILED_X: message]` into a rejection
pub fn parse_failure(output: &str) -> Option<Error> {
    let caps = failure_pattern()?.captures(output)?;
    let name = caps[1].to_string();
    let reason = match caps.get(2).map(|m| m.as_str().trim()) {
        Some(msg) if !msg.is_empty() => format!("{}: {}", name, msg),
        _ => name.clone(),
    };
    Some(Error::CommitRejected {
        code: failure_code(&name),
        reason,
    })
}

/// Numeric platform code for a failure constant
pub fn failure_code(name: &str) -> i32 {
    match name {
        "INSTALL_FAILED_ALREADY_EXISTS" => -1,
        "INSTALL_FAILED_INVALID_APK" => -2,
        "INSTALL_FAILED_INVALID_URI" => -3,
        "INSTALL_FAILED_INSUFFICIENT_STORAGE" => -4,
        "INSTALL_FAILED_DUPLICATE_PACKAGE" => -5,
        "INSTALL_FAILED_NO_SHARED_USER" => -6,
        "INSTALL_FAILED_UPDATE_INCOMPATIBLE" => -7,
        "INSTALL_FAILED_SHARED_USER_INCOMPATIBLE" => -8,
        "INSTALL_FAILED_MISSING_SHARED_LIBRARY" => -9,
        "INSTALL_FAILED_REPLACE_COULDNT_DELETE" => -10,
        "INSTALL_FAILED_DEXOPT" => -11,
        "INSTALL_FAILED_OLDER_SDK" => -12,
        "INSTALL_FAILED_CONFLICTING_PROVIDER" => -13,
        "INSTALL_FAILED_NEWER_SDK" => -14,
        "INSTALL_FAILED_TEST_ONLY" => -15,
        "INSTALL_FAILED_CPU_ABI_INCOMPATIBLE" => -16,
        "INSTALL_FAILED_MISSING_FEATURE" => -17,
        "INSTALL_FAILED_CONTAINER_ERROR" => -18,
        "INSTALL_FAILED_INVALID_INSTALL_LOCATION" => -19,
        "INSTALL_FAILED_MEDIA_UNAVAILABLE" => -20,
        "INSTALL_FAILED_VERIFICATION_TIMEOUT" => -21,
        "INSTALL_FAILED_VERIFICATION_FAILURE" => -22,
        "INSTALL_FAILED_PACKAGE_CHANGED" => -23,
        "INSTALL_FAILED_UID_CHANGED" => -24,
        "INSTALL_FAILED_VERSION_DOWNGRADE" => -25,
        "INSTALL_FAILED_DEPRECATED_SDK_VERSION" => -29,
        "INSTALL_PARSE_FAILED_NOT_APK" => -100,
        "INSTALL_PARSE_FAILED_BAD_MANIFEST" => -101,
        "INSTALL_PARSE_FAILED_NO_CERTIFICATES" => -103,
        "INSTALL_PARSE_FAILED_INCONSISTENT_CERTIFICATES" => -104,
        "INSTALL_FAILED_INTERNAL_ERROR" => -110,
        "INSTALL_FAILED_USER_RESTRICTED" => -111,
        "INSTALL_FAILED_DUPLICATE_PERMISSION" => -112,
        "INSTALL_FAILED_NO_MATCHING_ABIS" => -113,
        "INSTALL_FAILED_ABORTED" => -115,
        "DELETE_FAILED_INTERNAL_ERROR" => -1,
        "DELETE_FAILED_DEVICE_POLICY_MANAGER" => -2,
        "DELETE_FAILED_USER_RESTRICTED" => -3,
        "DELETE_FAILED_OWNER_BLOCKED" => -4,
        "DELETE_FAILED_ABORTED" => -5,
        "DELETE_FAILED_USED_SHARED_LIBRARY" => -6,
        _ if name.starts_with("DELETE_") => -1,
        _ => -110,
    }
}
