use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Stable, machine-readable error codes reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The package manager is held by another operation.
    Locked,
    /// Not enough free space to complete the operation.
    DiskFull,
    /// The overall deadline was exceeded and the process was killed.
    Timeout,
    /// Package repositories could not be reached.
    NetworkError,
    PackageNotFound,
    /// Refused before spawning: the package is on the protected list.
    EssentialPackage,
    InstallFailed,
    RemoveFailed,
    UpgradeFailed,
    UpdateFailed,
    InvalidPackageName,
    ConfigError,
    /// Anything that is not one of the classified failures above.
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Locked => "LOCKED",
            ErrorCode::DiskFull => "DISK_FULL",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::PackageNotFound => "PACKAGE_NOT_FOUND",
            ErrorCode::EssentialPackage => "ESSENTIAL_PACKAGE",
            ErrorCode::InstallFailed => "INSTALL_FAILED",
            ErrorCode::RemoveFailed => "REMOVE_FAILED",
            ErrorCode::UpgradeFailed => "UPGRADE_FAILED",
            ErrorCode::UpdateFailed => "UPDATE_FAILED",
            ErrorCode::InvalidPackageName => "INVALID_PACKAGE_NAME",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one bridge invocation.
///
/// Every failure that leaves the core is one of these: either classified from
/// the diagnostic text of a failed `apt-get` run, raised by a pre-flight check,
/// or wrapped exactly once as [`ErrorCode::InternalError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BridgeError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl BridgeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn locked(details: &str) -> Self {
        Self::new(ErrorCode::Locked, "Package manager is locked").with_details(details)
    }

    pub fn disk_full(details: &str) -> Self {
        Self::new(ErrorCode::DiskFull, "Insufficient disk space").with_details(details)
    }

    pub fn network(details: &str) -> Self {
        Self::new(
            ErrorCode::NetworkError,
            "Network error: Unable to reach package repositories",
        )
        .with_details(details)
    }

    pub fn package_not_found(package: &str) -> Self {
        Self::new(
            ErrorCode::PackageNotFound,
            format!("Package not found: {package}"),
        )
        .with_details(package)
    }

    pub fn essential_package(package: &str) -> Self {
        Self::new(
            ErrorCode::EssentialPackage,
            format!("Cannot remove essential package '{package}'"),
        )
        .with_details("Removing this package may break your system")
    }

    /// Wrap an unexpected failure, keeping its text as details.
    pub fn internal(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, message).with_details(cause.to_string())
    }

    /// The caller-facing error report for this error.
    pub fn report(&self) -> ErrorReport<'_> {
        ErrorReport {
            error: &self.message,
            code: self.code,
            details: self.details.as_deref().filter(|d| !d.is_empty()),
        }
    }
}

/// `{"error": message, "code": CODE, "details"?: text}` as written to the
/// caller's error channel.
#[derive(Debug, Serialize)]
pub struct ErrorReport<'a> {
    pub error: &'a str,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a str>,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
