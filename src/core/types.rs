//! Value types shared by every layer of the engine

use std::{fmt, str::FromStr, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// Identifier of one Request Coordinator (one caller batch).
pub type CoordinatorId = u64;

/// Identifier of one Request Task.
pub type TaskId = u64;

static TARGET_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:\S+$").expect("target uri pattern is valid")
});

/// An opaque URI naming one entity to look up.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(Arc<str>);

impl Target {
    /// Parse a target URI. Only the generic `scheme:rest` shape is checked.
    pub fn parse(uri: &str) -> EngineResult<Self> {
        let uri = uri.trim();
        if !TARGET_URI.is_match(uri) {
            return Err(EngineError::Validation(format!("invalid target uri: {uri:?}")));
        }
        Ok(Self(Arc::from(uri)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Target {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a capability record was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    /// The target answered with its capabilities.
    Found,
    /// The network reported the target does not exist.
    NotFound,
    /// Nothing conclusive is known about the target.
    Unknown,
}

/// One capability result for one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityRecord {
    pub target: Target,
    pub status: RecordStatus,
    pub features: Vec<String>,
}

impl CapabilityRecord {
    pub fn found(target: Target, features: Vec<String>) -> Self {
        Self {
            target,
            status: RecordStatus::Found,
            features,
        }
    }

    pub fn not_found(target: Target) -> Self {
        Self {
            target,
            status: RecordStatus::NotFound,
            features: Vec::new(),
        }
    }

    pub fn unknown(target: Target) -> Self {
        Self {
            target,
            status: RecordStatus::Unknown,
            features: Vec::new(),
        }
    }
}

/// Which request flavour a task serves. Only cache freshness differs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Capability,
    Availability,
}

/// Lookup mechanism used against the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupMechanism {
    /// Subscription based lookups; may carry several targets per call.
    #[default]
    Presence,
    /// Per-target capability queries.
    Options,
    /// No mechanism available; every request fails with `NotEnabled`.
    None,
}

/// Normalized error codes reported to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    GenericFailure,
    NotEnabled,
    NotAvailable,
    NotRegistered,
    NotAuthorized,
    Forbidden,
    NotFound,
    RequestTooLarge,
    RequestTimeout,
    InsufficientMemory,
    LostNetwork,
    ServerUnavailable,
}

impl ErrorCode {
    /// Numeric value as exposed on the caller-facing API.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::GenericFailure => 1,
            ErrorCode::NotEnabled => 2,
            ErrorCode::NotAvailable => 3,
            ErrorCode::NotRegistered => 4,
            ErrorCode::NotAuthorized => 5,
            ErrorCode::Forbidden => 6,
            ErrorCode::NotFound => 7,
            ErrorCode::RequestTooLarge => 8,
            ErrorCode::RequestTimeout => 9,
            ErrorCode::InsufficientMemory => 10,
            ErrorCode::LostNetwork => 11,
            ErrorCode::ServerUnavailable => 12,
        }
    }

    /// Normalize a SIP response code.
    pub fn from_sip_code(sip_code: u16) -> Self {
        match sip_code {
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            408 | 480 | 504 => ErrorCode::RequestTimeout,
            413 => ErrorCode::RequestTooLarge,
            500 | 503 => ErrorCode::ServerUnavailable,
            _ => ErrorCode::GenericFailure,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Errors a backend reports before any network activity took place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError {
    GenericFailure,
    InvalidParam,
    FetchError,
    RequestTimeout,
    InsufficientMemory,
    LostNetworkConnection,
    NotSupported,
    NotFound,
    ServiceUnavailable,
    NoChange,
}

impl From<CommandError> for ErrorCode {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotSupported => ErrorCode::NotEnabled,
            CommandError::RequestTimeout => ErrorCode::RequestTimeout,
            CommandError::InsufficientMemory => ErrorCode::InsufficientMemory,
            CommandError::LostNetworkConnection => ErrorCode::LostNetwork,
            CommandError::ServiceUnavailable => ErrorCode::ServerUnavailable,
            CommandError::NotFound => ErrorCode::NotFound,
            CommandError::GenericFailure
            | CommandError::InvalidParam
            | CommandError::FetchError
            | CommandError::NoChange => ErrorCode::GenericFailure,
        }
    }
}

/// Outcome of one finished task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure {
        code: ErrorCode,
        retry_after_ms: u64,
    },
}

/// Result of a finished task, derived once by the owning coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestResult {
    pub task_id: TaskId,
    pub outcome: Outcome,
}

impl RequestResult {
    pub fn success(task_id: TaskId) -> Self {
        Self {
            task_id,
            outcome: Outcome::Success,
        }
    }

    pub fn failure(task_id: TaskId, code: ErrorCode, retry_after_ms: u64) -> Self {
        Self {
            task_id,
            outcome: Outcome::Failure {
                code,
                retry_after_ms,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

/// Current device/service state as seen by the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub forbidden: bool,
    pub error_code: Option<ErrorCode>,
    pub retry_after_ms: u64,
}

impl DeviceState {
    pub fn allowed() -> Self {
        Self::default()
    }

    pub fn forbidden(error_code: Option<ErrorCode>, retry_after_ms: u64) -> Self {
        Self {
            forbidden: true,
            error_code,
            retry_after_ms,
        }
    }
}
