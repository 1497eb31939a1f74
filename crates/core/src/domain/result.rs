use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failure,
    Partial,
    DryRun,
    PendingConfirmation,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Partial => "PARTIAL",
            Self::DryRun => "DRY_RUN",
            Self::PendingConfirmation => "PENDING_CONFIRMATION",
        }
    }

    /// Terminal outcomes that did not change anything and did not fail.
    pub fn is_preview(&self) -> bool {
        matches!(self, Self::DryRun | Self::PendingConfirmation)
    }
}

/// Machine-readable marker attached to every error in an [`ActionResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    SecurityViolation,
    AuthorizationError,
    NotFound,
    Conflict,
    UnknownResourceType,
    HandlerError,
    Timeout,
    Cancelled,
    ParseError,
    UnknownTool,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::AuthorizationError => "AUTHORIZATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::UnknownResourceType => "UNKNOWN_RESOURCE_TYPE",
            Self::HandlerError => "HANDLER_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::ParseError => "PARSE_ERROR",
            Self::UnknownTool => "UNKNOWN_TOOL",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl ActionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, field: None, message: message.into() }
    }

    pub fn for_field(code: ErrorCode, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code, field: Some(field.into()), message: message.into() }
    }
}

/// Outcome of executing (or refusing to execute) an action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub status: ActionStatus,
    pub message: String,
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<ActionError>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl ActionResult {
    fn with_status(status: ActionStatus, message: impl Into<String>, data: Value) -> Self {
        Self {
            status,
            message: message.into(),
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
            correlation_id: None,
        }
    }

    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self::with_status(ActionStatus::Success, message, data)
    }

    pub fn partial(message: impl Into<String>, data: Value) -> Self {
        Self::with_status(ActionStatus::Partial, message, data)
    }

    pub fn failure(message: impl Into<String>, errors: Vec<ActionError>) -> Self {
        let mut result = Self::with_status(ActionStatus::Failure, message, Value::Null);
        result.errors = errors;
        result
    }

    pub fn dry_run(message: impl Into<String>, preview: Value) -> Self {
        Self::with_status(ActionStatus::DryRun, message, preview)
    }

    pub fn pending_confirmation(message: impl Into<String>, preview: Value) -> Self {
        Self::with_status(ActionStatus::PendingConfirmation, message, preview)
    }

    pub fn with_warnings<I, S>(mut self, warnings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.warnings.extend(warnings.into_iter().map(Into::into));
        self
    }

    /// Puts `warnings` ahead of the ones already on the result.
    pub fn with_leading_warnings(mut self, mut warnings: Vec<String>) -> Self {
        warnings.append(&mut self.warnings);
        self.warnings = warnings;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn has_error_code(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|error| error.code == code)
    }
}
