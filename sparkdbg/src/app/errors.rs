// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const CONFIGURATION_ERROR: &str = "configuration_error";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const HOST_KEY_REJECTED: &str = "host_key_rejected";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const UPLOAD_FAILURE: &str = "upload_failure";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const CANCELED: &str = "canceled";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Unavailable,
    Cancelled,
    Internal,
}

/// Telemetry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    User,
    System,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::User => "user",
            ErrorClass::System => "system",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    /// User-correctable input problem, raised before any network call.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::InvalidArgument,
            codes::CONFIGURATION_ERROR,
            message,
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Cancelled, codes::CANCELED, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Unavailable, codes::REMOTE_ERROR, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, codes::INTERNAL_ERROR, message)
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == AppErrorKind::Cancelled
    }

    pub fn classification(&self) -> ErrorClass {
        match self.kind {
            AppErrorKind::InvalidArgument
            | AppErrorKind::PermissionDenied
            | AppErrorKind::Cancelled => ErrorClass::User,
            AppErrorKind::Unauthenticated
            | AppErrorKind::NotFound
            | AppErrorKind::Unavailable
            | AppErrorKind::Internal => ErrorClass::System,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;
