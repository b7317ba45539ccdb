use serde::Serialize;
use std::fmt;

pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";
pub const ERR_NOT_FOUND: &str = "ERR_NOT_FOUND";
pub const ERR_TIMEOUT: &str = "ERR_TIMEOUT";
pub const ERR_CANCELLED: &str = "ERR_CANCELLED";
pub const ERR_EXTRACTION: &str = "ERR_EXTRACTION";
pub const ERR_NO_PACKAGES: &str = "ERR_NO_PACKAGES";
pub const ERR_LISTING: &str = "ERR_LISTING";
pub const ERR_LABEL_UNRESOLVED: &str = "ERR_LABEL_UNRESOLVED";
pub const ERR_STORAGE_CORRUPT: &str = "ERR_STORAGE_CORRUPT";
pub const ERR_OUT_OF_RANGE: &str = "ERR_OUT_OF_RANGE";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn not_found(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_NOT_FOUND, message, trace_id)
    }

    pub fn timeout(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_TIMEOUT, message, trace_id)
    }

    pub fn cancelled(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_CANCELLED, message, trace_id)
    }

    pub fn extraction(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_EXTRACTION, message, trace_id)
    }

    pub fn no_packages(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_NO_PACKAGES, message, trace_id)
    }

    pub fn listing(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_LISTING, message, trace_id)
    }

    pub fn label_unresolved(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_LABEL_UNRESOLVED, message, trace_id)
    }

    pub fn storage_corrupt(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_STORAGE_CORRUPT, message, trace_id)
    }

    pub fn out_of_range(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_OUT_OF_RANGE, message, trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
