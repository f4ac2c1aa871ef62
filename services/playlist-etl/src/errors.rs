//!
//! src/errors.rs  Andrew Belles  Sept 13th, 2025
//!
//! Defines enums and methods of error conversion
//! for errors the extractor and transformer use
//!
//!

use thiserror::Error;

/// Coarse classification handlers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Upstream,
    Storage,
    DataShape
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config    => "config",
            ErrorKind::Upstream  => "upstream",
            ErrorKind::Storage   => "storage",
            ErrorKind::DataShape => "data_shape"
        }
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("storage error during {op} of {key}: {message}")]
    Storage { op: &'static str, key: String, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl EtlError {
    pub fn storage(op: &'static str, key: &str, message: impl ToString) -> Self {
        EtlError::Storage { op, key: key.to_string(), message: message.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Config(_) => ErrorKind::Config,
            EtlError::Http(_) | EtlError::Upstream(_) => ErrorKind::Upstream,
            EtlError::Storage { .. } | EtlError::Io(_) => ErrorKind::Storage,
            EtlError::Parse(_) => ErrorKind::DataShape
        }
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(e: reqwest::Error) -> Self { EtlError::Http(e.to_string()) }
}

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self { EtlError::Parse(e.to_string()) }
}

impl From<csv::Error> for EtlError {
    fn from(e: csv::Error) -> Self { EtlError::Parse(format!("csv: {e}")) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(EtlError::Config("x".into()).kind(), ErrorKind::Config);
        assert_eq!(EtlError::Http("x".into()).kind(), ErrorKind::Upstream);
        assert_eq!(EtlError::Upstream("x".into()).kind(), ErrorKind::Upstream);
        assert_eq!(EtlError::storage("put", "k", "boom").kind(), ErrorKind::Storage);
        assert_eq!(EtlError::Parse("x".into()).kind(), ErrorKind::DataShape);
    }

    #[test]
    fn json_errors_are_data_shape() {
        let err: EtlError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::DataShape);
    }

    #[test]
    fn storage_message_names_key() {
        let err = EtlError::storage("delete", "raw_data/to_processed/a.json", "denied");
        assert_eq!(
            err.to_string(),
            "storage error during delete of raw_data/to_processed/a.json: denied"
        );
    }
}
