//! Wire format of the configuration service.
//!
//! Every message is one JSON document on its own line:
//!
//! ```text
//! -> {"method":"get_config","params":{"key":"WatchDirectory"}}
//! <- {"ok":{"value":"/home/user/Downloads"}}
//! -> {"method":"set_config","params":{"key":"WatchDirectory","value":"/nope"}}
//! <- {"fault":{"code":1001,"message":"directory does not exist: /nope"}}
//! ```
//!
//! Errors travel as numeric fault codes so a client can tell them apart
//! without looking at the message.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kinds of error reported by the configuration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    UnknownKey,
    DirectoryNotFound,
    OsError,
    Internal,
}

/// Wire code of every fault kind.
const FAULT_CODES: [(FaultKind, i32); 4] = [
    (FaultKind::UnknownKey, 1000),
    (FaultKind::DirectoryNotFound, 1001),
    (FaultKind::OsError, 1002),
    (FaultKind::Internal, 1003),
];

impl FaultKind {
    pub fn code(self) -> i32 {
        FAULT_CODES
            .iter()
            .find_map(|&(kind, code)| (kind == self).then_some(code))
            .unwrap_or(1003)
    }

    /// Looks up the kind sent as `code`. Returns `None` for codes this
    /// version does not know.
    pub fn from_code(code: i32) -> Option<Self> {
        FAULT_CODES
            .iter()
            .find_map(|&(kind, known)| (known == code).then_some(kind))
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::UnknownKey => "unknown key",
            FaultKind::DirectoryNotFound => "directory not found",
            FaultKind::OsError => "OS error",
            FaultKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// An error reported by the configuration service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A call to the configuration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    GetConfig { key: String },
    SetConfig { key: String, value: String },
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// `value` is set for `get_config` and empty for `set_config`.
    Ok { value: Option<String> },
    Fault { code: i32, message: String },
}

impl From<Fault> for Response {
    fn from(fault: Fault) -> Self {
        Response::Fault {
            code: fault.kind.code(),
            message: fault.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes() {
        assert_eq!(FaultKind::UnknownKey.code(), 1000);
        assert_eq!(FaultKind::DirectoryNotFound.code(), 1001);
        assert_eq!(FaultKind::OsError.code(), 1002);
        assert_eq!(FaultKind::Internal.code(), 1003);

        for (kind, code) in FAULT_CODES {
            assert_eq!(FaultKind::from_code(code), Some(kind));
        }
        assert_eq!(FaultKind::from_code(42), None);
    }

    #[test]
    fn test_request_format() {
        let request = Request::SetConfig {
            key: "WatchDirectory".to_string(),
            value: "/downloads".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"method":"set_config","params":{"key":"WatchDirectory","value":"/downloads"}}"#
        );

        let parsed: Request =
            serde_json::from_str(r#"{"method":"get_config","params":{"key":"StorageDirectory"}}"#)
                .unwrap();
        assert_eq!(
            parsed,
            Request::GetConfig {
                key: "StorageDirectory".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let result = serde_json::from_str::<Request>(r#"{"method":"reboot","params":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_format() {
        let ok = Response::Ok {
            value: Some("/downloads".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"ok":{"value":"/downloads"}}"#
        );

        let fault: Response = Fault::new(FaultKind::DirectoryNotFound, "missing").into();
        assert_eq!(
            serde_json::to_string(&fault).unwrap(),
            r#"{"fault":{"code":1001,"message":"missing"}}"#
        );
    }
}
