//! Client side of the configuration service.

use crate::rpc::{Fault, FaultKind, Request, Response};
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;
use thiserror::Error;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by [`ConfigClient`] calls.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed")]
    Io(#[from] io::Error),
    #[error("invalid response from server")]
    Protocol(#[from] serde_json::Error),
    /// The server reported one of the known faults.
    #[error(transparent)]
    Fault(Fault),
    /// The server reported a fault code this client does not know.
    #[error("unexpected fault {code}: {message}")]
    UnexpectedFault { code: i32, message: String },
    #[error("server closed the connection")]
    Closed,
}

impl ClientError {
    /// The fault kind, when the server reported a known fault.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            ClientError::Fault(fault) => Some(fault.kind),
            _ => None,
        }
    }
}

/// Talks to a running daemon's configuration service.
#[derive(Debug, Clone)]
pub struct ConfigClient {
    host: String,
    port: u16,
}

impl ConfigClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Fetches the value of `key`.
    pub fn get_config(&self, key: &str) -> Result<String, ClientError> {
        let value = self.call(&Request::GetConfig {
            key: key.to_string(),
        })?;
        Ok(value.unwrap_or_default())
    }

    /// Sets `key` to `value` on the daemon.
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.call(&Request::SetConfig {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        Ok(())
    }

    fn call(&self, request: &Request) -> Result<Option<String>, ClientError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(TIMEOUT))?;

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream.write_all(line.as_bytes())?;
        stream.flush()?;

        let mut reply = String::new();
        if BufReader::new(stream).read_line(&mut reply)? == 0 {
            return Err(ClientError::Closed);
        }

        match serde_json::from_str(&reply)? {
            Response::Ok { value } => Ok(value),
            Response::Fault { code, message } => Err(match FaultKind::from_code(code) {
                Some(kind) => ClientError::Fault(Fault::new(kind, message)),
                None => ClientError::UnexpectedFault { code, message },
            }),
        }
    }
}
