//! Handshake validation for incoming connections
//!
//! Checks that only need the query string happen here, before the hub is
//! involved. Capacity and display-name uniqueness depend on who is connected
//! and are decided by the registry when it admits the request.
//!
//! Those two checks run inside the hub's `Admit` request, not here, because a
//! check made before registering would let two handshakes for the same name or
//! the last free slot both pass.

use crate::error::AdmissionError;
use shared::{CLIENT_VERSION_PARAM, DISPLAY_NAME_PARAM, SESSION_KEY_PARAM};

/// A validated request to join a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub session_key: String,
    pub display_name: String,
    pub client_version: String,
}

impl AdmissionRequest {
    pub fn new(
        session_key: impl Into<String>,
        display_name: impl Into<String>,
        client_version: impl Into<String>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            display_name: display_name.into(),
            client_version: client_version.into(),
        }
    }

    /// Builds a request from raw query pairs
    ///
    /// Each parameter must appear exactly once, and the client version must
    /// match the server version exactly.
    pub fn from_query(
        params: &[(String, String)],
        server_version: &str,
    ) -> Result<Self, AdmissionError> {
        let session_key = single_param(params, SESSION_KEY_PARAM)?;
        let client_version = single_param(params, CLIENT_VERSION_PARAM)?;
        let display_name = single_param(params, DISPLAY_NAME_PARAM)?;

        if client_version != server_version {
            return Err(AdmissionError::VersionMismatch {
                client: client_version.to_string(),
                server: server_version.to_string(),
            });
        }
        if session_key.is_empty() {
            return Err(AdmissionError::EmptySessionKey);
        }
        if display_name.is_empty() {
            return Err(AdmissionError::EmptyDisplayName);
        }

        Ok(Self::new(session_key, display_name, client_version))
    }
}

fn single_param<'a>(
    params: &'a [(String, String)],
    name: &'static str,
) -> Result<&'a str, AdmissionError> {
    let mut values = params
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.as_str());

    let value = values.next().ok_or(AdmissionError::MissingParameter(name))?;
    if values.next().is_some() {
        return Err(AdmissionError::RepeatedParameter(name));
    }
    Ok(value)
}
