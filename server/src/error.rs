//! Error types for the sync server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Reasons a connection is refused before it reaches the registry
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("missing query parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("query parameter `{0}` must be given exactly once")]
    RepeatedParameter(&'static str),
    #[error("session key must not be empty")]
    EmptySessionKey,
    #[error("display name must not be empty")]
    EmptyDisplayName,
    #[error("Latest version required. Current version: {client}")]
    VersionMismatch { client: String, server: String },
    #[error("display name `{0}` is already taken")]
    DisplayNameTaken(String),
    #[error("Server is full ({0} clients connected)")]
    ServerFull(usize),
    #[error("server is shutting down")]
    Unavailable,
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::DisplayNameTaken(_) => StatusCode::CONFLICT,
            AdmissionError::ServerFull(_) | AdmissionError::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is no longer running")]
    Closed,
    #[error("hub request queue is full")]
    Busy,
}

/// Failures on one connection's socket
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Socket(String),
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tick rate must be greater than zero")]
    ZeroTickRate,
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("server version must not be empty")]
    EmptyVersion,
    #[error("ping period {ping_period:?} must be shorter than pong wait {pong_wait:?}")]
    PingPeriodTooLong {
        ping_period: Duration,
        pong_wait: Duration,
    },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
