use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::codec::{decode_snapshot, encode_state, split_frame};
use shared::{
    CodecError, PlayerState, SessionSnapshot, CLIENT_VERSION_PARAM, DISPLAY_NAME_PARAM,
    SESSION_KEY_PARAM,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid server url: {0}")]
    Url(#[from] url::ParseError),

    /// The server answered the handshake with an HTTP error instead of upgrading
    #[error("Handshake rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Connection closed by server")]
    Closed,
}

/// Builds the handshake URL carrying the admission parameters
pub fn handshake_url(
    server: &str,
    session_key: &str,
    display_name: &str,
    client_version: &str,
) -> Result<Url, ClientError> {
    let mut url = Url::parse(server)?;
    url.query_pairs_mut()
        .append_pair(SESSION_KEY_PARAM, session_key)
        .append_pair(CLIENT_VERSION_PARAM, client_version)
        .append_pair(DISPLAY_NAME_PARAM, display_name);
    Ok(url)
}

/// A connected session member
pub struct Client {
    stream: WsStream,
    session_key: String,
    display_name: String,
}

impl Client {
    /// Opens the socket and completes the handshake
    ///
    /// Admission failures surface as [`ClientError::Rejected`] with the
    /// server's HTTP status.
    pub async fn connect(
        server: &str,
        session_key: &str,
        display_name: &str,
        client_version: &str,
    ) -> Result<Self, ClientError> {
        let url = handshake_url(server, session_key, display_name, client_version)?;
        info!("Connecting to {} as {}", server, display_name);

        let (stream, _response) = connect_async(url.as_str()).await.map_err(|e| match e {
            tungstenite::Error::Http(response) => ClientError::Rejected {
                status: response.status().as_u16(),
                reason: response
                    .body()
                    .as_deref()
                    .map(|body| String::from_utf8_lossy(body).trim().to_string())
                    .unwrap_or_default(),
            },
            other => ClientError::WebSocket(other),
        })?;

        info!("Joined session {} as {}", session_key, display_name);
        Ok(Self {
            stream,
            session_key: session_key.to_string(),
            display_name: display_name.to_string(),
        })
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Sends this client's state; identity fields are stamped from the handshake
    pub async fn send_state(&mut self, state: &PlayerState) -> Result<(), ClientError> {
        let mut state = state.clone();
        state.display_name.clone_from(&self.display_name);
        state.session_key.clone_from(&self.session_key);

        let text = encode_state(&state)?;
        self.send_text(text).await
    }

    /// Sends a raw text frame without encoding it
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Waits for the next data frame and decodes every snapshot it carries
    ///
    /// A frame may hold several snapshots separated by newlines when the
    /// server coalesced a backlog. Undecodable entries are skipped.
    pub async fn next_snapshots(&mut self) -> Result<Vec<SessionSnapshot>, ClientError> {
        loop {
            let message = match self.stream.next().await {
                Some(message) => message?,
                None => return Err(ClientError::Closed),
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Message::Close(frame) => {
                    debug!("Server closed the connection: {:?}", frame);
                    return Err(ClientError::Closed);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            let snapshots: Vec<SessionSnapshot> = split_frame(&text)
                .filter_map(|entry| match decode_snapshot(entry) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!("Dropping undecodable snapshot: {}", e);
                        None
                    }
                })
                .collect();

            if !snapshots.is_empty() {
                return Ok(snapshots);
            }
        }
    }

    /// Sends a close frame and waits for the server to finish the handshake
    pub async fn close(mut self) -> Result<(), ClientError> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => {}
            Err(e) => return Err(e.into()),
        }
        while let Some(message) = self.stream.next().await {
            if message.is_err() {
                break;
            }
        }
        info!("Left session {}", self.session_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_url_carries_parameters() {
        let url = handshake_url("ws://127.0.0.1:8000/ws", "abc", "Alice", "1.0.0").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/ws");
        assert_eq!(
            pairs,
            vec![
                ("sessionKey".to_string(), "abc".to_string()),
                ("clientVersion".to_string(), "1.0.0".to_string()),
                ("displayName".to_string(), "Alice".to_string()),
            ]
        );
    }

    #[test]
    fn test_handshake_url_escapes_values() {
        let url = handshake_url("ws://localhost:8000/", "room 1&2", "Bob=B", "1").unwrap();
        let query = url.query().unwrap();

        assert!(!query.contains("room 1&2"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0].1, "room 1&2");
        assert_eq!(pairs[2].1, "Bob=B");
    }

    #[test]
    fn test_handshake_url_rejects_garbage() {
        let result = handshake_url("not a url", "abc", "Alice", "1");
        assert!(matches!(result, Err(ClientError::Url(_))));
    }

    #[tokio::test]
    async fn test_connect_fails_without_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Client::connect(&format!("ws://{}/ws", addr), "abc", "Alice", "1").await;
        assert!(matches!(result, Err(ClientError::WebSocket(_))));
    }
}
