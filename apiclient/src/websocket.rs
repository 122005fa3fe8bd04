//! The live event WebSocket (§6): `wss://…/await?access_token=…&client=…`, binary frames carrying
//! UTF-8 JSON [`crate::dto::EventEnvelope`]s, pinged every 20s to stay alive.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::BackendError;

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WebSocketConnection {
    pub async fn connect(base_url: &Url, access_token: &str, client_id: &str) -> Result<Self, BackendError> {
        let mut url = base_url.join("await").map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "https" => url.set_scheme("wss").ok(),
            _ => url.set_scheme("ws").ok(),
        };
        url.query_pairs_mut()
            .append_pair("access_token", access_token)
            .append_pair("client", client_id);
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| BackendError::WebSocket(e.to_string()))?;
        Ok(Self { stream })
    }

    /// Waits for the next binary frame, decoding it as UTF-8 JSON bytes for the caller to parse.
    /// Returns `Ok(None)` on a clean close.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, BackendError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes.to_vec())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(BackendError::WebSocket(e.to_string())),
            }
        }
    }

    pub async fn send_ping(&mut self) -> Result<(), BackendError> {
        self.stream
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| BackendError::WebSocket(e.to_string()))
    }

    pub async fn close(&mut self) -> Result<(), BackendError> {
        self.stream.close(None).await.map_err(|e| BackendError::WebSocket(e.to_string()))
    }
}
