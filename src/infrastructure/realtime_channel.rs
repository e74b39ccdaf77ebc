use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// One open push connection. `Ok(None)` means the server closed it cleanly.
#[async_trait]
pub trait RealtimeChannel: Send {
    async fn next_message(&mut self) -> Result<Option<String>, InfraError>;
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(
        &self,
        access_token: Option<String>,
    ) -> Result<Box<dyn RealtimeChannel>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    realtime_url: Url,
}

impl WebSocketConnector {
    pub fn new(realtime_url: &str) -> Result<Self, InfraError> {
        let realtime_url = Url::parse(realtime_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid realtime url: {error}")))?;
        match realtime_url.scheme() {
            "ws" | "wss" => Ok(Self { realtime_url }),
            other => Err(InfraError::InvalidConfig(format!(
                "realtime url must use ws or wss, got `{other}`"
            ))),
        }
    }

    fn url_with_token(&self, access_token: Option<&str>) -> Url {
        let mut url = self.realtime_url.clone();
        if let Some(token) = access_token.filter(|token| !token.trim().is_empty()) {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeChannel for WebSocketChannel {
    async fn next_message(&mut self) -> Result<Option<String>, InfraError> {
        while let Some(frame) = self.stream.next().await {
            let frame = frame.map_err(|error| InfraError::Realtime(error.to_string()))?;
            match frame {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        tracing::warn!(len = bytes.len(), "ignoring non-utf8 realtime frame");
                    }
                },
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    async fn connect(
        &self,
        access_token: Option<String>,
    ) -> Result<Box<dyn RealtimeChannel>, InfraError> {
        let url = self.url_with_token(access_token.as_deref());
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| InfraError::Realtime(format!("connect failed: {error}")))?;
        Ok(Box::new(WebSocketChannel { stream }))
    }
}
