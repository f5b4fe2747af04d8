//! Socket client for the DeskPad listener.
//!
//! Every call opens its own connection: connect, write, half-close, read to
//! end of stream, close. The client keeps nothing between calls beyond its
//! configuration, so one instance can be shared freely across threads.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::SocketError;
use crate::protocol::{Command, CreateParams, PingInfo, Request, Response};
use crate::transport::FramedChannel;

#[derive(Debug, Clone, Default)]
pub struct SocketClient {
    config: ClientConfig,
}

impl SocketClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Exchange raw bytes with the listener.
    ///
    /// An empty answer means the listener closed without responding, which
    /// is what a rejected peer observes.
    pub fn send_raw(&self, payload: &[u8]) -> Result<Vec<u8>, SocketError> {
        let mut channel =
            FramedChannel::connect(&self.config.socket_path, self.config.connect_timeout)?;

        let exchange = (|| {
            channel.send_all(payload)?;
            channel.half_close()?;
            channel.read_to_end(self.config.read_timeout)
        })();
        channel.close();

        let response = exchange?;
        if response.is_empty() {
            return Err(SocketError::ReadFailed(
                "connection closed without a response".to_string(),
            ));
        }
        debug!("Received {} byte response", response.len());
        Ok(response)
    }

    /// Serialize `request`, exchange it and parse the answer.
    pub fn send<Req, Resp>(&self, request: &Req) -> Result<Resp, SocketError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)
            .map_err(|e| SocketError::SerializationFailed(e.to_string()))?;
        let response = self.send_raw(&payload)?;
        serde_json::from_slice(&response).map_err(|e| SocketError::InvalidJson(e.to_string()))
    }

    /// Send a typed request envelope.
    pub fn request(&self, request: &Request) -> Result<Response, SocketError> {
        self.send(&request.to_value())
    }

    pub fn create(&self, params: CreateParams) -> Result<Response, SocketError> {
        self.request(&Request::new(Command::Create(params)))
    }

    pub fn remove(&self, display_id: u32) -> Result<Response, SocketError> {
        self.request(&Request::new(Command::Remove { display_id }))
    }

    pub fn list(&self) -> Result<Response, SocketError> {
        self.request(&Request::new(Command::List))
    }

    /// Liveness check returning the listener's identity.
    pub fn ping(&self) -> Result<PingInfo, SocketError> {
        let response = self.request(&Request::new(Command::Ping))?;
        let result = response
            .into_result()
            .map_err(SocketError::ReadFailed)?
            .result
            .ok_or_else(|| SocketError::InvalidJson("ping response has no result".to_string()))?;
        serde_json::from_value(result).map_err(|e| SocketError::InvalidJson(e.to_string()))
    }
}
