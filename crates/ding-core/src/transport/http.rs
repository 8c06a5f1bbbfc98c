use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::{DingTalkMessage, DingTalkResponse, Transport, TransportError};
use crate::config::DispatchConfig;
use crate::profile::redact_url;

const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed transport. Idle connections are never pooled, so every
/// dispatch opens a fresh connection to DingTalk. Proxy settings come from
/// the environment.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &DispatchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(Self::build_client(config)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn build_client(config: &DispatchConfig) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(0)
            .user_agent(config.user_agent.as_str())
            .build()
    }
}

// reqwest errors carry the full request URL, query string included.
fn send_error(url: &str, e: reqwest::Error) -> TransportError {
    let e = e.without_url();
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &Url,
        message: &DingTalkMessage,
    ) -> Result<DingTalkResponse, TransportError> {
        let shown = redact_url(url);

        let response = self
            .client
            .post(url.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| {
                let err = send_error(&shown, e);
                warn!(error = %err, "DingTalk request failed");
                err
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| send_error(&shown, e))?;

        if !status.is_success() {
            warn!(url = %shown, status = status.as_u16(), "DingTalk returned error status");
            return Err(TransportError::Status {
                url: shown,
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        let ack: DingTalkResponse =
            serde_json::from_str(&body).map_err(|e| TransportError::Decode {
                url: shown.clone(),
                reason: e.to_string(),
            })?;

        if ack.errcode != 0 {
            warn!(
                url = %shown,
                errcode = ack.errcode,
                errmsg = %ack.errmsg,
                "DingTalk rejected message"
            );
            return Err(TransportError::Rejected {
                errcode: ack.errcode,
                errmsg: ack.errmsg,
            });
        }

        debug!(url = %shown, "DingTalk accepted message");
        Ok(ack)
    }
}
