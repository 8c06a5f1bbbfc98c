use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for outbound calls to DingTalk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a whole outbound request, connect through body (default: 5s).
    pub request_timeout: Duration,
    /// Upper bound on establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let request_timeout = Duration::from_secs(5);
        Self {
            request_timeout,
            connect_timeout: request_timeout,
            user_agent: format!("webhook-dingtalk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DispatchConfig {
    /// Sets the request timeout. The connect timeout follows it unless it was
    /// already tightened below the new value.
    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        let old_timeout = self.request_timeout;
        self.request_timeout = Duration::from_millis(ms.max(1));
        if self.connect_timeout == old_timeout || self.connect_timeout > self.request_timeout {
            self.connect_timeout = self.request_timeout;
        }
        self
    }

    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout = Duration::from_millis(ms.max(1)).min(self.request_timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
