mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::profile::Mention;
use crate::template::RenderedMessage;

/// DingTalk custom-robot markdown message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DingTalkMessage {
    pub msgtype: String,
    pub markdown: Markdown,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<At>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markdown {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct At {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub at_mobiles: Vec<String>,
    #[serde(default)]
    pub is_at_all: bool,
}

impl DingTalkMessage {
    pub fn markdown(message: RenderedMessage, mention: Option<&Mention>) -> Self {
        let mut text = message.text;
        // DingTalk only notifies mobiles that also appear in the text.
        let at = mention.map(|m| {
            if !m.mobiles.is_empty() {
                let tags: Vec<String> = m.mobiles.iter().map(|p| format!("@{p}")).collect();
                text.push_str("\n\n");
                text.push_str(&tags.join(" "));
            }
            At {
                at_mobiles: m.mobiles.clone(),
                is_at_all: m.all,
            }
        });

        Self {
            msgtype: "markdown".to_string(),
            markdown: Markdown {
                title: message.title,
                text,
            },
            at,
        }
    }
}

/// DingTalk's acknowledgement body. `errcode == 0` means accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DingTalkResponse {
    #[serde(default)]
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out posting to {url}")]
    Timeout { url: String },
    #[error("network error posting to {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("dingtalk rejected message (errcode {errcode}): {errmsg}")]
    Rejected { errcode: i64, errmsg: String },
    #[error("undecodable response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Delivers one message to one webhook URL. Implementations make exactly one
/// attempt; the caller decides what a failure means.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        url: &Url,
        message: &DingTalkMessage,
    ) -> Result<DingTalkResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered() -> RenderedMessage {
        RenderedMessage {
            title: "[FIRING:1] HighCPU".into(),
            text: "body".into(),
        }
    }

    #[test]
    fn markdown_envelope_shape() {
        let msg = DingTalkMessage::markdown(rendered(), None);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "msgtype": "markdown",
                "markdown": {"title": "[FIRING:1] HighCPU", "text": "body"}
            })
        );
    }

    #[test]
    fn mention_appends_mobiles_to_text() {
        let mention = Mention {
            all: false,
            mobiles: vec!["13800000000".into(), "13900000000".into()],
        };
        let msg = DingTalkMessage::markdown(rendered(), Some(&mention));
        assert_eq!(msg.markdown.text, "body\n\n@13800000000 @13900000000");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["at"]["atMobiles"][1], "13900000000");
        assert_eq!(json["at"]["isAtAll"], false);
    }

    #[test]
    fn mention_all_leaves_text_alone() {
        let mention = Mention {
            all: true,
            mobiles: vec![],
        };
        let msg = DingTalkMessage::markdown(rendered(), Some(&mention));
        assert_eq!(msg.markdown.text, "body");
        assert!(msg.at.unwrap().is_at_all);
    }
}
