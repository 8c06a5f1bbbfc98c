//! Profile-routed dispatch.
//!
//! [`Dispatcher::dispatch`] resolves the profile, renders the alert group and
//! makes one POST to DingTalk. Profile and template are read as snapshots at
//! the start of the call so a concurrent reload never affects a dispatch
//! already in flight.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::alert::AlertGroup;
use crate::profile::{ProfileNotFound, ProfileStore};
use crate::template::{RenderError, TemplateStore};
use crate::transport::{DingTalkMessage, DingTalkResponse, Transport, TransportError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    ProfileNotFound(#[from] ProfileNotFound),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// True when the request itself was at fault and no message left the process.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ProfileNotFound(_) | Self::Render(_))
    }

    /// Short outcome label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProfileNotFound(_) => "not_found",
            Self::Render(_) => "render_error",
            Self::Transport(TransportError::Timeout { .. }) => "timeout",
            Self::Transport(TransportError::Network { .. }) => "network_error",
            Self::Transport(_) => "rejected",
        }
    }
}

pub struct Dispatcher {
    profiles: ProfileStore,
    templates: TemplateStore,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        profiles: ProfileStore,
        templates: TemplateStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            profiles,
            templates,
            transport,
        }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub async fn dispatch(
        &self,
        profile_name: &str,
        group: &AlertGroup,
    ) -> Result<DingTalkResponse, DispatchError> {
        let table = self.profiles.snapshot().await;
        let profile = table.lookup(profile_name).map_err(|e| {
            warn!(profile = profile_name, "Dispatch to unknown profile");
            e
        })?;

        let template = self.templates.snapshot().await;
        let rendered = template.render(group).map_err(|e| {
            warn!(profile = profile_name, error = %e, "Failed to render alert group");
            e
        })?;
        debug!(profile = profile_name, title = %rendered.title, "Rendered message");

        let message = DingTalkMessage::markdown(rendered, profile.mention.as_ref());
        let url = match &profile.secret {
            Some(secret) => sign_url(&profile.url, secret, Utc::now().timestamp_millis()),
            None => profile.url.clone(),
        };

        let ack = self.transport.send(&url, &message).await.map_err(|e| {
            warn!(profile = profile_name, error = %e, "Failed to send notification to DingTalk");
            e
        })?;

        info!(
            profile = profile_name,
            status = %group.status,
            alerts = group.alerts.len(),
            "Notification sent to DingTalk"
        );
        Ok(ack)
    }
}

/// Appends DingTalk's `timestamp` and `sign` query parameters. The signature
/// is base64(HMAC-SHA256(secret, "{timestamp}\n{secret}")).
pub fn sign_url(url: &Url, secret: &str, timestamp_ms: i64) -> Url {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    let sign = BASE64.encode(mac.finalize().into_bytes());

    let mut signed = url.clone();
    signed
        .query_pairs_mut()
        .append_pair("timestamp", &timestamp_ms.to_string())
        .append_pair("sign", &sign);
    signed
}
