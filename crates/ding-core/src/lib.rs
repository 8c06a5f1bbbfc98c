#![forbid(unsafe_code)]

pub mod alert;
pub mod config;
pub mod dispatch;
pub mod profile;
pub mod template;
pub mod transport;

pub use alert::{Alert, AlertGroup, AlertStatus};
pub use config::DispatchConfig;
pub use dispatch::{sign_url, DispatchError, Dispatcher};
pub use profile::{
    ConfigError, ConfigFormat, Mention, Profile, ProfileNotFound, ProfileStore, ProfileTable,
};
pub use template::{CompiledTemplate, RenderError, RenderedMessage, TemplateError, TemplateStore};
pub use transport::{
    DingTalkMessage, DingTalkResponse, HttpTransport, Transport, TransportError,
};
