//! Message templates.
//!
//! A template document is handlebars source that defines two inline partials,
//! `title` and `text`:
//!
//! ```handlebars
//! {{#*inline "title"}}[{{upper status}}] {{join group_labels " "}}{{/inline}}
//! {{#*inline "text"}}{{#each alerts}}- {{markdown summary}}
//! {{/each}}{{/inline}}
//! ```
//!
//! Anything outside the two partials is ignored. Label and annotation maps
//! iterate in key order, missing fields render as empty text and HTML escaping
//! is off since the output is markdown.

mod helpers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::alert::{Alert, AlertGroup, AlertStatus, KeyValues};

const DEFAULT_TEMPLATE: &str = include_str!("default.hbs");

const TITLE: &str = "title";
const TEXT: &str = "text";

// Registry names must differ from the partial names, otherwise a source that
// lacks a partial would resolve `{{> text}}` to its own wrapper.
fn entry_name(section: &str) -> String {
    format!("__message_{section}")
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("template does not parse: {0}")]
    Syntax(String),
    #[error("template failed validation: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
#[error("failed to render {section}: {message}")]
pub struct RenderError {
    pub section: &'static str,
    pub message: String,
}

/// Markdown message ready to be wrapped in a DingTalk envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub title: String,
    pub text: String,
}

/// A parsed and validated template. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct CompiledTemplate {
    registry: Handlebars<'static>,
    is_default: bool,
}

impl CompiledTemplate {
    /// Parses `source` and proves it can render both sections against an
    /// empty alert group, so a missing partial or unknown helper surfaces here
    /// rather than on the first real alert.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        helpers::register(&mut registry);

        for section in [TITLE, TEXT] {
            let wrapped = format!("{source}\n{{{{> {section}}}}}");
            registry
                .register_template_string(&entry_name(section), wrapped)
                .map_err(|e| TemplateError::Syntax(e.to_string()))?;
        }

        let compiled = Self {
            registry,
            is_default: false,
        };
        compiled
            .render(&AlertGroup::default())
            .map_err(|e| TemplateError::Invalid(e.to_string()))?;
        Ok(compiled)
    }

    pub fn compile_file(path: &Path) -> Result<Self, TemplateError> {
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::compile(&source)
    }

    /// The built-in template. Its source ships with the crate and is covered
    /// by tests, so failing to compile it is a build defect.
    pub fn default_template() -> Self {
        let mut compiled = Self::compile(DEFAULT_TEMPLATE).expect("built-in template compiles");
        compiled.is_default = true;
        compiled
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn render(&self, group: &AlertGroup) -> Result<RenderedMessage, RenderError> {
        let view = GroupView::new(group);
        let render = |section: &'static str| {
            self.registry
                .render(&entry_name(section), &view)
                .map(|s| s.trim().to_string())
                .map_err(|e| RenderError {
                    section,
                    message: e.to_string(),
                })
        };
        Ok(RenderedMessage {
            title: render(TITLE)?,
            text: render(TEXT)?,
        })
    }
}

/// Process-wide handle to the active template. A template that fails to
/// compile never replaces the running one.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    current: Arc<RwLock<Arc<CompiledTemplate>>>,
}

impl TemplateStore {
    pub fn new(template: CompiledTemplate) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(template))),
        }
    }

    pub async fn snapshot(&self) -> Arc<CompiledTemplate> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn replace(&self, template: CompiledTemplate) {
        *self.current.write().await = Arc::new(template);
    }

    pub async fn compile_and_swap(&self, source: &str) -> Result<(), TemplateError> {
        let compiled = CompiledTemplate::compile(source)?;
        self.replace(compiled).await;
        info!("Message template replaced");
        Ok(())
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new(CompiledTemplate::default_template())
    }
}

#[derive(Serialize)]
struct GroupView<'a> {
    status: AlertStatus,
    receiver: &'a str,
    group_key: &'a str,
    external_url: &'a str,
    alertmanager_url: String,
    group_labels: &'a KeyValues,
    common_labels: &'a KeyValues,
    common_annotations: &'a KeyValues,
    summary: &'a str,
    description: &'a str,
    alerts: Vec<AlertView<'a>>,
    firing: Vec<AlertView<'a>>,
    resolved: Vec<AlertView<'a>>,
    firing_count: usize,
    resolved_count: usize,
    truncated_alerts: u64,
}

impl<'a> GroupView<'a> {
    fn new(group: &'a AlertGroup) -> Self {
        let firing: Vec<_> = group.firing().map(AlertView::new).collect();
        let resolved: Vec<_> = group.resolved().map(AlertView::new).collect();
        Self {
            status: group.status,
            receiver: &group.receiver,
            group_key: &group.group_key,
            external_url: &group.external_url,
            alertmanager_url: group.alertmanager_url(),
            group_labels: &group.group_labels,
            common_labels: &group.common_labels,
            common_annotations: &group.common_annotations,
            summary: annotation(&group.common_annotations, "summary"),
            description: annotation(&group.common_annotations, "description"),
            alerts: group.alerts.iter().map(AlertView::new).collect(),
            firing_count: firing.len(),
            resolved_count: resolved.len(),
            firing,
            resolved,
            truncated_alerts: group.truncated_alerts,
        }
    }
}

#[derive(Serialize)]
struct AlertView<'a> {
    status: AlertStatus,
    labels: &'a KeyValues,
    annotations: &'a KeyValues,
    summary: &'a str,
    description: &'a str,
    starts_at: String,
    ends_at: String,
    generator_url: &'a str,
    fingerprint: &'a str,
}

impl<'a> AlertView<'a> {
    fn new(alert: &'a Alert) -> Self {
        Self {
            status: alert.status,
            labels: &alert.labels,
            annotations: &alert.annotations,
            summary: annotation(&alert.annotations, "summary"),
            description: annotation(&alert.annotations, "description"),
            starts_at: alert.starts_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            ends_at: alert.ends_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            generator_url: &alert.generator_url,
            fingerprint: &alert.fingerprint,
        }
    }
}

fn annotation<'a>(map: &'a KeyValues, key: &str) -> &'a str {
    map.get(key).map(String::as_str).unwrap_or("")
}
