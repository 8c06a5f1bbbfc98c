use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use dashmap::DashMap;

use crate::state::AppState;

/// Process-lifetime counters exposed on `/metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Keyed by (profile, outcome). Only resolved profiles get a series so
    /// arbitrary request paths cannot grow the label set.
    notifications: DashMap<(String, &'static str), AtomicU64>,
    unknown_profile: AtomicU64,
    invalid_payload: AtomicU64,
    reloads_ok: AtomicU64,
    reloads_failed: AtomicU64,
}

impl Metrics {
    pub fn record_notification(&self, profile: &str, outcome: &'static str) {
        if outcome == "not_found" {
            self.unknown_profile.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.notifications
            .entry((profile.to_string(), outcome))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_payload(&self) {
        self.invalid_payload.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self, ok: bool) {
        let counter = if ok {
            &self.reloads_ok
        } else {
            &self.reloads_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_count(&self, profile: &str, outcome: &'static str) -> u64 {
        self.notifications
            .get(&(profile.to_string(), outcome))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn sorted_notifications(&self) -> Vec<(String, &'static str, u64)> {
        let mut out: Vec<_> = self
            .notifications
            .iter()
            .map(|e| (e.key().0.clone(), e.key().1, e.value().load(Ordering::Relaxed)))
            .collect();
        out.sort();
        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('"', r#"\""#)
        .replace('\n', r"\n")
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.metrics;
    let mut out = String::with_capacity(1024);

    writeln!(out, "# TYPE dingtalk_notifications counter").unwrap();
    writeln!(
        out,
        "# HELP dingtalk_notifications Notifications handled per profile and outcome"
    )
    .unwrap();
    for (profile, outcome, count) in metrics.sorted_notifications() {
        writeln!(
            out,
            "dingtalk_notifications_total{{profile=\"{}\",outcome=\"{}\"}} {}",
            escape_label(&profile),
            outcome,
            count
        )
        .unwrap();
    }

    writeln!(out, "# TYPE dingtalk_rejected_requests counter").unwrap();
    writeln!(
        out,
        "# HELP dingtalk_rejected_requests Requests rejected before dispatch"
    )
    .unwrap();
    writeln!(
        out,
        "dingtalk_rejected_requests_total{{reason=\"unknown_profile\"}} {}",
        metrics.unknown_profile.load(Ordering::Relaxed)
    )
    .unwrap();
    writeln!(
        out,
        "dingtalk_rejected_requests_total{{reason=\"invalid_payload\"}} {}",
        metrics.invalid_payload.load(Ordering::Relaxed)
    )
    .unwrap();

    writeln!(out, "# TYPE dingtalk_config_reloads counter").unwrap();
    writeln!(out, "# HELP dingtalk_config_reloads Profile configuration reloads").unwrap();
    writeln!(
        out,
        "dingtalk_config_reloads_total{{result=\"success\"}} {}",
        metrics.reloads_ok.load(Ordering::Relaxed)
    )
    .unwrap();
    writeln!(
        out,
        "dingtalk_config_reloads_total{{result=\"failure\"}} {}",
        metrics.reloads_failed.load(Ordering::Relaxed)
    )
    .unwrap();

    let table = state.dispatcher.profiles().snapshot().await;
    writeln!(out, "# TYPE dingtalk_profiles gauge").unwrap();
    writeln!(out, "# HELP dingtalk_profiles Number of configured profiles").unwrap();
    writeln!(out, "dingtalk_profiles {}", table.len()).unwrap();

    writeln!(out, "# EOF").unwrap();

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}
