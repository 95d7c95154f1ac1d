//! The JSON payload shape sent to HTTP webhook receivers (spec §4.8).

use crate::alert::Alert;
use crate::types::LabelSet;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAlert {
    pub status: &'static str,
    pub labels: LabelSet,
    pub annotations: LabelSet,
    #[serde(rename = "startsAt")]
    pub starts_at: i64,
    #[serde(rename = "endsAt")]
    pub ends_at: i64,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub receiver: String,
    pub status: &'static str,
    pub alerts: Vec<WebhookAlert>,
}

impl WebhookPayload {
    pub fn from_alerts(receiver: &str, alerts: &[Alert]) -> Self {
        let rendered: Vec<WebhookAlert> = alerts
            .iter()
            .map(|a| WebhookAlert {
                status: if a.is_resolved() { "resolved" } else { "firing" },
                labels: a.labels.clone(),
                annotations: a.annotations.clone(),
                starts_at: a.starts_at,
                ends_at: a.ends_at,
                generator_url: a.generator_url.clone(),
            })
            .collect();
        let status = if rendered.iter().all(|a| a.status == "resolved") { "resolved" } else { "firing" };
        Self { receiver: receiver.to_string(), status, alerts: rendered }
    }
}
