//! Operator webhook. Delivery is fire-and-forget like every other sink;
//! a failed POST is logged and never retried.

use std::time::Duration;

use ledger::events::event_payload;
use ledger::{LedgerEvent, NotificationSink};
use log::warn;
use reqwest::Client;

const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .user_agent("storefrontd/0.1")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self { client, url }
    }
}

impl NotificationSink for WebhookSink {
    fn deliver(&self, event: &LedgerEvent) {
        let request = self.client.post(&self.url).json(&event_payload(event));
        let name = event.name();
        tokio::spawn(async move {
            if let Err(err) = request.send().await {
                warn!("[notify] webhook delivery of {name} failed: {err}");
            }
        });
    }
}
