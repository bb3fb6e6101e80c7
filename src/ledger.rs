//! Hand-off of a submitted order to the outside world.
//!
//! The draft is converted once into an [`OrderRecord`], the shape the
//! ledger service persists and prints. Payment fields default to unpaid
//! cash since the voice flow never takes payment. The same record also
//! feeds the human-readable summary for the messaging channel.

use crate::order::{DeliveryMethod, OrderDraft};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Address marker for orders picked up at the counter.
pub const COUNTER_PICKUP: &str = "counter pickup";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Order submission request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Order rejected: {status} - {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecordLine {
    pub name: String,
    pub variation: String,
    pub unit_price: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub placed_at: DateTime<Utc>,
    pub customer_name: String,
    pub customer_phone: String,
    pub items: Vec<OrderRecordLine>,
    pub total: f64,
    pub payment_method: String,
    pub paid: bool,
    pub delivery: bool,
    pub delivery_address: String,
}

impl OrderRecord {
    pub fn from_draft(draft: &OrderDraft) -> Self {
        let delivery = matches!(draft.delivery_method, Some(DeliveryMethod::Delivery));
        let delivery_address = if delivery {
            draft.delivery_address.clone().unwrap_or_default()
        } else {
            COUNTER_PICKUP.to_string()
        };
        OrderRecord {
            id: format!("ORD-{}", Uuid::new_v4()),
            placed_at: Utc::now(),
            customer_name: draft.customer_name.clone(),
            customer_phone: draft.customer_phone.clone(),
            items: draft
                .lines()
                .iter()
                .map(|line| OrderRecordLine {
                    name: line.item_name.clone(),
                    variation: line.variation_label.clone(),
                    unit_price: line.unit_price,
                    quantity: line.quantity,
                })
                .collect(),
            total: draft.total(),
            payment_method: "cash".to_string(),
            paid: false,
            delivery,
            delivery_address,
        }
    }

    /// Human-readable summary for the outbound messaging channel.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "Order {} for {} ({})",
            self.id, self.customer_name, self.customer_phone
        ));
        for item in &self.items {
            let variation = if item.variation.is_empty() {
                String::new()
            } else {
                format!(" ({})", item.variation)
            };
            lines.push(format!(
                "  {}x {}{} - ${:.2}",
                item.quantity,
                item.name,
                variation,
                item.unit_price * item.quantity as f64
            ));
        }
        lines.push(format!("Total: ${:.2} ({}, unpaid)", self.total, self.payment_method));
        if self.delivery {
            lines.push(format!("Deliver to: {}", self.delivery_address));
        } else {
            lines.push("Pickup at counter".to_string());
        }
        lines.join("\n")
    }
}

/// Where a submitted order goes. The session controller only knows this
/// seam, so tests swap in a recording implementation.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn submit(&self, record: &OrderRecord) -> Result<(), LedgerError>;
}

/// Summary hand-off for the messaging channel (receipt printer, SMS, ...).
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn deliver(&self, summary: &str) -> Result<(), LedgerError>;
}

/// POSTs each record as JSON to the ledger service.
pub struct HttpOrderLedger {
    client: Client,
    endpoint: Url,
}

impl HttpOrderLedger {
    pub fn new(endpoint: Url) -> Result<Self, LedgerError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(HttpOrderLedger { client, endpoint })
    }
}

#[async_trait]
impl OrderLedger for HttpOrderLedger {
    async fn submit(&self, record: &OrderRecord) -> Result<(), LedgerError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(record)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        log::info!("📤 Order {} accepted by ledger", record.id);
        Ok(())
    }
}

/// Fallback ledger for runs without a ledger service; logs the record.
pub struct LogLedger;

#[async_trait]
impl OrderLedger for LogLedger {
    async fn submit(&self, record: &OrderRecord) -> Result<(), LedgerError> {
        match serde_json::to_string_pretty(record) {
            Ok(json) => log::info!("📤 Order record (no ledger configured):\n{json}"),
            Err(e) => log::warn!("Failed to render order record: {e}"),
        }
        Ok(())
    }
}

/// Fallback notifier; logs the summary.
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn deliver(&self, summary: &str) -> Result<(), LedgerError> {
        log::info!("📨 Order summary:\n{summary}");
        Ok(())
    }
}
