//! Midtrans Snap client and payment notification handling.

use std::sync::Arc;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::instrument;

use crate::config::MidtransConfig;
use crate::domain::aggregates::{Order, User};

/// Snap rejects item names longer than this.
const MAX_ITEM_NAME: usize = 50;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Midtrans rejected the transaction ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Snap session the shopper is redirected to.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapSession {
    pub token: String,
    pub redirect_url: String,
}

#[derive(Serialize)]
struct SnapRequest<'a> {
    transaction_details: TransactionDetails<'a>,
    item_details: Vec<ItemDetail>,
    customer_details: CustomerDetails<'a>,
}

#[derive(Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Serialize)]
struct ItemDetail {
    id: String,
    price: i64,
    quantity: u32,
    name: String,
}

#[derive(Serialize)]
struct CustomerDetails<'a> {
    first_name: &'a str,
    email: &'a str,
    phone: &'a str,
    shipping_address: ShippingAddress<'a>,
}

#[derive(Serialize)]
struct ShippingAddress<'a> {
    first_name: &'a str,
    phone: &'a str,
    address: &'a str,
    city: &'a str,
    postal_code: &'a str,
    country_code: &'static str,
}

#[derive(Deserialize)]
struct SnapErrorBody {
    #[serde(default)]
    error_messages: Vec<String>,
}

#[derive(Clone)]
pub struct MidtransClient {
    inner: Arc<MidtransClientInner>,
}

struct MidtransClientInner {
    client: Client,
    server_key: SecretString,
    snap_url: String,
}

impl MidtransClient {
    pub fn new(config: &MidtransConfig) -> Result<Self, PaymentError> {
        Ok(Self {
            inner: Arc::new(MidtransClientInner {
                client: super::http_client()?,
                server_key: config.server_key.clone(),
                snap_url: config.snap_url.clone(),
            }),
        })
    }

    /// Opens a Snap transaction for a freshly placed order. Shipping is sent
    /// as its own line so item prices add up to the gross amount.
    #[instrument(skip_all, fields(order_id = %order.id, amount = order.amount))]
    pub async fn create_transaction(&self, order: &Order, customer: &User) -> Result<SnapSession, PaymentError> {
        let mut items: Vec<ItemDetail> = order
            .items
            .iter()
            .map(|item| {
                let name = match &item.option_name {
                    Some(option) => format!("{} ({option})", item.name),
                    None => item.name.clone(),
                };
                ItemDetail {
                    id: item.option_id.unwrap_or(item.product_id).to_string(),
                    price: item.unit_price,
                    quantity: item.quantity,
                    name: name.chars().take(MAX_ITEM_NAME).collect(),
                }
            })
            .collect();
        if order.shipping_cost > 0 {
            let name = match &order.courier {
                Some(c) => format!("Shipping {} {}", c.code.to_uppercase(), c.service),
                None => "Shipping".to_string(),
            };
            items.push(ItemDetail { id: "SHIPPING".into(), price: order.shipping_cost, quantity: 1, name });
        }

        let address = &order.shipping_address;
        let body = SnapRequest {
            transaction_details: TransactionDetails { order_id: &order.id, gross_amount: order.amount },
            item_details: items,
            customer_details: CustomerDetails {
                first_name: &customer.name,
                email: customer.email.as_str(),
                phone: customer.phone.as_deref().unwrap_or(&address.phone),
                shipping_address: ShippingAddress {
                    first_name: &address.recipient,
                    phone: &address.phone,
                    address: &address.street,
                    city: &address.city,
                    postal_code: &address.postal_code,
                    country_code: "IDN",
                },
            },
        };

        let response = self
            .inner
            .client
            .post(&self.inner.snap_url)
            .basic_auth(self.inner.server_key.expose_secret(), None::<&str>)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<SnapErrorBody>()
                .await
                .map(|b| b.error_messages.join("; "))
                .unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %message, "Snap transaction rejected");
            return Err(PaymentError::Rejected { status: status.as_u16(), message });
        }
        Ok(response.json().await?)
    }

    pub fn verify(&self, notification: &Notification) -> bool {
        notification.verify_signature(self.inner.server_key.expose_secret())
    }
}

/// Body of the HTTP notification Midtrans posts on every status change.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed(String),
    /// Still in progress, or a status that needs no action.
    Unchanged,
}

impl Notification {
    /// `SHA512(order_id + status_code + gross_amount + server_key)`, hex encoded.
    pub fn expected_signature(&self, server_key: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(self.order_id.as_bytes());
        hasher.update(self.status_code.as_bytes());
        hasher.update(self.gross_amount.as_bytes());
        hasher.update(server_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_signature(&self, server_key: &str) -> bool {
        let expected = self.expected_signature(server_key);
        let provided = self.signature_key.trim().to_ascii_lowercase();
        expected.len() == provided.len() && expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    pub fn outcome(&self) -> PaymentOutcome {
        match self.transaction_status.as_str() {
            "settlement" => PaymentOutcome::Paid,
            "capture" => match self.fraud_status.as_deref() {
                None | Some("accept") => PaymentOutcome::Paid,
                Some("deny") => PaymentOutcome::Failed("fraud deny".to_string()),
                Some(_) => PaymentOutcome::Unchanged,
            },
            status @ ("deny" | "cancel" | "expire" | "failure") => PaymentOutcome::Failed(status.to_string()),
            _ => PaymentOutcome::Unchanged,
        }
    }
}
