//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::cart::{CartView, PricedLine};
use crate::domain::aggregates::user::Address;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::UnknownVariant;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    /// Human readable order number, also used as the payment gateway order id.
    pub id: String,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub shipping_address: Address,
    pub courier: Option<CourierChoice>,
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub amount: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_token: Option<String>,
    pub payment_url: Option<String>,
    pub transaction_id: Option<String>,
    pub tracking_number: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

/// Snapshot of a cart line at purchase time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub option_id: Option<Uuid>,
    pub name: String,
    pub variant_name: Option<String>,
    pub option_name: Option<String>,
    pub sku: Option<String>,
    pub image: Option<String>,
    pub unit_price: i64,
    pub weight: u32,
    pub quantity: u32,
    pub line_total: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierChoice { pub code: String, pub service: String, pub etd: Option<String> }

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self { $(Self::$variant => $s),+ }
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s { $($s => Ok(Self::$variant),)+ other => Err(UnknownVariant(other.to_string())) }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
        }
    };
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { #[default] Gateway, Cod }
string_enum!(PaymentMethod { Gateway => "gateway", Cod => "cod" });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed }
string_enum!(PaymentStatus { Pending => "pending", Paid => "paid", Failed => "failed" });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Paid, Packing, InTransit, Delivered, Failed }
string_enum!(OrderStatus { Pending => "pending", Paid => "paid", Packing => "packing", InTransit => "in_transit", Delivered => "delivered", Failed => "failed" });

impl Order {
    pub fn place(
        user_id: Uuid,
        cart: &CartView,
        shipping_address: Address,
        courier: Option<CourierChoice>,
        shipping_cost: i64,
        payment_method: PaymentMethod,
    ) -> Result<Self, OrderError> {
        if cart.lines.is_empty() { return Err(OrderError::NoItems); }
        let unavailable: Vec<String> = cart.unavailable_lines()
            .map(|l| format!("{}: {}", if l.name.is_empty() { l.product_id.to_string() } else { l.name.clone() }, l.unavailable.as_deref().unwrap_or_default()))
            .collect();
        if !unavailable.is_empty() { return Err(OrderError::Unavailable(unavailable)); }

        let items: Vec<OrderItem> = cart.lines.iter().map(OrderItem::from).collect();
        let subtotal = items.iter().fold(0i64, |total, i| total.saturating_add(i.line_total));
        let now = Utc::now();
        let mut order = Self {
            id: order_number(now), user_id, items, shipping_address, courier, subtotal, shipping_cost,
            amount: subtotal.saturating_add(shipping_cost), payment_method, payment_status: PaymentStatus::Pending,
            payment_token: None, payment_url: None, transaction_id: None, tracking_number: None,
            status: OrderStatus::Pending, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: order.id.clone(), user_id: user_id.to_string(), amount: order.amount }));
        Ok(order)
    }

    pub fn item_count(&self) -> u32 { self.items.iter().map(|i| i.quantity).sum() }

    pub fn attach_payment_session(&mut self, token: String, redirect_url: String) {
        self.payment_token = Some(token);
        self.payment_url = Some(redirect_url);
        self.touch();
    }

    /// Settles a pending payment. Returns false when the payment was already
    /// settled or failed, which makes repeated gateway notifications harmless.
    pub fn mark_paid(&mut self, transaction_id: Option<String>) -> bool {
        if self.payment_status != PaymentStatus::Pending { return false; }
        self.payment_status = PaymentStatus::Paid;
        if self.status == OrderStatus::Pending { self.status = OrderStatus::Paid; }
        self.transaction_id = transaction_id.or(self.transaction_id.take());
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: self.id.clone(), transaction_id: self.transaction_id.clone() }));
        true
    }

    /// Fails a pending payment. Stock held by the order must be returned by
    /// the caller when this returns true.
    pub fn mark_payment_failed(&mut self, reason: impl Into<String>) -> bool {
        if self.payment_status != PaymentStatus::Pending { return false; }
        self.payment_status = PaymentStatus::Failed;
        self.status = OrderStatus::Failed;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed { order_id: self.id.clone(), reason: reason.into() }));
        true
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending { return Err(OrderError::CannotCancel); }
        if !self.mark_payment_failed("cancelled by customer") { return Err(OrderError::CannotCancel); }
        Ok(())
    }

    /// Moves the order along its fulfilment lifecycle.
    pub fn advance(&mut self, to: OrderStatus, tracking_number: Option<String>) -> Result<(), OrderError> {
        let from = self.status;
        let tracking_number = tracking_number.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        match (from, to) {
            (OrderStatus::Paid, OrderStatus::Packing) => {}
            (OrderStatus::Pending, OrderStatus::Packing) if self.payment_method == PaymentMethod::Cod => {}
            (OrderStatus::Packing, OrderStatus::InTransit) | (OrderStatus::InTransit, OrderStatus::InTransit) => {
                let tracking = tracking_number.ok_or(OrderError::TrackingRequired)?;
                self.tracking_number = Some(tracking);
            }
            (OrderStatus::InTransit, OrderStatus::Delivered) => {
                if self.payment_method == PaymentMethod::Cod { self.payment_status = PaymentStatus::Paid; }
            }
            (OrderStatus::Pending, OrderStatus::Failed) => {
                self.mark_payment_failed("cancelled by admin");
                return Ok(());
            }
            _ => return Err(OrderError::InvalidTransition { from, to }),
        }
        self.status = to;
        self.touch();
        if from != to {
            self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id.clone(), from: from.as_str(), to: to.as_str() }));
        }
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

impl From<&PricedLine> for OrderItem {
    fn from(l: &PricedLine) -> Self {
        Self {
            product_id: l.product_id, variant_id: l.variant_id, option_id: l.option_id, name: l.name.clone(),
            variant_name: l.variant_name.clone(), option_name: l.option_name.clone(), sku: l.sku.clone(), image: l.image.clone(),
            unit_price: l.unit_price, weight: l.weight, quantity: l.quantity, line_total: l.line_total,
        }
    }
}

fn order_number(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", now.format("%Y%m%d"), random[..10].to_uppercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError { NoItems, Unavailable(Vec<String>), InvalidTransition { from: OrderStatus, to: OrderStatus }, TrackingRequired, CannotCancel }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "Cart is empty"),
            Self::Unavailable(lines) => write!(f, "Some items are unavailable: {}", lines.join("; ")),
            Self::InvalidTransition { from, to } => write!(f, "Cannot move order from {from} to {to}"),
            Self::TrackingRequired => write!(f, "A tracking number is required to ship the order"),
            Self::CannotCancel => write!(f, "Only unpaid pending orders can be cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use super::*;
    use crate::domain::aggregates::cart::Cart;
    use crate::domain::aggregates::product::{tests::plain_draft, Product};

    fn address() -> Address {
        Address {
            id: Uuid::now_v7(), label: None, recipient: "Budi".into(), phone: "0812000000".into(), street: "Jl. Sudirman 5".into(),
            province_id: "6".into(), province: "DKI Jakarta".into(), city_id: "152".into(), city: "Jakarta Pusat".into(),
            postal_code: "10110".into(), is_default: true,
        }
    }

    fn placed(method: PaymentMethod) -> Order {
        let kopi = Product::create(plain_draft(Uuid::now_v7())).unwrap();
        let mut cart = Cart::default();
        cart.add(kopi.select(None, None).unwrap(), 2).unwrap();
        let view = cart.price(&HashMap::from([(kopi.id, kopi)]));
        Order::place(Uuid::now_v7(), &view, address(), None, 18_000, method).unwrap()
    }

    #[test]
    fn test_empty_cart_is_rejected() {
        let view = Cart::default().price(&HashMap::new());
        let err = Order::place(Uuid::now_v7(), &view, address(), None, 0, PaymentMethod::Gateway).unwrap_err();
        assert_eq!(err, OrderError::NoItems);
    }

    #[test]
    fn test_place_computes_amount_and_raises_event() {
        let mut order = placed(PaymentMethod::Gateway);
        assert_eq!(order.subtotal, 170_000);
        assert_eq!(order.amount, 188_000);
        assert!(order.id.starts_with("ORD-"));
        let events = order.take_events();
        assert!(matches!(events.as_slice(), [DomainEvent::Order(OrderEvent::Placed { amount: 188_000, .. })]));
    }

    #[test]
    fn test_mark_paid_applies_once() {
        let mut order = placed(PaymentMethod::Gateway);
        assert!(order.mark_paid(Some("tx-1".into())));
        assert!(!order.mark_paid(Some("tx-2".into())));
        assert!(!order.mark_payment_failed("expire"));
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("tx-1"));
    }

    #[test]
    fn test_fulfilment_workflow() {
        let mut order = placed(PaymentMethod::Gateway);
        assert!(matches!(order.advance(OrderStatus::Packing, None), Err(OrderError::InvalidTransition { .. })));
        order.mark_paid(None);
        order.advance(OrderStatus::Packing, None).unwrap();
        assert_eq!(order.advance(OrderStatus::InTransit, Some("  ".into())).unwrap_err(), OrderError::TrackingRequired);
        order.advance(OrderStatus::InTransit, Some("JNE123".into())).unwrap();
        order.advance(OrderStatus::Delivered, None).unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.tracking_number.as_deref(), Some("JNE123"));
    }

    #[test]
    fn test_cod_is_paid_on_delivery() {
        let mut order = placed(PaymentMethod::Cod);
        order.advance(OrderStatus::Packing, None).unwrap();
        order.advance(OrderStatus::InTransit, Some("SICEPAT9".into())).unwrap();
        order.advance(OrderStatus::Delivered, None).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_cancel_only_while_pending() {
        let mut order = placed(PaymentMethod::Gateway);
        order.cancel().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(order.cancel().unwrap_err(), OrderError::CannotCancel);

        let mut paid = placed(PaymentMethod::Gateway);
        paid.mark_paid(None);
        assert_eq!(paid.cancel().unwrap_err(), OrderError::CannotCancel);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!("in_transit".parse::<OrderStatus>().unwrap(), OrderStatus::InTransit);
        assert_eq!(serde_json::to_value(OrderStatus::InTransit).unwrap(), "in_transit");
        assert!("shipped".parse::<OrderStatus>().is_err());
    }
}
