//! Domain events

#[derive(Clone, Debug, PartialEq)]
pub enum DomainEvent {
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrderEvent {
    Placed { order_id: String, user_id: String, amount: i64 },
    Paid { order_id: String, transaction_id: Option<String> },
    PaymentFailed { order_id: String, reason: String },
    StatusChanged { order_id: String, from: &'static str, to: &'static str },
}

impl DomainEvent {
    /// Emits the event on the tracing pipeline.
    pub fn log(&self) {
        match self {
            DomainEvent::Order(OrderEvent::Placed { order_id, user_id, amount }) => {
                tracing::info!(%order_id, %user_id, amount, "order placed");
            }
            DomainEvent::Order(OrderEvent::Paid { order_id, transaction_id }) => {
                tracing::info!(%order_id, transaction_id = transaction_id.as_deref().unwrap_or("-"), "order paid");
            }
            DomainEvent::Order(OrderEvent::PaymentFailed { order_id, reason }) => {
                tracing::warn!(%order_id, %reason, "order payment failed");
            }
            DomainEvent::Order(OrderEvent::StatusChanged { order_id, from, to }) => {
                tracing::info!(%order_id, from, to, "order status changed");
            }
        }
    }
}
