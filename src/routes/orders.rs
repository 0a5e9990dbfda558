//! Checkout, order history, back office fulfilment and the Midtrans
//! notification webhook.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::cart::price_cart;
use super::{created, ok, ApiResponse, ApiJson, ApiPath, ApiQuery, ValidJson};
use crate::auth::{AdminUser, Caller, CurrentUser};
use crate::domain::aggregates::{CourierChoice, Order, OrderError, OrderStatus, PaymentMethod, PaymentStatus};
use crate::error::{AppError, Result};
use crate::services::payment::{Notification, PaymentOutcome};
use crate::store::{OrderVersion, StoreError};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/order", get(list_my_orders).post(place_order))
        .route("/api/order/notification", post(payment_notification))
        .route("/api/order/:id", get(get_order))
        .route("/api/order/:id/cancel", post(cancel_order))
        .route("/api/admin/orders", get(list_all_orders))
        .route("/api/admin/orders/:id/status", put(update_status))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    /// Defaults to the customer's default address.
    pub address_id: Option<Uuid>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, message = "courier is required"))]
    pub courier: String,
    #[validate(length(min = 1, message = "service is required"))]
    pub service: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    #[validate(length(max = 100))]
    pub tracking_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationAck {
    pub order_id: String,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
}

fn order_not_found() -> AppError { AppError::NotFound("Order not found".into()) }

fn log_events(order: &mut Order) {
    for event in order.take_events() {
        event.log();
    }
}

/// Persists a payment transition made on `order`, failing when a concurrent
/// writer already moved the payment on.
async fn commit_payment(state: &AppState, order: &mut Order, expected: OrderVersion) -> Result<()> {
    if !state.store.record_payment(order, expected).await? {
        return Err(AppError::Conflict("Order payment was updated concurrently, reload and retry".into()));
    }
    log_events(order);
    Ok(())
}

async fn place_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Order>>)> {
    if user.cart.is_empty() {
        return Err(OrderError::NoItems.into());
    }
    let address = match req.address_id {
        Some(id) => user.address(id).ok_or_else(|| AppError::NotFound("Address not found".into()))?,
        None => user.default_address().ok_or_else(|| AppError::Unprocessable("Add a shipping address first".into()))?,
    }
    .clone();

    let view = price_cart(&state, &user.cart).await?;
    if let Some(line) = view.unavailable_lines().next() {
        let name = if line.name.is_empty() { line.product_id.to_string() } else { line.name.clone() };
        return Err(OrderError::Unavailable(vec![format!("{name}: {}", line.unavailable.as_deref().unwrap_or_default())]).into());
    }

    let quote = state
        .shipping
        .quote(&address.city_id, view.total_weight, &req.courier, &req.service)
        .await?
        .ok_or_else(|| AppError::Unprocessable(format!("{} {} does not deliver to this address", req.courier, req.service)))?;
    let courier = CourierChoice { code: req.courier.trim().to_lowercase(), service: req.service.trim().to_string(), etd: quote.etd };

    let mut order = Order::place(user.id, &view, address, Some(courier), quote.cost, req.payment_method)?;
    state.store.place_order(&order).await?;
    log_events(&mut order);
    let placed = OrderVersion::of(&order);

    if order.payment_method == PaymentMethod::Gateway {
        match state.payments.create_transaction(&order, &user).await {
            Ok(session) => {
                order.attach_payment_session(session.token, session.redirect_url);
                match state.store.save_order(&order, placed).await {
                    Ok(()) => {}
                    // A notification or cancellation already moved the order on.
                    Err(StoreError::Conflict(_)) => {
                        order = state.store.find_order(&order.id).await?.ok_or_else(order_not_found)?;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => {
                // Release the stock rather than leave an order nobody can pay.
                order.mark_payment_failed("payment session could not be created");
                state.store.record_payment(&order, placed).await?;
                log_events(&mut order);
                return Err(err.into());
            }
        }
    }

    Ok(created(order))
}

async fn list_my_orders(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<ApiResponse<Vec<Order>>>> {
    Ok(ok(state.store.list_orders_for_user(user.id).await?))
}

async fn get_order(State(state): State<AppState>, caller: Caller, ApiPath(id): ApiPath<String>) -> Result<Json<ApiResponse<Order>>> {
    let order = state.store.find_order(&id).await?.ok_or_else(order_not_found)?;
    if let Caller::Customer(user) = caller {
        if order.user_id != user.id {
            return Err(order_not_found());
        }
    }
    Ok(ok(order))
}

async fn cancel_order(State(state): State<AppState>, CurrentUser(user): CurrentUser, ApiPath(id): ApiPath<String>) -> Result<Json<ApiResponse<Order>>> {
    let mut order = state
        .store
        .find_order(&id)
        .await?
        .filter(|o| o.user_id == user.id)
        .ok_or_else(order_not_found)?;
    let before = OrderVersion::of(&order);
    order.cancel()?;
    commit_payment(&state, &mut order, before).await?;
    Ok(ok(order))
}

async fn list_all_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(filter): ApiQuery<OrderFilter>,
) -> Result<Json<ApiResponse<Vec<Order>>>> {
    Ok(ok(state.store.list_orders(filter.status).await?))
}

async fn update_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<String>,
    ValidJson(req): ValidJson<StatusUpdate>,
) -> Result<Json<ApiResponse<Order>>> {
    let mut order = state.store.find_order(&id).await?.ok_or_else(order_not_found)?;
    let before = OrderVersion::of(&order);
    order.advance(req.status, req.tracking_number)?;

    if before.payment_status == PaymentStatus::Pending && order.payment_status == PaymentStatus::Failed {
        commit_payment(&state, &mut order, before).await?;
    } else {
        state.store.save_order(&order, before).await?;
        log_events(&mut order);
    }
    Ok(ok(order))
}

/// Midtrans posts here on every transaction status change, possibly more
/// than once for the same change.
async fn payment_notification(State(state): State<AppState>, ApiJson(notification): ApiJson<Notification>) -> Result<Json<ApiResponse<NotificationAck>>> {
    if !state.payments.verify(&notification) {
        tracing::warn!(order_id = %notification.order_id, "payment notification with a bad signature");
        return Err(AppError::Unauthorized("Invalid signature".into()));
    }
    let mut order = state.store.find_order(&notification.order_id).await?.ok_or_else(order_not_found)?;
    let before = OrderVersion::of(&order);

    let changed = match notification.outcome() {
        PaymentOutcome::Paid => order.mark_paid(notification.transaction_id.clone()),
        PaymentOutcome::Failed(reason) => order.mark_payment_failed(reason),
        PaymentOutcome::Unchanged => false,
    };

    if changed {
        if state.store.record_payment(&order, before).await? {
            log_events(&mut order);
        } else {
            // Lost the race against another delivery; report what is stored.
            order = state.store.find_order(&notification.order_id).await?.ok_or_else(order_not_found)?;
        }
    } else {
        tracing::debug!(
            order_id = %order.id,
            transaction_status = %notification.transaction_status,
            payment_status = %order.payment_status,
            "payment notification left order unchanged"
        );
    }

    Ok(ok(NotificationAck { order_id: order.id, payment_status: order.payment_status, status: order.status }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    use crate::domain::aggregates::product::tests::plain_draft;
    use crate::domain::aggregates::{OrderStatus, PaymentStatus, Product};
    use crate::routes::test_support::{Harness, MIDTRANS_KEY};
    use crate::services::payment::Notification;
    use crate::store::{OrderVersion, Store, StoreError};

    async fn mock_upstreams(h: &Harness) {
        Mock::given(method("POST"))
            .and(path("/cost"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rajaongkir": {
                "status": { "code": 200, "description": "OK" },
                "results": [{ "code": "jne", "name": "JNE", "costs": [
                    { "service": "REG", "description": "Reguler", "cost": [{ "value": 18000, "etd": "2-3", "note": "" }] }
                ] }]
            } })))
            .mount(&h.upstream)
            .await;
        Mock::given(method("POST"))
            .and(path("/snap/v1/transactions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "token": "snap-token", "redirect_url": "https://pay.test/snap-token" })))
            .mount(&h.upstream)
            .await;
    }

    /// A customer with a default address and two bags of coffee in the cart.
    async fn shopper(h: &Harness) -> (String, Product) {
        let token = h.customer("ani@example.com").await;
        let kopi = Product::create(plain_draft(Uuid::now_v7())).unwrap();
        h.store.insert_product(&kopi).await.unwrap();
        let address = json!({
            "recipient": "Ani", "phone": "081234567890", "street": "Jl. Braga 10", "province_id": "9",
            "province": "Jawa Barat", "city_id": "23", "city": "Bandung", "postal_code": "40111"
        });
        h.call(Method::POST, "/api/user/addresses", Some(&token), Some(address)).await;
        h.call(Method::POST, "/api/cart", Some(&token), Some(json!({ "product_id": kopi.id, "quantity": 2 }))).await;
        (token, kopi)
    }

    async fn checkout(h: &Harness, token: &str, method_: &str) -> (StatusCode, Value) {
        h.call(Method::POST, "/api/order", Some(token), Some(json!({ "courier": "jne", "service": "REG", "payment_method": method_ }))).await
    }

    fn settlement(order_id: &str, gross_amount: &str) -> Value {
        let mut n = Notification {
            order_id: order_id.into(),
            status_code: "200".into(),
            gross_amount: gross_amount.into(),
            signature_key: String::new(),
            transaction_status: "settlement".into(),
            fraud_status: None,
            transaction_id: Some("tx-42".into()),
            payment_type: Some("qris".into()),
        };
        n.signature_key = n.expected_signature(MIDTRANS_KEY);
        json!({
            "order_id": n.order_id, "status_code": n.status_code, "gross_amount": n.gross_amount,
            "signature_key": n.signature_key, "transaction_status": n.transaction_status, "transaction_id": "tx-42"
        })
    }

    #[tokio::test]
    async fn test_empty_cart_cannot_be_ordered() {
        let h = Harness::start().await;
        let token = h.customer("kosong@example.com").await;
        let (status, body) = checkout(&h, &token, "gateway").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_checkout_recomputes_shipping_and_takes_stock() {
        let h = Harness::start().await;
        mock_upstreams(&h).await;
        let (token, kopi) = shopper(&h).await;

        let (status, body) = checkout(&h, &token, "gateway").await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["data"]["subtotal"], 170_000);
        assert_eq!(body["data"]["shipping_cost"], 18_000);
        assert_eq!(body["data"]["amount"], 188_000);
        assert_eq!(body["data"]["payment_token"], "snap-token");

        assert_eq!(h.store.find_product(kopi.id).await.unwrap().unwrap().stock, 8);
        let (_, cart) = h.call(Method::GET, "/api/cart", Some(&token), None).await;
        assert!(cart["data"]["lines"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settlement_is_applied_once() {
        let h = Harness::start().await;
        mock_upstreams(&h).await;
        let (token, _) = shopper(&h).await;
        let (_, body) = checkout(&h, &token, "gateway").await;
        let order_id = body["data"]["id"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let (status, body) = h.call(Method::POST, "/api/order/notification", None, Some(settlement(&order_id, "188000.00"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["payment_status"], "paid");
        }
        let order = h.store.find_order(&order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("tx-42"));

        // A late failure for an already settled payment changes nothing.
        let mut expired = settlement(&order_id, "188000.00");
        expired["transaction_status"] = json!("expire");
        let (status, body) = h.call(Method::POST, "/api/order/notification", None, Some(expired)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payment_status"], "paid");
    }

    #[tokio::test]
    async fn test_notification_checks_signature_and_order() {
        let h = Harness::start().await;
        let mut forged = settlement("ORD-20240101-AAAAAAAAAA", "1000.00");
        forged["signature_key"] = json!("deadbeef");
        let (status, _) = h.call(Method::POST, "/api/order/notification", None, Some(forged)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = h.call(Method::POST, "/api/order/notification", None, Some(settlement("ORD-20240101-AAAAAAAAAA", "1000.00"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_returns_stock() {
        let h = Harness::start().await;
        mock_upstreams(&h).await;
        let (token, kopi) = shopper(&h).await;
        let (_, body) = checkout(&h, &token, "gateway").await;
        let order_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = h.call(Method::POST, &format!("/api/order/{order_id}/cancel"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "failed");
        assert_eq!(h.store.find_product(kopi.id).await.unwrap().unwrap().stock, 10);

        let (status, _) = h.call(Method::POST, &format!("/api/order/{order_id}/cancel"), Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cod_fulfilment_flow() {
        let h = Harness::start().await;
        mock_upstreams(&h).await;
        let (token, _) = shopper(&h).await;
        let (status, body) = checkout(&h, &token, "cod").await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"]["payment_token"].is_null());
        let order_id = body["data"]["id"].as_str().unwrap().to_string();
        let admin = h.admin_token();
        let uri = format!("/api/admin/orders/{order_id}/status");

        let (status, _) = h.call(Method::PUT, &uri, Some(&admin), Some(json!({ "status": "packing" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = h.call(Method::PUT, &uri, Some(&admin), Some(json!({ "status": "in_transit" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = h.call(Method::PUT, &uri, Some(&admin), Some(json!({ "status": "in_transit", "tracking_number": "JNE123" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = h.call(Method::PUT, &uri, Some(&admin), Some(json!({ "status": "delivered" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payment_status"], "paid");
        assert_eq!(body["data"]["tracking_number"], "JNE123");

        let (_, body) = h.call(Method::GET, "/api/admin/orders?status=delivered", Some(&admin), None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_orders_are_private_to_their_owner() {
        let h = Harness::start().await;
        mock_upstreams(&h).await;
        let (token, _) = shopper(&h).await;
        let (_, body) = checkout(&h, &token, "gateway").await;
        let order_id = body["data"]["id"].as_str().unwrap().to_string();

        let stranger = h.customer("orang@example.com").await;
        let (status, _) = h.call(Method::GET, &format!("/api/order/{order_id}"), Some(&stranger), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = h.call(Method::GET, &format!("/api/order/{order_id}"), Some(&h.admin_token()), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, mine) = h.call(Method::GET, "/api/order", Some(&token), None).await;
        assert_eq!(mine["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_card_capture_follows_fraud_status() {
        let h = Harness::start().await;
        mock_upstreams(&h).await;
        let (token, kopi) = shopper(&h).await;
        let (_, body) = checkout(&h, &token, "gateway").await;
        let order_id = body["data"]["id"].as_str().unwrap().to_string();

        let capture = |fraud: &str| {
            let mut n = settlement(&order_id, "188000.00");
            n["transaction_status"] = json!("capture");
            n["fraud_status"] = json!(fraud);
            n
        };

        let (status, body) = h.call(Method::POST, "/api/order/notification", None, Some(capture("challenge"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payment_status"], "pending");
        assert_eq!(body["data"]["status"], "pending");

        let (_, body) = h.call(Method::POST, "/api/order/notification", None, Some(capture("deny"))).await;
        assert_eq!(body["data"]["payment_status"], "failed");
        assert_eq!(body["data"]["status"], "failed");
        assert_eq!(h.store.find_product(kopi.id).await.unwrap().unwrap().stock, 10);

        // A second order is accepted by fraud screening and becomes paid.
        h.call(Method::POST, "/api/cart", Some(&token), Some(json!({ "product_id": kopi.id, "quantity": 1 }))).await;
        let (_, body) = checkout(&h, &token, "gateway").await;
        let second = body["data"]["id"].as_str().unwrap().to_string();
        let mut accepted = settlement(&second, "103000.00");
        accepted["transaction_status"] = json!("capture");
        accepted["fraud_status"] = json!("accept");
        let (status, body) = h.call(Method::POST, "/api/order/notification", None, Some(accepted)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payment_status"], "paid");
        assert_eq!(body["data"]["status"], "paid");
    }

    #[tokio::test]
    async fn test_stale_status_update_does_not_overwrite_a_cancel() {
        let h = Harness::start().await;
        mock_upstreams(&h).await;
        let (token, kopi) = shopper(&h).await;
        let (_, body) = checkout(&h, &token, "cod").await;
        let order_id = body["data"]["id"].as_str().unwrap().to_string();

        let mut stale = h.store.find_order(&order_id).await.unwrap().unwrap();
        let loaded = OrderVersion::of(&stale);
        stale.advance(OrderStatus::Packing, None).unwrap();

        let (status, _) = h.call(Method::POST, &format!("/api/order/{order_id}/cancel"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(h.store.save_order(&stale, loaded).await, Err(StoreError::Conflict(_))));

        let order = h.store.find_order(&order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(h.store.find_product(kopi.id).await.unwrap().unwrap().stock, 10);

        let (status, body) = h
            .call(Method::PUT, &format!("/api/admin/orders/{order_id}/status"), Some(&h.admin_token()), Some(json!({ "status": "packing" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_malformed_webhook_body_uses_the_error_envelope() {
        let h = Harness::start().await;
        let (status, body) = h.call(Method::POST, "/api/order/notification", None, Some(json!({ "order_id": 7 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let (status, body) = h.call(Method::GET, "/api/admin/orders?status=lost", Some(&h.admin_token()), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
