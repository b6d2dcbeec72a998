#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use order_service::config::ReconcilerConfig;
use order_service::middleware::user::{
    USER_EMAIL_HEADER, USER_ID_HEADER, USER_NAME_HEADER, USER_PHONE_HEADER,
};
use order_service::models::{Variant, Voucher, SCOPE_BRAND, SCOPE_TOTAL};
use order_service::services::{InMemoryStore, InvoiceReconciler, MockInvoiceGateway};
use order_service::settlement::{InvoiceSettings, SettlementCoordinator};
use order_service::{build_router, AppState};
use secrecy::Secret;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const CALLBACK_TOKEN: &str = "test-callback-token";

/// In-process application over the in-memory store and a mock invoice provider.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub invoices: Arc<MockInvoiceGateway>,
    pub coordinator: SettlementCoordinator,
    pub user_id: Uuid,
}

impl TestApp {
    pub fn spawn() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let invoices = Arc::new(MockInvoiceGateway::new());
        let coordinator = SettlementCoordinator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            invoices.clone(),
            InvoiceSettings::default(),
        );
        let state = AppState::new(
            coordinator.clone(),
            Secret::new(CALLBACK_TOKEN.to_string()),
        );

        TestApp {
            router: build_router(state),
            store,
            invoices,
            coordinator,
            user_id: Uuid::new_v4(),
        }
    }

    pub fn reconciler(&self, interval_seconds: u64) -> InvoiceReconciler {
        self.reconciler_with_batch(interval_seconds, 20)
    }

    pub fn reconciler_with_batch(&self, interval_seconds: u64, batch_size: i64) -> InvoiceReconciler {
        InvoiceReconciler::new(
            ReconcilerConfig {
                enabled: true,
                interval_seconds,
                batch_size,
                ..ReconcilerConfig::default()
            },
            self.coordinator.clone(),
        )
    }

    pub async fn seed_variant(&self, brand_id: Uuid, price: i64) -> Variant {
        let variant = Variant {
            variant_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            brand_id,
            product_name: format!("Item {}", price),
            price,
            stock: 100,
            is_active: true,
        };
        self.store.add_variant(variant.clone()).await;
        variant
    }

    pub async fn seed_brand_voucher(&self, brand_id: Uuid, is_percent: bool, value: i64) -> Voucher {
        self.seed_voucher(SCOPE_BRAND, Some(brand_id), is_percent, value, 5)
            .await
    }

    pub async fn seed_order_voucher(&self, is_percent: bool, value: i64) -> Voucher {
        self.seed_voucher(SCOPE_TOTAL, None, is_percent, value, 5).await
    }

    pub async fn seed_voucher(
        &self,
        scope: &str,
        brand_id: Option<Uuid>,
        is_percent: bool,
        value: i64,
        stock: i32,
    ) -> Voucher {
        let voucher = Voucher {
            voucher_id: Uuid::new_v4(),
            scope: scope.to_string(),
            name: "Promo".to_string(),
            code: Uuid::new_v4().to_string(),
            brand_id,
            is_percent,
            value,
            stock,
            is_active: true,
            effective_utc: Utc::now() - Duration::days(1),
            expired_utc: Some(Utc::now() + Duration::days(30)),
        };
        self.store.add_voucher(voucher.clone()).await;
        voucher
    }

    /// Checkout body for `(variant, quantity)` lines.
    pub fn checkout_body(lines: &[(&Variant, i32)], voucher_id: Option<Uuid>) -> Value {
        serde_json::json!({
            "receiver": "Ayu Lestari",
            "phone_number": "+628123456789",
            "city": "Bandung",
            "postal_code": "40115",
            "address": "Jl. Braga 1",
            "voucher_id": voucher_id,
            "items": lines
                .iter()
                .map(|(variant, quantity)| serde_json::json!({
                    "variant_id": variant.variant_id,
                    "quantity": quantity,
                }))
                .collect::<Vec<_>>(),
        })
    }

    pub async fn checkout(&self, lines: &[(&Variant, i32)], voucher_id: Option<Uuid>) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            "/orders",
            Some(Self::checkout_body(lines, voucher_id)),
        )
        .await
    }

    /// Sends a request as this app's user.
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send_as(self.user_id, method, uri, body).await
    }

    pub async fn send_as(
        &self,
        user_id: Uuid,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.call(user_request(user_id, method, uri, body)).await
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        call(self.router.clone(), request).await
    }
}

/// Builds a JSON request carrying the user headers the gateway would set.
pub fn user_request(user_id: Uuid, method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header(USER_ID_HEADER, user_id.to_string())
        .header(USER_NAME_HEADER, "Ayu Lestari")
        .header(USER_EMAIL_HEADER, "ayu@example.com")
        .header(USER_PHONE_HEADER, "+628123456789")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap()
}

/// POSTs `body` from a task that owns its own router handle.
pub async fn post_json(router: Router, user_id: Uuid, uri: &str, body: Value) -> StatusCode {
    call(router, user_request(user_id, Method::POST, uri, Some(body)))
        .await
        .0
}

pub async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

/// Sum of the `total` fields of an order's details.
pub fn detail_totals(order: &Value) -> i64 {
    order["order_details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["total"].as_i64().unwrap())
        .sum()
}
