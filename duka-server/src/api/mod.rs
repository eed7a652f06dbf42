//! HTTP API
//!
//! | Path | Method | Module |
//! |------|--------|--------|
//! | /api/health | GET | health |
//! | /api/checkout | POST | checkout |
//! | /api/orders/{order_number} | GET | orders |
//! | /api/payments/stk-push | POST | payments |
//! | /api/payments/callback | POST | payments |
//! | /api/payments/status | GET | payments |

use axum::Router;
use http::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::core::ServerState;

pub mod checkout;
pub mod health;
pub mod orders;
pub mod payments;

/// Custom request ID generator
#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Build a router with all routes registered (no middleware, no state)
pub fn build_router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(checkout::router())
        .merge(orders::router())
        .merge(payments::router())
}

/// Build the fully configured application with all middleware
pub fn build_app() -> Router<ServerState> {
    build_router()
        // CORS - the storefront calls this API from the browser
        .layer(CorsLayer::permissive())
        // Trace - request tracing (logs at INFO level)
        .layer(TraceLayer::new_for_http())
        // Request ID - generate a unique ID for each request
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            XRequestId,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
}
