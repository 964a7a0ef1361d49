//! HTTP server assembly and lifecycle.
//!
//! Builds the router with its middleware stack (request-id injection,
//! request tracing, timeout enforcement, bearer auth on the tenant
//! surface) and serves it with graceful shutdown: the listener stops
//! accepting, in-flight requests drain, then control returns to the
//! caller so it can stop the delivery pool and close the store.

use std::{future::Future, net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use ulid::Ulid;

use crate::{auth::auth_middleware, config::Config, handlers, AppState};

/// Builds the router with all routes and middleware.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let admin_routes = Router::new()
        .route(
            "/api/v1/applications",
            post(handlers::applications::create).get(handlers::applications::list),
        )
        .route(
            "/api/v1/applications/{id}",
            get(handlers::applications::get).delete(handlers::applications::delete),
        )
        .route("/api/v1/applications/{id}/rotate-key", post(handlers::applications::rotate_key))
        .with_state(state.clone());

    let tenant_routes = Router::new()
        .route(
            "/api/v1/endpoints",
            post(handlers::endpoints::create).get(handlers::endpoints::list),
        )
        .route(
            "/api/v1/endpoints/{id}",
            get(handlers::endpoints::get)
                .put(handlers::endpoints::update)
                .delete(handlers::endpoints::delete),
        )
        .route("/api/v1/endpoints/{id}/toggle", patch(handlers::endpoints::toggle))
        .route(
            "/api/v1/messages",
            post(handlers::messages::send).get(handlers::messages::list),
        )
        .route("/api/v1/messages/{id}", get(handlers::messages::get))
        .route("/api/v1/messages/{id}/retry", post(handlers::messages::retry))
        .route("/api/v1/deliveries/{id}", get(handlers::deliveries::get))
        .route("/api/v1/deliveries/{id}/attempts", get(handlers::deliveries::attempts))
        .route("/api/v1/stats", get(handlers::stats::stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(handlers::health::health))
        .with_state(state)
        .merge(admin_routes)
        .merge(tenant_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
}

/// Adds an `X-Request-Id` header to every response for log correlation.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Ulid::new().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves the API until the shutdown future resolves, then drains
/// in-flight requests.
///
/// # Errors
///
/// Returns error if the address cannot be bound or the server fails.
pub async fn start_server(
    state: AppState,
    config: &Config,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = create_router(state, config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped");
    Ok(())
}
