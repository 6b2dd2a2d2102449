use crate::{
    handlers::*,
    middleware::{rate_limit_middleware, RateLimiter},
};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

pub fn build_router(state: AppState, limiter: RateLimiter) -> Router {
    // Generation spends money on the provider side, so only it is rate limited.
    let generation = Router::new()
        .route("/generate/bio", post(generate_bio))
        .route("/generate/date-ideas", post(generate_date_ideas))
        .route_layer(axum_middleware::from_fn_with_state(limiter, rate_limit_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/analytics", get(get_analytics))
        .route("/payment-config", get(payment_config))
        .route("/payment-verify", post(verify_payment))
        .route("/credits", get(get_credits))
        .route("/history", get(get_history))
        .route("/user", post(upsert_user).get(get_user).delete(delete_user))
        .merge(generation)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)))
        .layer(CorsLayer::permissive())
}
