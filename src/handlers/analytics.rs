use crate::{
    handlers::AppState,
    models::{ApiResponse, Stats},
};
use axum::{extract::State, Json};

pub async fn get_analytics(State(state): State<AppState>) -> Json<ApiResponse<Stats>> {
    let stats = state.analytics.get_stats().await;
    Json(ApiResponse::ok(stats))
}
