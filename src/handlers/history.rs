use crate::{
    error::SoulConnectError,
    handlers::{parse_service, parse_wallet, AppState},
    models::{ApiResponse, GenerationEntry},
};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub wallet_address: Option<String>,
    pub service_type: Option<String>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<GenerationEntry>>>, SoulConnectError> {
    let wallet = parse_wallet(query.wallet_address.as_deref())?;
    let service = query.service_type.as_deref().map(parse_service).transpose()?;

    let entries = state.history.list(wallet, service).await?;
    Ok(Json(ApiResponse::ok(entries)))
}
