use crate::{
    error::SoulConnectError,
    handlers::{json_body, parse_wallet, AppState, WalletQuery},
    models::{ApiResponse, PreferencesPatch, ProfilePatch, UserRecord},
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpsertUserBody {
    pub wallet_address: Option<String>,
    pub profile_data: Option<ProfilePatch>,
    pub preferences: Option<PreferencesPatch>,
}

pub async fn upsert_user(
    State(state): State<AppState>,
    payload: Result<Json<UpsertUserBody>, JsonRejection>,
) -> Result<Json<ApiResponse<UserRecord>>, SoulConnectError> {
    let body = json_body(payload)?;
    let wallet = parse_wallet(body.wallet_address.as_deref())?;

    let upserted = state.users.upsert(wallet, body.profile_data, body.preferences).await?;
    let message = if upserted.created {
        state.analytics.record_new_user().await;
        "User created successfully"
    } else {
        "User updated successfully"
    };

    Ok(Json(ApiResponse::ok(upserted.user).with_message(message)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<ApiResponse<UserRecord>>, SoulConnectError> {
    let wallet = parse_wallet(query.wallet_address.as_deref())?;

    let user = state
        .users
        .get(wallet)
        .await?
        .ok_or_else(|| SoulConnectError::NotFound("User".to_string()))?;

    Ok(Json(ApiResponse::ok(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<ApiResponse<()>>, SoulConnectError> {
    let wallet = parse_wallet(query.wallet_address.as_deref())?;

    if !state.users.delete(wallet).await? {
        return Err(SoulConnectError::NotFound("User".to_string()));
    }

    tracing::info!(wallet = ?wallet, "User deleted");
    Ok(Json(ApiResponse::ok(()).with_message("User deleted successfully")))
}
