use crate::{
    error::SoulConnectError,
    handlers::{json_body, parse_reference, parse_service, parse_wallet, AppState},
    models::{ApiResponse, CreditsView, PaymentConfigView, PaymentVerificationView, ServiceType},
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerifyBody {
    pub wallet_address: Option<String>,
    pub transaction_hash: Option<String>,
    pub service_type: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WalletQuery {
    pub wallet_address: Option<String>,
}

fn required<'a>(value: &'a Option<String>) -> Result<&'a str, SoulConnectError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SoulConnectError::InputInvalid("Missing required fields".to_string()))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    payload: Result<Json<PaymentVerifyBody>, JsonRejection>,
) -> Result<Json<ApiResponse<PaymentVerificationView>>, SoulConnectError> {
    let body = json_body(payload)?;

    let payer = parse_wallet(Some(required(&body.wallet_address)?))?;
    let reference = parse_reference(required(&body.transaction_hash)?)?;
    let service = parse_service(required(&body.service_type)?)?;

    let record = state.gateway.verify_payment(payer, &reference, service).await?;

    Ok(Json(
        ApiResponse::ok(PaymentVerificationView::from(&record)).with_message("Payment verified successfully"),
    ))
}

pub async fn payment_config(State(state): State<AppState>) -> Json<ApiResponse<PaymentConfigView>> {
    Json(ApiResponse::ok(PaymentConfigView::new(
        state.gateway.network(),
        state.gateway.prices(),
    )))
}

pub async fn get_credits(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<ApiResponse<CreditsView>>, SoulConnectError> {
    let payer = parse_wallet(query.wallet_address.as_deref())?;

    let bio = state.ledger.available(payer, ServiceType::BioGeneration).await?;
    let date_ideas = state.ledger.available(payer, ServiceType::DateIdeaGeneration).await?;

    Ok(Json(ApiResponse::ok(CreditsView {
        wallet_address: format!("{:?}", payer),
        bio,
        date_ideas,
    })))
}
