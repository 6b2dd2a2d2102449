use crate::{
    error::SoulConnectError,
    handlers::{json_body, parse_reference, parse_wallet, AppState},
    models::{ApiResponse, BioInputs, DateIdeaInputs, GenerationRequest, GenerationResult, ServiceInputs},
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BioGenerationBody {
    #[serde(flatten)]
    pub inputs: BioInputs,
    pub wallet_address: Option<String>,
    pub transaction_hash: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DateIdeasGenerationBody {
    #[serde(flatten)]
    pub inputs: DateIdeaInputs,
    pub wallet_address: Option<String>,
    pub transaction_hash: Option<String>,
}

async fn run(
    state: &AppState,
    inputs: ServiceInputs,
    wallet_address: Option<String>,
    transaction_hash: Option<String>,
) -> Result<Json<ApiResponse<GenerationResult>>, SoulConnectError> {
    let requestor = parse_wallet(wallet_address.as_deref())?;
    let transaction_reference = transaction_hash
        .as_deref()
        .filter(|hash| !hash.trim().is_empty())
        .map(parse_reference)
        .transpose()?;

    let result = state
        .gateway
        .handle(GenerationRequest {
            requestor,
            inputs,
            transaction_reference,
        })
        .await?;

    Ok(Json(ApiResponse::ok(result)))
}

pub async fn generate_bio(
    State(state): State<AppState>,
    payload: Result<Json<BioGenerationBody>, JsonRejection>,
) -> Result<Json<ApiResponse<GenerationResult>>, SoulConnectError> {
    let body = json_body(payload)?;
    run(&state, ServiceInputs::Bio(body.inputs), body.wallet_address, body.transaction_hash).await
}

pub async fn generate_date_ideas(
    State(state): State<AppState>,
    payload: Result<Json<DateIdeasGenerationBody>, JsonRejection>,
) -> Result<Json<ApiResponse<GenerationResult>>, SoulConnectError> {
    let body = json_body(payload)?;
    run(
        &state,
        ServiceInputs::DateIdeas(body.inputs),
        body.wallet_address,
        body.transaction_hash,
    )
    .await
}
