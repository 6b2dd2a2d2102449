pub mod analytics;
pub mod generate;
pub mod health;
pub mod history;
pub mod payment;
pub mod user;

pub use analytics::*;
pub use generate::*;
pub use health::*;
pub use history::*;
pub use payment::*;
pub use user::*;

use crate::{
    error::SoulConnectError,
    models::{ServiceType, TransactionReference},
    services::{
        Analytics, ChainClient, EntitlementLedger, GenerationGateway, HistoryRepository, KeyValueStore,
        UserRepository,
    },
};
use axum::{extract::rejection::JsonRejection, Json};
use ethers::types::Address;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GenerationGateway>,
    pub ledger: Arc<EntitlementLedger>,
    pub history: Arc<HistoryRepository>,
    pub users: Arc<UserRepository>,
    pub analytics: Arc<Analytics>,
    pub store: Arc<dyn KeyValueStore>,
    pub chain: Arc<dyn ChainClient>,
}

/// Unwraps a JSON body, turning extractor failures into a 400.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, SoulConnectError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| SoulConnectError::InputInvalid(rejection.body_text()))
}

pub(crate) fn parse_wallet(raw: Option<&str>) -> Result<Address, SoulConnectError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SoulConnectError::InputInvalid("Wallet address is required".to_string()))?;

    Address::from_str(raw)
        .map_err(|_| SoulConnectError::InputInvalid(format!("Invalid wallet address: {}", raw)))
}

pub(crate) fn parse_reference(raw: &str) -> Result<TransactionReference, SoulConnectError> {
    TransactionReference::from_str(raw.trim()).map_err(|e| SoulConnectError::InputInvalid(e.to_string()))
}

pub(crate) fn parse_service(raw: &str) -> Result<ServiceType, SoulConnectError> {
    ServiceType::from_str(raw.trim()).map_err(|e| SoulConnectError::InputInvalid(e.to_string()))
}
