use crate::{
    models::{PaymentRejection, PriceTable, ServiceType, TransactionReference},
    services::{GenerationError, LedgerError, StoreError, VerificationError},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use ethers::utils::format_ether;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SoulConnectError {
    #[error("{0}")]
    InputInvalid(String),

    #[error("{0}")]
    PaymentInvalid(PaymentRejection),

    #[error("Transaction {0} not found; it may still be confirming, retry shortly")]
    TransactionNotFound(TransactionReference),

    #[error("Transaction {0} has already been used")]
    AlreadyUsed(TransactionReference),

    #[error("No credit for {service}: payment of {} ETH required", .instructions.payment.amount)]
    NoCredit {
        service: ServiceType,
        instructions: Box<PaymentInstructions>,
    },

    #[error("{0}")]
    GenerationFailed(String),

    #[error("Blockchain network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl SoulConnectError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            SoulConnectError::InputInvalid(_) => (StatusCode::BAD_REQUEST, "INPUT_INVALID"),
            SoulConnectError::PaymentInvalid(_) => (StatusCode::BAD_REQUEST, "PAYMENT_INVALID"),
            SoulConnectError::TransactionNotFound(_) => (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND"),
            SoulConnectError::AlreadyUsed(_) => (StatusCode::CONFLICT, "ALREADY_USED"),
            SoulConnectError::NoCredit { .. } => (StatusCode::PAYMENT_REQUIRED, "NO_CREDIT"),
            SoulConnectError::GenerationFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_FAILED")
            }
            SoulConnectError::NetworkUnavailable(_) => (StatusCode::BAD_GATEWAY, "NETWORK_UNAVAILABLE"),
            SoulConnectError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            SoulConnectError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            SoulConnectError::Storage(_)
            | SoulConnectError::InternalError(_)
            | SoulConnectError::AnyhowError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Text sent to the client. Internal failures never expose their detail.
    fn public_message(&self) -> String {
        match self {
            SoulConnectError::NetworkUnavailable(_) => {
                "Blockchain network unavailable, please retry shortly".to_string()
            }
            SoulConnectError::RateLimitExceeded => "Too many requests. Please try again later.".to_string(),
            SoulConnectError::Storage(_)
            | SoulConnectError::InternalError(_)
            | SoulConnectError::AnyhowError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_instructions: Option<PaymentInstructions>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentInstructions {
    #[serde(rename = "type")]
    pub type_: String,
    pub version: String,
    pub payment: PaymentDetails,
    pub instructions: PaymentFormat,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub chain: String,
    pub asset: String,
    pub amount: String,
    pub amount_wei: String,
    pub recipient: String,
    pub service_type: ServiceType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentFormat {
    pub field: String,
    pub format: String,
}

impl PaymentInstructions {
    pub fn for_service(network: &str, prices: &PriceTable, service: ServiceType) -> Self {
        let price = prices.price(service);
        Self {
            type_: "soulconnect.payment_required".to_string(),
            version: "1.0.0".to_string(),
            payment: PaymentDetails {
                chain: network.to_string(),
                asset: price.currency.to_string(),
                amount: format_ether(price.amount_wei),
                amount_wei: price.amount_wei.to_string(),
                recipient: format!("{:?}", price.recipient),
                service_type: service,
            },
            instructions: PaymentFormat {
                field: "transactionHash".to_string(),
                format: "transaction_hash".to_string(),
            },
        }
    }
}

impl From<VerificationError> for SoulConnectError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::AlreadyUsed(reference) => SoulConnectError::AlreadyUsed(reference),
            VerificationError::TransactionNotFound(reference) => {
                SoulConnectError::TransactionNotFound(reference)
            }
            VerificationError::Rejected(rejection) => SoulConnectError::PaymentInvalid(rejection),
            VerificationError::NetworkUnavailable(detail) => SoulConnectError::NetworkUnavailable(detail),
            VerificationError::Ledger(e) => e.into(),
        }
    }
}

impl From<LedgerError> for SoulConnectError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(e) => SoulConnectError::Storage(e),
            other => SoulConnectError::InternalError(other.to_string()),
        }
    }
}

impl From<GenerationError> for SoulConnectError {
    fn from(err: GenerationError) -> Self {
        let message = match err {
            GenerationError::RateLimited => "AI service is temporarily busy. Please try again in a moment.",
            GenerationError::MalformedOutput(_) | GenerationError::Unavailable(_) => {
                "Failed to generate content. Please try again."
            }
        };
        SoulConnectError::GenerationFailed(message.to_string())
    }
}

impl IntoResponse for SoulConnectError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status, error_code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(
                error = ?self,
                error_code = error_code,
                request_id = %request_id,
                "Request failed"
            );
        } else {
            tracing::warn!(
                error = %self,
                error_code = error_code,
                request_id = %request_id,
                "Request rejected"
            );
        }

        let payment_instructions = match &self {
            SoulConnectError::NoCredit { instructions, .. } => Some(instructions.as_ref().clone()),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error: self.public_message(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
            payment_instructions,
        };

        (status, Json(body)).into_response()
    }
}
