use crate::models::{PaymentRecord, PriceTable, ServiceType};
use chrono::{DateTime, Utc};
use ethers::utils::format_ether;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub store: bool,
    pub chain_rpc: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_payments: u64,
    pub total_revenue_eth: String,
    pub bio_generations: u64,
    pub date_idea_generations: u64,
    pub generation_failures: u64,
    pub total_users: u64,
    pub uptime_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServicePriceView {
    pub service_type: ServiceType,
    pub name: String,
    pub price: String,
    pub price_wei: String,
    pub currency: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfigView {
    pub network: String,
    pub recipient_address: String,
    pub services: Vec<ServicePriceView>,
}

impl PaymentConfigView {
    pub fn new(network: &str, prices: &PriceTable) -> Self {
        let services = ServiceType::ALL
            .iter()
            .map(|service| {
                let price = prices.price(*service);
                ServicePriceView {
                    service_type: *service,
                    name: service.display_name().to_string(),
                    price: format_ether(price.amount_wei),
                    price_wei: price.amount_wei.to_string(),
                    currency: price.currency.to_string(),
                }
            })
            .collect();

        Self {
            network: network.to_string(),
            recipient_address: format!("{:?}", prices.recipient()),
            services,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerificationView {
    pub payment_id: String,
    pub verified: bool,
    pub transaction_hash: String,
    pub amount: String,
    pub service_type: ServiceType,
    pub wallet_address: String,
}

impl From<&PaymentRecord> for PaymentVerificationView {
    fn from(record: &PaymentRecord) -> Self {
        Self {
            payment_id: record.payment_id.to_string(),
            verified: record.is_verified(),
            transaction_hash: record.transaction_reference.to_string(),
            amount: format_ether(record.amount_observed),
            service_type: record.service_type,
            wallet_address: format!("{:?}", record.payer),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreditsView {
    pub wallet_address: String,
    pub bio: usize,
    pub date_ideas: usize,
}
