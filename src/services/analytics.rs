use crate::{
    models::{PaymentRecord, ServiceType, Stats},
    services::store::KeyValueStore,
};
use ethers::{types::U256, utils::format_ether};
use std::sync::Arc;
use std::time::Instant;

const PAYMENTS_KEY: &str = "analytics:payments";
const REVENUE_GWEI_KEY: &str = "analytics:revenue_gwei";
const FAILURES_KEY: &str = "analytics:generation_failures";
const USERS_KEY: &str = "analytics:users";

fn generations_key(service: ServiceType) -> String {
    format!("analytics:generations:{}", service)
}

/// Revenue is kept in gwei so it fits a 64-bit counter; larger amounts clamp.
fn revenue_gwei(wei: U256) -> i64 {
    let gwei = wei / U256::exp10(9);
    if gwei > U256::from(i64::MAX) {
        i64::MAX
    } else {
        gwei.as_u64() as i64
    }
}

pub struct Analytics {
    store: Arc<dyn KeyValueStore>,
    start_time: Instant,
}

impl Analytics {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }

    pub async fn record_payment(&self, record: &PaymentRecord) {
        let gwei = revenue_gwei(record.amount_observed);

        self.bump(PAYMENTS_KEY, 1).await;
        self.bump(REVENUE_GWEI_KEY, gwei).await;

        tracing::info!(
            "Payment recorded: {} ETH from {:?} for {}",
            format_ether(record.amount_observed),
            record.payer,
            record.service_type
        );
    }

    pub async fn record_generation(&self, service: ServiceType) {
        self.bump(&generations_key(service), 1).await;
    }

    pub async fn record_generation_failure(&self) {
        self.bump(FAILURES_KEY, 1).await;
    }

    pub async fn record_new_user(&self) {
        self.bump(USERS_KEY, 1).await;
    }

    async fn bump(&self, key: &str, delta: i64) {
        if let Err(e) = self.store.increment(key, delta).await {
            tracing::warn!("Analytics counter {} not updated: {}", key, e);
        }
    }

    async fn read(&self, key: &str) -> u64 {
        self.store
            .increment(key, 0)
            .await
            .map(|v| v.max(0) as u64)
            .unwrap_or(0)
    }

    pub async fn get_stats(&self) -> Stats {
        let revenue_gwei = self.read(REVENUE_GWEI_KEY).await;

        Stats {
            total_payments: self.read(PAYMENTS_KEY).await,
            total_revenue_eth: format_ether(U256::from(revenue_gwei) * U256::exp10(9)),
            bio_generations: self.read(&generations_key(ServiceType::BioGeneration)).await,
            date_idea_generations: self.read(&generations_key(ServiceType::DateIdeaGeneration)).await,
            generation_failures: self.read(FAILURES_KEY).await,
            total_users: self.read(USERS_KEY).await,
            uptime_seconds: self.uptime_seconds(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionReference;
    use crate::services::store::MemoryStore;
    use ethers::types::{Address, H256};

    #[tokio::test]
    async fn test_stats_accumulate() {
        let analytics = Analytics::new(Arc::new(MemoryStore::new()));
        let record = PaymentRecord::pending(
            TransactionReference::new(H256::repeat_byte(1)),
            Address::zero(),
            ServiceType::BioGeneration,
        )
        .verified(Address::zero(), ServiceType::BioGeneration, U256::exp10(15));

        analytics.record_payment(&record).await;
        analytics.record_payment(&record).await;
        analytics.record_generation(ServiceType::BioGeneration).await;
        analytics.record_generation(ServiceType::DateIdeaGeneration).await;
        analytics.record_generation_failure().await;
        analytics.record_new_user().await;

        let stats = analytics.get_stats().await;
        assert_eq!(stats.total_payments, 2);
        assert!(stats.total_revenue_eth.starts_with("0.002"));
        assert_eq!(stats.bio_generations, 1);
        assert_eq!(stats.date_idea_generations, 1);
        assert_eq!(stats.generation_failures, 1);
        assert_eq!(stats.total_users, 1);
    }

    #[test]
    fn test_revenue_gwei_saturates() {
        assert_eq!(revenue_gwei(U256::exp10(15)), 1_000_000);
        assert_eq!(revenue_gwei(U256::from(999_999_999u64)), 0);
        assert_eq!(revenue_gwei(U256::from(i64::MAX) * U256::exp10(9)), i64::MAX);
        // 2^64 gwei has zero low 64 bits
        assert_eq!(revenue_gwei((U256::one() << 64) * U256::exp10(9)), i64::MAX);
        assert_eq!(revenue_gwei(U256::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn test_huge_payment_does_not_wrap_revenue() {
        let analytics = Analytics::new(Arc::new(MemoryStore::new()));
        let record = PaymentRecord::pending(
            TransactionReference::new(H256::repeat_byte(2)),
            Address::zero(),
            ServiceType::BioGeneration,
        )
        .verified(Address::zero(), ServiceType::BioGeneration, U256::MAX);

        analytics.record_payment(&record).await;
        analytics.record_payment(&record).await;

        let stats = analytics.get_stats().await;
        assert_eq!(stats.total_payments, 2);
        assert_eq!(
            stats.total_revenue_eth,
            format_ether(U256::from(i64::MAX as u64) * U256::exp10(9))
        );
    }
}
