//! Fakes shared by the unit tests.

use crate::models::{GeneratedContent, PriceTable, ServiceInputs, TransactionReference};
use crate::services::{
    chain::{ChainClient, ChainError, ChainTransaction, ReceiptStatus},
    generator::{GenerationError, GenerationService},
    store::{KeyValueStore, MemoryStore, StoreError},
};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const BIO_PRICE_WEI: u64 = 1_000_000_000_000_000;
pub const DATE_IDEAS_PRICE_WEI: u64 = 500_000_000_000_000;

pub fn payer() -> Address {
    Address::repeat_byte(0x11)
}

pub fn recipient() -> Address {
    Address::repeat_byte(0x22)
}

pub fn reference(byte: u8) -> TransactionReference {
    TransactionReference::new(H256::repeat_byte(byte))
}

pub fn prices() -> PriceTable {
    PriceTable::new(recipient(), U256::from(BIO_PRICE_WEI), U256::from(DATE_IDEAS_PRICE_WEI))
}

/// In-memory chain. Transactions added with `add_pending` are visible but
/// have no receipt.
#[derive(Default)]
pub struct FakeChainClient {
    transactions: Mutex<HashMap<H256, ChainTransaction>>,
    receipts: Mutex<HashMap<H256, ReceiptStatus>>,
    offline: AtomicBool,
    transaction_calls: AtomicUsize,
}

impl FakeChainClient {
    pub fn add_payment(&self, tx: TransactionReference, sender: Address, to: Address, value: U256, success: bool) {
        self.add_pending(tx, sender, to, value);
        let status = if success {
            ReceiptStatus::Success
        } else {
            ReceiptStatus::Failed
        };
        self.receipts.lock().insert(tx.hash(), status);
    }

    pub fn add_pending(&self, tx: TransactionReference, sender: Address, to: Address, value: U256) {
        self.transactions.lock().insert(
            tx.hash(),
            ChainTransaction {
                to: Some(to),
                value,
                sender,
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), ChainError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChainError::NetworkUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    async fn fetch_transaction(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<ChainTransaction>, ChainError> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.transactions.lock().get(&reference.hash()).cloned())
    }

    async fn fetch_receipt(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<ReceiptStatus>, ChainError> {
        self.check_online()?;
        Ok(self.receipts.lock().get(&reference.hash()).copied())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.check_online()?;
        Ok(12_345)
    }
}

/// Generator returning canned content; `fail_next` makes the next call fail.
#[derive(Default)]
pub struct ScriptedGenerator {
    fail_next: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, inputs: &ServiceInputs) -> Result<GeneratedContent, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GenerationError::Unavailable("provider down".to_string()));
        }

        Ok(match inputs {
            ServiceInputs::Bio(_) => GeneratedContent::Bios(vec![
                "Bookish climber seeks belay partner.".to_string(),
                "Tea first, adventures after.".to_string(),
            ]),
            ServiceInputs::DateIdeas(ideas) => GeneratedContent::DateIdeas(vec![crate::models::DateIdeaItem {
                title: "Sunset picnic".to_string(),
                description: format!("A picnic in {}", ideas.location),
                category: "Outdoor".to_string(),
                estimated_cost: "$".to_string(),
                duration: "2 hours".to_string(),
            }]),
        })
    }
}

/// Memory store whose next `put_if_absent` on a key with the armed prefix
/// fails as if the Redis connection dropped.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_prefix: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn fail_next_put_if_absent(&self, prefix: &str) {
        *self.fail_prefix.lock() = Some(prefix.to_string());
    }

    fn injected_failure(&self, key: &str) -> Result<(), StoreError> {
        let mut armed = self.fail_prefix.lock();
        if armed.as_deref().is_some_and(|prefix| key.starts_with(prefix)) {
            *armed = None;
            return Err(StoreError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection reset",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.injected_failure(key)?;
        self.inner.put_if_absent(key, value).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool, StoreError> {
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.increment(key, delta).await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }
}
