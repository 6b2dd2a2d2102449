//! Entitlement ledger: payment records and single-use generation credits.
//!
//! Every state change is a compare-and-swap (or put-if-absent) in the
//! [`KeyValueStore`], so a payment settles once and a credit is spent once
//! even with several gateway processes sharing a Redis store. Inside one
//! process, per-key async locks additionally serialize work on the same
//! transaction or the same payer/service pair, while unrelated payers never
//! wait on each other.
//!
//! Storage layout:
//!
//! * `payment:{tx}` - [`PaymentRecord`]
//! * `entitlement:{tx}` - [`Entitlement`]
//! * `credits:{payer}:{service}` - unconsumed transaction references, oldest first
//! * `generation_failure:{tx}` - [`GenerationFailure`]

use crate::models::{
    Entitlement, PaymentRecord, PaymentStatus, ServiceType, TransactionReference,
};
use crate::services::store::{self, KeyValueStore, StoreError};
use chrono::{DateTime, Utc};
use ethers::types::Address;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Entitlement already granted for transaction {0}")]
    DuplicateGrant(TransactionReference),

    #[error("No entitlement available")]
    NoEntitlement,

    #[error("Payment {0} is not verified")]
    NotVerified(TransactionReference),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of settling a pending payment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// This call moved the record out of `Pending`.
    Settled(PaymentRecord),
    /// Someone else settled it first; the stored record is returned.
    AlreadySettled(PaymentRecord),
}

/// Paid generation that could not be delivered. Kept for support follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationFailure {
    pub entitlement: Entitlement,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

const LOCK_PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct EntitlementLedger {
    store: Arc<dyn KeyValueStore>,
    locks: KeyedLocks,
}

fn payment_key(reference: &TransactionReference) -> String {
    format!("payment:{}", reference)
}

fn entitlement_key(reference: &TransactionReference) -> String {
    format!("entitlement:{}", reference)
}

fn credits_key(payer: Address, service: ServiceType) -> String {
    format!("credits:{:?}:{}", payer, service)
}

fn failure_key(reference: &TransactionReference) -> String {
    format!("generation_failure:{}", reference)
}

impl EntitlementLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::default(),
        }
    }

    pub async fn payment_record(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<PaymentRecord>, LedgerError> {
        let key = payment_key(reference);
        Ok(store::load::<PaymentRecord>(self.store.as_ref(), &key)
            .await?
            .map(|(_, record)| record))
    }

    /// Returns the record for `reference`, creating a `Pending` one on first
    /// sight.
    pub async fn open_payment(
        &self,
        reference: &TransactionReference,
        payer: Address,
        service: ServiceType,
    ) -> Result<PaymentRecord, LedgerError> {
        let key = payment_key(reference);
        let pending = PaymentRecord::pending(*reference, payer, service);

        if self
            .store
            .put_if_absent(&key, &store::encode(&key, &pending)?)
            .await?
        {
            tracing::debug!(tx = %reference, payer = ?payer, "Opened pending payment record");
            return Ok(pending);
        }

        match store::load::<PaymentRecord>(self.store.as_ref(), &key).await? {
            Some((_, record)) => Ok(record),
            // Deleted between the two calls; treat as freshly opened.
            None => Ok(pending),
        }
    }

    /// Moves a `Pending` record to the state produced by `settle`. Exactly one
    /// caller observes [`Settlement::Settled`] per record.
    pub async fn settle_payment<F>(
        &self,
        opened: &PaymentRecord,
        settle: F,
    ) -> Result<Settlement, LedgerError>
    where
        F: Fn(&PaymentRecord) -> PaymentRecord,
    {
        let reference = &opened.transaction_reference;
        let key = payment_key(reference);

        loop {
            let Some((raw, current)) = store::load::<PaymentRecord>(self.store.as_ref(), &key).await?
            else {
                self.store
                    .put_if_absent(&key, &store::encode(&key, opened)?)
                    .await?;
                continue;
            };

            if current.status != PaymentStatus::Pending {
                return Ok(Settlement::AlreadySettled(current));
            }

            let next = settle(&current);
            if self
                .store
                .compare_and_swap(&key, &raw, &store::encode(&key, &next)?)
                .await?
            {
                tracing::info!(
                    tx = %reference,
                    status = ?next.status,
                    "Payment record settled"
                );
                return Ok(Settlement::Settled(next));
            }
        }
    }

    /// Creates one unconsumed credit for a verified payment.
    pub async fn grant(&self, record: &PaymentRecord) -> Result<Entitlement, LedgerError> {
        let entitlement = self.insert_entitlement(record, false).await?;

        let _guard = self
            .locks
            .acquire(&credits_key(entitlement.payer, entitlement.service_type))
            .await;
        store::update::<Vec<TransactionReference>, _>(
            self.store.as_ref(),
            &credits_key(entitlement.payer, entitlement.service_type),
            |mut credits| {
                if !credits.contains(&entitlement.transaction_reference) {
                    credits.push(entitlement.transaction_reference);
                }
                credits
            },
        )
        .await?;

        tracing::info!(
            tx = %entitlement.transaction_reference,
            payer = ?entitlement.payer,
            service = %entitlement.service_type,
            "Entitlement granted"
        );
        Ok(entitlement)
    }

    /// Grant and consume in one step, for a payment that is spent by the same
    /// request that proved it. The credit never becomes visible to `consume`.
    pub async fn grant_and_consume(&self, record: &PaymentRecord) -> Result<Entitlement, LedgerError> {
        let entitlement = self.insert_entitlement(record, true).await?;

        tracing::info!(
            tx = %entitlement.transaction_reference,
            payer = ?entitlement.payer,
            service = %entitlement.service_type,
            "Entitlement granted and consumed"
        );
        Ok(entitlement)
    }

    async fn insert_entitlement(
        &self,
        record: &PaymentRecord,
        consumed: bool,
    ) -> Result<Entitlement, LedgerError> {
        if !record.is_verified() {
            return Err(LedgerError::NotVerified(record.transaction_reference));
        }

        let reference = record.transaction_reference;
        let _guard = self.locks.acquire(&entitlement_key(&reference)).await;

        let mut entitlement = Entitlement::from_payment(record);
        if consumed {
            entitlement = entitlement.consumed();
        }

        let key = entitlement_key(&reference);
        if !self
            .store
            .put_if_absent(&key, &store::encode(&key, &entitlement)?)
            .await?
        {
            return Err(LedgerError::DuplicateGrant(reference));
        }

        Ok(entitlement)
    }

    /// Spends the oldest unconsumed credit of `payer` for `service`.
    pub async fn consume(&self, payer: Address, service: ServiceType) -> Result<Entitlement, LedgerError> {
        let credits_key = credits_key(payer, service);
        let _guard = self.locks.acquire(&credits_key).await;

        let credits = store::load::<Vec<TransactionReference>>(self.store.as_ref(), &credits_key)
            .await?
            .map(|(_, credits)| credits)
            .unwrap_or_default();

        for reference in credits {
            if let Some(entitlement) = self.try_consume(&reference, payer, service).await? {
                self.forget_credit(&credits_key, &reference).await?;
                return Ok(entitlement);
            }
            // Spent or foreign: drop the stale index entry and keep looking.
            self.forget_credit(&credits_key, &reference).await?;
        }

        Err(LedgerError::NoEntitlement)
    }

    /// Spends the credit backed by one specific transaction.
    pub async fn consume_reference(
        &self,
        reference: &TransactionReference,
        payer: Address,
        service: ServiceType,
    ) -> Result<Entitlement, LedgerError> {
        let credits_key = credits_key(payer, service);
        let _guard = self.locks.acquire(&credits_key).await;

        match self.try_consume(reference, payer, service).await? {
            Some(entitlement) => {
                self.forget_credit(&credits_key, reference).await?;
                Ok(entitlement)
            }
            None => Err(LedgerError::NoEntitlement),
        }
    }

    async fn try_consume(
        &self,
        reference: &TransactionReference,
        payer: Address,
        service: ServiceType,
    ) -> Result<Option<Entitlement>, LedgerError> {
        let key = entitlement_key(reference);

        let Some((raw, entitlement)) = store::load::<Entitlement>(self.store.as_ref(), &key).await?
        else {
            return Ok(None);
        };

        if entitlement.is_consumed() || !entitlement.belongs_to(payer, service) {
            return Ok(None);
        }

        let consumed = entitlement.consumed();
        if self
            .store
            .compare_and_swap(&key, &raw, &store::encode(&key, &consumed)?)
            .await?
        {
            tracing::info!(tx = %reference, payer = ?payer, service = %service, "Entitlement consumed");
            Ok(Some(consumed))
        } else {
            // Lost the race to another process.
            Ok(None)
        }
    }

    async fn forget_credit(&self, credits_key: &str, reference: &TransactionReference) -> Result<(), LedgerError> {
        store::update::<Vec<TransactionReference>, _>(self.store.as_ref(), credits_key, |mut credits| {
            credits.retain(|r| r != reference);
            credits
        })
        .await?;
        Ok(())
    }

    pub async fn entitlement(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<Entitlement>, LedgerError> {
        let key = entitlement_key(reference);
        Ok(store::load::<Entitlement>(self.store.as_ref(), &key)
            .await?
            .map(|(_, entitlement)| entitlement))
    }

    /// Number of unconsumed credits.
    pub async fn available(&self, payer: Address, service: ServiceType) -> Result<usize, LedgerError> {
        let credits = store::load::<Vec<TransactionReference>>(self.store.as_ref(), &credits_key(payer, service))
            .await?
            .map(|(_, credits)| credits)
            .unwrap_or_default();

        let mut count = 0;
        for reference in &credits {
            if let Some(entitlement) = self.entitlement(reference).await? {
                if !entitlement.is_consumed() && entitlement.belongs_to(payer, service) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    pub async fn record_generation_failure(
        &self,
        entitlement: &Entitlement,
        reason: &str,
    ) -> Result<(), LedgerError> {
        let key = failure_key(&entitlement.transaction_reference);
        let failure = GenerationFailure {
            entitlement: entitlement.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        self.store.put(&key, &store::encode(&key, &failure)?).await?;
        Ok(())
    }

    pub async fn generation_failure(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<GenerationFailure>, LedgerError> {
        let key = failure_key(reference);
        Ok(store::load::<GenerationFailure>(self.store.as_ref(), &key)
            .await?
            .map(|(_, failure)| failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use ethers::types::U256;
    use tokio_test::{assert_err, assert_ok};

    fn reference(byte: u8) -> TransactionReference {
        TransactionReference::new(ethers::types::H256::repeat_byte(byte))
    }

    fn payer() -> Address {
        Address::repeat_byte(0xAB)
    }

    fn ledger() -> EntitlementLedger {
        EntitlementLedger::new(Arc::new(MemoryStore::new()))
    }

    fn verified(byte: u8, service: ServiceType) -> PaymentRecord {
        PaymentRecord::pending(reference(byte), payer(), service).verified(payer(), service, U256::exp10(15))
    }

    #[tokio::test]
    async fn test_grant_then_consume_twice() {
        let ledger = ledger();
        let record = verified(1, ServiceType::BioGeneration);

        assert_ok!(ledger.grant(&record).await);
        assert_eq!(ledger.available(payer(), ServiceType::BioGeneration).await.unwrap(), 1);

        let entitlement = ledger.consume(payer(), ServiceType::BioGeneration).await.unwrap();
        assert!(entitlement.is_consumed());
        assert_eq!(entitlement.transaction_reference, reference(1));

        assert!(matches!(
            ledger.consume(payer(), ServiceType::BioGeneration).await,
            Err(LedgerError::NoEntitlement)
        ));
        assert_eq!(ledger.available(payer(), ServiceType::BioGeneration).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_grant_is_rejected() {
        let ledger = ledger();
        let record = verified(2, ServiceType::BioGeneration);

        assert_ok!(ledger.grant(&record).await);
        assert!(matches!(ledger.grant(&record).await, Err(LedgerError::DuplicateGrant(_))));
        assert!(matches!(
            ledger.grant_and_consume(&record).await,
            Err(LedgerError::DuplicateGrant(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_requires_verified_payment() {
        let ledger = ledger();
        let pending = PaymentRecord::pending(reference(3), payer(), ServiceType::BioGeneration);

        assert!(matches!(ledger.grant(&pending).await, Err(LedgerError::NotVerified(_))));
    }

    #[tokio::test]
    async fn test_credits_are_scoped_to_payer_and_service() {
        let ledger = ledger();
        assert_ok!(ledger.grant(&verified(4, ServiceType::DateIdeaGeneration)).await);

        assert_err!(ledger.consume(payer(), ServiceType::BioGeneration).await);
        assert_err!(
            ledger
                .consume(Address::repeat_byte(0x01), ServiceType::DateIdeaGeneration)
                .await
        );
        assert_ok!(ledger.consume(payer(), ServiceType::DateIdeaGeneration).await);
    }

    #[tokio::test]
    async fn test_consume_takes_oldest_credit_first() {
        let ledger = ledger();
        assert_ok!(ledger.grant(&verified(5, ServiceType::BioGeneration)).await);
        assert_ok!(ledger.grant(&verified(6, ServiceType::BioGeneration)).await);

        let first = ledger.consume(payer(), ServiceType::BioGeneration).await.unwrap();
        let second = ledger.consume(payer(), ServiceType::BioGeneration).await.unwrap();
        assert_eq!(first.transaction_reference, reference(5));
        assert_eq!(second.transaction_reference, reference(6));
    }

    #[tokio::test]
    async fn test_grant_and_consume_never_exposes_credit() {
        let ledger = ledger();
        let entitlement = ledger
            .grant_and_consume(&verified(7, ServiceType::BioGeneration))
            .await
            .unwrap();

        assert!(entitlement.is_consumed());
        assert_eq!(ledger.available(payer(), ServiceType::BioGeneration).await.unwrap(), 0);
        assert_err!(ledger.consume(payer(), ServiceType::BioGeneration).await);
    }

    #[tokio::test]
    async fn test_consume_reference_spends_that_credit_once() {
        let ledger = ledger();
        assert_ok!(ledger.grant(&verified(8, ServiceType::BioGeneration)).await);

        assert_err!(
            ledger
                .consume_reference(&reference(8), Address::repeat_byte(0x02), ServiceType::BioGeneration)
                .await
        );
        assert_ok!(
            ledger
                .consume_reference(&reference(8), payer(), ServiceType::BioGeneration)
                .await
        );
        assert_err!(
            ledger
                .consume_reference(&reference(8), payer(), ServiceType::BioGeneration)
                .await
        );
        assert_err!(ledger.consume(payer(), ServiceType::BioGeneration).await);
    }

    #[tokio::test]
    async fn test_concurrent_consume_has_single_winner() {
        let ledger = Arc::new(ledger());
        assert_ok!(ledger.grant(&verified(9, ServiceType::BioGeneration)).await);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.consume(payer(), ServiceType::BioGeneration).await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let winners = results
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|result| result.is_ok())
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_concurrent_consume_on_shared_store_across_ledgers() {
        // Two ledgers over one store behave like two processes: only the CAS protects them.
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = Arc::new(EntitlementLedger::new(store.clone()));
        let second = Arc::new(EntitlementLedger::new(store));
        assert_ok!(first.grant(&verified(10, ServiceType::BioGeneration)).await);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let ledger = if i % 2 == 0 { first.clone() } else { second.clone() };
                tokio::spawn(async move { ledger.consume(payer(), ServiceType::BioGeneration).await })
            })
            .collect();

        let winners = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|joined| matches!(joined, Ok(Ok(_))))
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_settle_payment_happens_once() {
        let ledger = ledger();
        let r = reference(11);
        let opened = ledger.open_payment(&r, payer(), ServiceType::BioGeneration).await.unwrap();

        let settle = |record: &PaymentRecord| {
            record.verified(payer(), ServiceType::BioGeneration, U256::exp10(15))
        };

        let first = ledger.settle_payment(&opened, settle).await.unwrap();
        let second = ledger.settle_payment(&opened, settle).await.unwrap();

        assert!(matches!(first, Settlement::Settled(ref record) if record.is_verified()));
        assert!(matches!(second, Settlement::AlreadySettled(ref record) if record.is_verified()));
    }

    #[tokio::test]
    async fn test_open_payment_returns_existing_record() {
        let ledger = ledger();
        let r = reference(12);

        let opened = ledger.open_payment(&r, payer(), ServiceType::BioGeneration).await.unwrap();
        let again = ledger
            .open_payment(&r, Address::repeat_byte(0x03), ServiceType::DateIdeaGeneration)
            .await
            .unwrap();

        assert_eq!(opened, again);
        assert_eq!(again.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_generation_failure_is_recorded() {
        let ledger = ledger();
        let entitlement = ledger
            .grant_and_consume(&verified(13, ServiceType::BioGeneration))
            .await
            .unwrap();

        ledger
            .record_generation_failure(&entitlement, "provider rate limited")
            .await
            .unwrap();

        let failure = ledger.generation_failure(&reference(13)).await.unwrap().unwrap();
        assert_eq!(failure.reason, "provider rate limited");
        assert!(failure.entitlement.is_consumed());
    }
}
