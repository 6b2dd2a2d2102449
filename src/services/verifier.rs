use crate::models::{PaymentRecord, PaymentRejection, PaymentStatus, PriceTable, ServiceType, TransactionReference};
use crate::services::{
    chain::{ChainClient, ChainError, ReceiptStatus},
    ledger::{EntitlementLedger, LedgerError, Settlement},
};
use ethers::types::{Address, U256};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Transaction {0} has already been used")]
    AlreadyUsed(TransactionReference),

    #[error("Transaction {0} not found")]
    TransactionNotFound(TransactionReference),

    #[error("Payment rejected: {0}")]
    Rejected(PaymentRejection),

    #[error("Chain unavailable: {0}")]
    NetworkUnavailable(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<ChainError> for VerificationError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::NetworkUnavailable(detail) => VerificationError::NetworkUnavailable(detail),
        }
    }
}

/// Checks a claimed payment against the chain and settles its record.
///
/// No ledger lock is held while the chain is queried; the final settle is a
/// compare-and-swap, so two racing verifications of one transaction produce a
/// single `Verified` outcome.
pub struct PaymentVerifier {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<EntitlementLedger>,
    prices: PriceTable,
}

impl PaymentVerifier {
    pub fn new(chain: Arc<dyn ChainClient>, ledger: Arc<EntitlementLedger>, prices: PriceTable) -> Self {
        Self { chain, ledger, prices }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub async fn verify(
        &self,
        reference: &TransactionReference,
        service: ServiceType,
        claimed_payer: Address,
    ) -> Result<PaymentRecord, VerificationError> {
        // Replay protection
        let opened = self.ledger.open_payment(reference, claimed_payer, service).await?;
        match opened.status {
            PaymentStatus::Verified => return Err(VerificationError::AlreadyUsed(*reference)),
            PaymentStatus::Rejected => {
                let rejection = opened
                    .rejection
                    .clone()
                    .unwrap_or(PaymentRejection::TransactionFailed);
                return Err(VerificationError::Rejected(rejection));
            }
            PaymentStatus::Pending => {}
        }

        let Some(tx) = self.chain.fetch_transaction(reference).await? else {
            tracing::info!(tx = %reference, "Transaction not visible yet");
            return Err(VerificationError::TransactionNotFound(*reference));
        };

        let price = self.prices.price(service);

        if tx.value < price.amount_wei {
            return self
                .reject(
                    &opened,
                    tx.value,
                    PaymentRejection::InsufficientAmount {
                        required: price.amount_wei,
                        observed: tx.value,
                    },
                )
                .await;
        }

        // Address equality is on bytes, so checksum casing never matters.
        if tx.to != Some(price.recipient) {
            return self
                .reject(
                    &opened,
                    tx.value,
                    PaymentRejection::WrongRecipient {
                        expected: price.recipient,
                        actual: tx.to,
                    },
                )
                .await;
        }

        if tx.sender != claimed_payer {
            return self
                .reject(
                    &opened,
                    tx.value,
                    PaymentRejection::PayerMismatch {
                        claimed: claimed_payer,
                        sender: tx.sender,
                    },
                )
                .await;
        }

        match self.chain.fetch_receipt(reference).await? {
            None => {
                tracing::info!(tx = %reference, "Transaction not mined yet");
                return Err(VerificationError::TransactionNotFound(*reference));
            }
            Some(ReceiptStatus::Failed) => {
                return self
                    .reject(&opened, tx.value, PaymentRejection::TransactionFailed)
                    .await;
            }
            Some(ReceiptStatus::Success) => {}
        }

        let settlement = self
            .ledger
            .settle_payment(&opened, |current| current.verified(tx.sender, service, tx.value))
            .await?;

        match settlement {
            Settlement::Settled(record) => {
                tracing::info!(
                    tx = %reference,
                    payer = ?record.payer,
                    service = %service,
                    amount_wei = %record.amount_observed,
                    "Payment verified"
                );
                Ok(record)
            }
            Settlement::AlreadySettled(record) if record.is_verified() => {
                Err(VerificationError::AlreadyUsed(*reference))
            }
            Settlement::AlreadySettled(record) => Err(VerificationError::Rejected(
                record.rejection.unwrap_or(PaymentRejection::TransactionFailed),
            )),
        }
    }

    /// Final rejections settle the record; the rest leave it pending so the
    /// rightful payer (or the right service) can still claim the transaction.
    async fn reject(
        &self,
        opened: &PaymentRecord,
        amount: U256,
        rejection: PaymentRejection,
    ) -> Result<PaymentRecord, VerificationError> {
        tracing::warn!(
            tx = %opened.transaction_reference,
            reason = %rejection,
            "Payment rejected"
        );

        if rejection.is_final() {
            let settlement = self
                .ledger
                .settle_payment(opened, |current| current.rejected(amount, rejection.clone()))
                .await?;

            if let Settlement::AlreadySettled(record) = settlement {
                if record.is_verified() {
                    return Err(VerificationError::AlreadyUsed(opened.transaction_reference));
                }
            }
        }

        Err(VerificationError::Rejected(rejection))
    }
}
