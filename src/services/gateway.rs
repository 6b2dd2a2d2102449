use crate::{
    error::{PaymentInstructions, SoulConnectError},
    models::{
        Entitlement, GenerationEntry, GenerationRequest, GenerationResult, GenerationStage, PaymentRecord,
        PriceTable, ServiceType, TransactionReference,
    },
    services::{
        analytics::Analytics,
        generator::GenerationService,
        history::HistoryRepository,
        ledger::{EntitlementLedger, LedgerError},
        verifier::{PaymentVerifier, VerificationError},
    },
};
use chrono::Utc;
use ethers::types::Address;
use std::sync::Arc;
use uuid::Uuid;

/// Tracks one request through the gateway stages.
struct Progress {
    stage: GenerationStage,
    payer: Address,
    service: ServiceType,
}

impl Progress {
    fn new(payer: Address, service: ServiceType) -> Self {
        tracing::debug!(payer = ?payer, service = %service, stage = ?GenerationStage::Received, "Generation request");
        Self {
            stage: GenerationStage::Received,
            payer,
            service,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            self.stage = next;
            tracing::debug!(payer = ?self.payer, service = %self.service, stage = ?next, "Generation advanced");
        }
    }
}

/// Coordinates payment verification, credit consumption and generation.
///
/// Holds no state of its own: payments and credits live in the ledger.
pub struct GenerationGateway {
    verifier: PaymentVerifier,
    ledger: Arc<EntitlementLedger>,
    generator: Arc<dyn GenerationService>,
    history: Arc<HistoryRepository>,
    analytics: Arc<Analytics>,
    network: String,
}

impl GenerationGateway {
    pub fn new(
        verifier: PaymentVerifier,
        ledger: Arc<EntitlementLedger>,
        generator: Arc<dyn GenerationService>,
        history: Arc<HistoryRepository>,
        analytics: Arc<Analytics>,
        network: String,
    ) -> Self {
        Self {
            verifier,
            ledger,
            generator,
            history,
            analytics,
            network,
        }
    }

    pub fn prices(&self) -> &PriceTable {
        self.verifier.prices()
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Verifies a payment and turns it into a credit for later use.
    pub async fn verify_payment(
        &self,
        payer: Address,
        reference: &TransactionReference,
        service: ServiceType,
    ) -> Result<PaymentRecord, SoulConnectError> {
        let record = match self.verifier.verify(reference, service, payer).await {
            Ok(record) => {
                self.analytics.record_payment(&record).await;
                record
            }
            Err(VerificationError::AlreadyUsed(_)) => {
                // A retry after the credit write failed grants it now.
                let Some(record) = self.ungranted_payment(reference, payer, service).await? else {
                    return Err(SoulConnectError::AlreadyUsed(*reference));
                };
                record
            }
            Err(e) => return Err(e.into()),
        };

        match self.ledger.grant(&record).await {
            Ok(_) => Ok(record),
            Err(LedgerError::DuplicateGrant(_)) => Err(SoulConnectError::AlreadyUsed(*reference)),
            Err(e) => {
                // The payment is verified; without a credit the payer would lose it.
                tracing::error!(tx = %reference, error = %e, "Verified payment could not be granted");
                Err(e.into())
            }
        }
    }

    pub async fn handle(&self, request: GenerationRequest) -> Result<GenerationResult, SoulConnectError> {
        let service = request.service_type();
        let payer = request.requestor;
        let mut progress = Progress::new(payer, service);

        request.inputs.validate().map_err(SoulConnectError::InputInvalid)?;

        let entitlement = match request.transaction_reference {
            Some(reference) => self.spend_payment(payer, &reference, service, &mut progress).await?,
            None => {
                progress.advance();
                self.ledger.consume(payer, service).await.map_err(|e| self.no_credit(e, service))?
            }
        };
        progress.advance();

        let content = match self.generator.generate(&request.inputs).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(
                    tx = %entitlement.transaction_reference,
                    payer = ?payer,
                    service = %service,
                    error = %e,
                    "Generation failed after credit was consumed"
                );
                self.analytics.record_generation_failure().await;
                if let Err(record_err) = self
                    .ledger
                    .record_generation_failure(&entitlement, &e.to_string())
                    .await
                {
                    tracing::error!(error = %record_err, "Generation failure could not be recorded");
                }
                return Err(e.into());
            }
        };
        progress.advance();

        let result = GenerationResult {
            generation_id: Uuid::new_v4(),
            content,
            transaction_hash: entitlement.transaction_reference,
            service_type: service,
        };

        let entry = GenerationEntry {
            generation_id: result.generation_id,
            service_type: service,
            transaction_hash: result.transaction_hash,
            inputs: request.inputs,
            content: result.content.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.history.record(payer, entry).await {
            tracing::warn!(error = %e, "Generation history not stored");
        }
        self.analytics.record_generation(service).await;
        progress.advance();

        tracing::info!(
            tx = %result.transaction_hash,
            payer = ?payer,
            service = %service,
            generation_id = %result.generation_id,
            "Generation completed"
        );
        Ok(result)
    }

    /// Verifies `reference` and spends it in the same call. A reference that
    /// was verified earlier through `verify_payment` is spent from its credit.
    async fn spend_payment(
        &self,
        payer: Address,
        reference: &TransactionReference,
        service: ServiceType,
        progress: &mut Progress,
    ) -> Result<Entitlement, SoulConnectError> {
        match self.verifier.verify(reference, service, payer).await {
            Ok(record) => {
                progress.advance();
                self.analytics.record_payment(&record).await;
                Ok(self.ledger.grant_and_consume(&record).await?)
            }
            Err(VerificationError::AlreadyUsed(_)) => {
                progress.advance();
                if let Some(record) = self.ungranted_payment(reference, payer, service).await? {
                    match self.ledger.grant_and_consume(&record).await {
                        Ok(entitlement) => {
                            tracing::info!(tx = %reference, "Recovered credit for verified payment");
                            return Ok(entitlement);
                        }
                        // Someone else granted it in the meantime.
                        Err(LedgerError::DuplicateGrant(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                match self.ledger.consume_reference(reference, payer, service).await {
                    Ok(entitlement) => Ok(entitlement),
                    Err(LedgerError::NoEntitlement) => Err(SoulConnectError::AlreadyUsed(*reference)),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A payment verified for this payer and service whose credit was never
    /// written, e.g. because the store failed between the two writes.
    async fn ungranted_payment(
        &self,
        reference: &TransactionReference,
        payer: Address,
        service: ServiceType,
    ) -> Result<Option<PaymentRecord>, LedgerError> {
        let Some(record) = self.ledger.payment_record(reference).await? else {
            return Ok(None);
        };
        if !record.is_verified() || record.payer != payer || record.service_type != service {
            return Ok(None);
        }
        if self.ledger.entitlement(reference).await?.is_some() {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn no_credit(&self, err: LedgerError, service: ServiceType) -> SoulConnectError {
        match err {
            LedgerError::NoEntitlement => SoulConnectError::NoCredit {
                service,
                instructions: Box::new(PaymentInstructions::for_service(&self.network, self.prices(), service)),
            },
            other => other.into(),
        }
    }
}
