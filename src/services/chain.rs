use crate::models::TransactionReference;
use anyhow::Result;
use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider},
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("Chain RPC unavailable: {0}")]
    NetworkUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub to: Option<Address>,
    pub value: U256,
    pub sender: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failed,
}

/// Read-only view of a chain. `Ok(None)` means the node does not know the
/// transaction (yet); transport failures are `ChainError::NetworkUnavailable`.
/// Implementations do not retry.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn fetch_transaction(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<ChainTransaction>, ChainError>;

    async fn fetch_receipt(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<ReceiptStatus>, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;
}

pub struct EthereumChainClient {
    primary: Arc<Provider<Http>>,
    fallback: Option<Arc<Provider<Http>>>,
}

impl EthereumChainClient {
    pub fn new(rpc_url: &str, fallback_url: Option<&str>) -> Result<Self> {
        let primary = Arc::new(Provider::<Http>::try_from(rpc_url)?);

        let fallback = if let Some(url) = fallback_url {
            Some(Arc::new(Provider::<Http>::try_from(url)?))
        } else {
            None
        };

        Ok(Self { primary, fallback })
    }

    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError> {
        match self.primary.get_transaction(hash).await {
            Ok(tx) => Ok(tx),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!("Primary RPC failed ({}), trying fallback", e);
                    fallback.get_transaction(hash).await.map_err(unavailable)
                }
                None => Err(unavailable(e)),
            },
        }
    }

    async fn get_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        match self.primary.get_transaction_receipt(hash).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!("Primary RPC failed ({}), trying fallback", e);
                    fallback.get_transaction_receipt(hash).await.map_err(unavailable)
                }
                None => Err(unavailable(e)),
            },
        }
    }
}

fn unavailable(e: ProviderError) -> ChainError {
    ChainError::NetworkUnavailable(e.to_string())
}

#[async_trait]
impl ChainClient for EthereumChainClient {
    async fn fetch_transaction(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<ChainTransaction>, ChainError> {
        let tx = self.get_transaction(reference.hash()).await?;

        Ok(tx.map(|tx| ChainTransaction {
            to: tx.to,
            value: tx.value,
            sender: tx.from,
        }))
    }

    async fn fetch_receipt(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<ReceiptStatus>, ChainError> {
        let receipt = self.get_receipt(reference.hash()).await?;

        Ok(receipt.map(|receipt| {
            if receipt.status == Some(1.into()) {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Failed
            }
        }))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        match self.primary.get_block_number().await {
            Ok(num) => Ok(num.as_u64()),
            Err(e) => match &self.fallback {
                Some(fallback) => fallback
                    .get_block_number()
                    .await
                    .map(|n| n.as_u64())
                    .map_err(unavailable),
                None => Err(unavailable(e)),
            },
        }
    }
}
