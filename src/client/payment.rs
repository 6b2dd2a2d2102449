use anyhow::{Context, Result};
use ethers::{
    prelude::*,
    providers::{Http, Provider},
    types::{Address, TransactionRequest, U256},
    utils::format_ether,
};
use std::sync::Arc;

/// Sends native ETH payments from a local key.
pub struct PaymentClient {
    provider: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
}

impl PaymentClient {
    pub async fn new(rpc_url: &str, private_key: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let chain_id = provider
            .get_chainid()
            .await
            .context("Failed to read chain id from RPC")?;

        let wallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .context("Invalid private key")?
            .with_chain_id(chain_id.as_u64());

        let provider = Arc::new(SignerMiddleware::new(provider, wallet));

        Ok(Self { provider })
    }

    pub fn address(&self) -> Address {
        self.provider.address()
    }

    pub async fn balance(&self) -> Result<U256> {
        Ok(self.provider.get_balance(self.address(), None).await?)
    }

    /// Pays `amount_wei` to `recipient` and waits for one confirmation.
    pub async fn send_eth_payment(&self, amount_wei: U256, recipient: Address) -> Result<H256> {
        tracing::info!("Sending {} ETH to {:?}", format_ether(amount_wei), recipient);

        let balance = self.balance().await?;
        if balance < amount_wei {
            anyhow::bail!(
                "Insufficient ETH balance: {} < {}",
                format_ether(balance),
                format_ether(amount_wei)
            );
        }

        let tx = TransactionRequest::pay(recipient, amount_wei).from(self.address());
        let pending_tx = self
            .provider
            .send_transaction(tx, None)
            .await
            .context("Failed to send ETH payment")?;

        tracing::info!("Transaction sent: {:?}, waiting for confirmation...", pending_tx.tx_hash());

        let receipt = pending_tx
            .await
            .context("Failed to get transaction receipt")?
            .ok_or_else(|| anyhow::anyhow!("Transaction dropped"))?;

        if receipt.status != Some(1.into()) {
            anyhow::bail!("Transaction failed onchain");
        }

        tracing::info!("Payment confirmed: {:?}", receipt.transaction_hash);

        Ok(receipt.transaction_hash)
    }
}
