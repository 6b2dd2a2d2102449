use anyhow::{Context, Result};
use ethers::types::{Address, H256, U256};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use soul_connect::client::PaymentClient;
use std::str::FromStr;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 12;
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let base_url = std::env::var("SOUL_CONNECT_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let private_key = std::env::var("TEST_WALLET_PRIVATE_KEY").context("TEST_WALLET_PRIVATE_KEY required")?;
    let rpc_url = std::env::var("CHAIN_RPC_URL").unwrap_or_else(|_| "https://mainnet.base.org".to_string());

    println!("SoulConnect Test Payer");
    println!("======================");
    println!("Server: {}", base_url);

    let payment_client = PaymentClient::new(&rpc_url, &private_key).await?;
    println!("Wallet: {:?}", payment_client.address());
    println!();

    let client = Client::new();

    println!("Step 1: Fetching payment config...");
    let (amount_wei, recipient) = bio_price(&client, &base_url).await?;
    println!("   [OK] Bio price: {} wei to {:?}", amount_wei, recipient);
    println!();

    println!("Step 2: Sending ETH payment...");
    let tx_hash = payment_client.send_eth_payment(amount_wei, recipient).await?;
    println!("   [OK] Payment sent: {:?}", tx_hash);
    println!();

    println!("Step 3: Requesting bios with payment proof...");
    match generate_bio(&client, &base_url, payment_client.address(), tx_hash).await {
        Ok(data) => {
            println!("[SUCCESS] Received bios:");
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Err(e) => {
            println!("[FAILED] {}", e);
        }
    }

    Ok(())
}

async fn bio_price(client: &Client, base_url: &str) -> Result<(U256, Address)> {
    let config: Value = client
        .get(format!("{}/payment-config", base_url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let data = &config["data"];
    let recipient = data["recipientAddress"]
        .as_str()
        .context("payment config has no recipient")?;

    let bio = data["services"]
        .as_array()
        .and_then(|services| services.iter().find(|s| s["serviceType"] == "bio"))
        .context("payment config has no bio service")?;
    let price_wei = bio["priceWei"].as_str().context("bio service has no price")?;

    Ok((U256::from_dec_str(price_wei)?, Address::from_str(recipient)?))
}

async fn generate_bio(client: &Client, base_url: &str, wallet: Address, tx_hash: H256) -> Result<Value> {
    let body = json!({
        "interests": ["hiking", "jazz", "cooking"],
        "personalityTraits": ["curious", "warm"],
        "lookingFor": "someone to explore the city with",
        "walletAddress": format!("{:?}", wallet),
        "transactionHash": format!("{:?}", tx_hash),
    });

    for attempt in 1..=MAX_ATTEMPTS {
        let response = client
            .post(format!("{}/generate/bio", base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let result: Value = response.json().await?;
            return Ok(result["data"].clone());
        }

        // The node may not have indexed the transaction yet.
        if status == StatusCode::NOT_FOUND && attempt < MAX_ATTEMPTS {
            println!("   Transaction not visible yet, retrying in {}s...", RETRY_DELAY.as_secs());
            tokio::time::sleep(RETRY_DELAY).await;
            continue;
        }

        let error_text = response.text().await?;
        anyhow::bail!("Request failed ({}): {}", status, error_text);
    }

    anyhow::bail!("Transaction never became visible to the server")
}
