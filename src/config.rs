use crate::services::LlmSettings;
use anyhow::{bail, Context, Result};
use ethers::{
    types::{Address, U256},
    utils::parse_ether,
};
use std::str::FromStr;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_MODEL: &str = "google/gemini-2.0-flash-001";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Payment network
    pub chain_name: String,
    pub chain_rpc_url: String,
    pub chain_rpc_fallback: Option<String>,
    pub recipient_address: Address,
    pub bio_price_wei: U256,
    pub date_ideas_price_wei: U256,

    // Storage; in-memory when unset
    pub redis_url: Option<String>,

    // Generation
    pub llm: LlmSettings,

    // Rate limiting
    pub rate_limit_per_window: u32,
    pub rate_limit_window: Duration,
    /// Key clients on X-Forwarded-For / X-Real-IP. Only safe behind a proxy
    /// that overwrites them.
    pub trust_proxy_headers: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = Self::parse_environment(var("ENVIRONMENT").as_deref())?;

        let config = Self {
            environment,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("Invalid PORT")?,

            chain_name: var("CHAIN_NAME").unwrap_or_else(|| "base".to_string()),
            chain_rpc_url: var("CHAIN_RPC_URL").unwrap_or_else(|| "https://mainnet.base.org".to_string()),
            chain_rpc_fallback: var("CHAIN_RPC_FALLBACK"),
            recipient_address: Self::parse_address(
                "PAYMENT_RECIPIENT_ADDRESS",
                var("PAYMENT_RECIPIENT_ADDRESS"),
            )?,
            bio_price_wei: Self::parse_price("BIO_PRICE_ETH", var("BIO_PRICE_ETH"))?,
            date_ideas_price_wei: Self::parse_price("DATE_IDEAS_PRICE_ETH", var("DATE_IDEAS_PRICE_ETH"))?,

            redis_url: var("REDIS_URL"),

            llm: Self::llm_settings(&var)?,

            rate_limit_per_window: var("RATE_LIMIT_PER_WINDOW")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_PER_WINDOW")?,
            rate_limit_window: Duration::from_secs(
                var("RATE_LIMIT_WINDOW_SECS")
                    .unwrap_or_else(|| "60".to_string())
                    .parse()
                    .context("Invalid RATE_LIMIT_WINDOW_SECS")?,
            ),
            trust_proxy_headers: Self::parse_flag("TRUST_PROXY_HEADERS", var("TRUST_PROXY_HEADERS"))?,
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_flag(name: &str, value: Option<String>) -> Result<bool> {
        match value.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("false") | Some("0") | Some("no") => Ok(false),
            Some("true") | Some("1") | Some("yes") => Ok(true),
            Some(other) => bail!("Invalid {}: {}", name, other),
        }
    }

    fn parse_environment(value: Option<&str>) -> Result<Environment> {
        let env = value.unwrap_or("development");

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_address(name: &str, value: Option<String>) -> Result<Address> {
        let addr_str = value.with_context(|| format!("{} required", name))?;
        Address::from_str(&addr_str).with_context(|| format!("Invalid address for {}", name))
    }

    fn parse_price(name: &str, value: Option<String>) -> Result<U256> {
        let eth = value.unwrap_or_else(|| "0.001".to_string());
        parse_ether(&eth).with_context(|| format!("Invalid ETH amount for {}: {}", name, eth))
    }

    fn llm_settings<F>(var: &F) -> Result<LlmSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (api_key, default_base, default_model) = if let Some(key) = var("OPENAI_API_KEY") {
            (key, OPENAI_BASE_URL, OPENAI_MODEL)
        } else if let Some(key) = var("OPENROUTER_API_KEY") {
            (key, OPENROUTER_BASE_URL, OPENROUTER_MODEL)
        } else {
            bail!("OPENAI_API_KEY or OPENROUTER_API_KEY required");
        };

        let ttl_secs: u64 = var("GENERATION_CACHE_TTL_SECS")
            .unwrap_or_else(|| "300".to_string())
            .parse()
            .context("Invalid GENERATION_CACHE_TTL_SECS")?;

        Ok(LlmSettings {
            base_url: var("LLM_BASE_URL").unwrap_or_else(|| default_base.to_string()),
            api_key,
            model: var("LLM_MODEL").unwrap_or_else(|| default_model.to_string()),
            cache_ttl: Duration::from_secs(ttl_secs),
        })
    }

    fn validate(&self) -> Result<()> {
        if !self.chain_rpc_url.starts_with("http") {
            bail!("CHAIN_RPC_URL must be HTTP(S) URL");
        }
        if let Some(fallback) = &self.chain_rpc_fallback {
            if !fallback.starts_with("http") {
                bail!("CHAIN_RPC_FALLBACK must be HTTP(S) URL");
            }
        }
        if !self.llm.base_url.starts_with("http") {
            bail!("LLM_BASE_URL must be HTTP(S) URL");
        }
        if self.recipient_address.is_zero() {
            bail!("PAYMENT_RECIPIENT_ADDRESS must not be the zero address");
        }
        if self.bio_price_wei.is_zero() || self.date_ideas_price_wei.is_zero() {
            bail!("Service prices must be greater than zero");
        }
        if self.rate_limit_per_window == 0 || self.rate_limit_window.is_zero() {
            bail!("Rate limit window and allowance must be greater than zero");
        }

        tracing::info!("Configuration validated for {:?} environment", self.environment);

        Ok(())
    }
}
