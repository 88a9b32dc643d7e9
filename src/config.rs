use anyhow::{bail, Context, Result};
use ethers::{signers::LocalWallet, types::Address};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Decimals of the reference native currency (wei).
pub const NATIVE_DECIMALS: u32 = 18;

#[derive(Debug, Clone)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

/// A token contract known on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u32,
}

impl TokenInfo {
    /// Native currency is registered under the zero-address sentinel.
    pub fn is_native(&self) -> bool {
        self.address.is_zero()
    }

    /// Contract address for token transfers, `None` for the native currency.
    pub fn contract(&self) -> Option<Address> {
        (!self.is_native()).then_some(self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub chain_id: u64,
    pub rpc_url: String,
}

/// Static lookup of (chain, token) pairs and per-chain RPC endpoints.
///
/// Chains and token symbols are matched lowercase. A pair that is not
/// registered resolves to `None`, which callers must treat as unsupported;
/// the native currency is only ever an explicit zero-address entry.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<(String, String), TokenInfo>,
    networks: HashMap<String, NetworkInfo>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Networks and stablecoins the gate supports out of the box.
    pub fn builtin() -> Self {
        Self::new()
            .with_network("base_sepolia", 84532, "https://sepolia.base.org")
            .with_token("base_sepolia", "usdc", known("0x036CbD53842c5426634e7929541eC2318f3dCF7e"), 6)
            .with_native("base_sepolia", "eth")
            .with_network("base", 8453, "https://mainnet.base.org")
            .with_token("base", "usdc", known("0x833589fCD6eDb6E08f4c7C32D4f71B54bdA02913"), 6)
            .with_native("base", "eth")
            .with_network("sepolia", 11155111, "https://rpc.sepolia.org")
            .with_token("sepolia", "usdc", known("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"), 6)
            .with_native("sepolia", "eth")
            .with_network("ethereum", 1, "https://eth.llamarpc.com")
            .with_token("ethereum", "usdc", known("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), 6)
            .with_native("ethereum", "eth")
    }

    pub fn with_network(mut self, chain: &str, chain_id: u64, rpc_url: &str) -> Self {
        self.networks.insert(
            chain.to_lowercase(),
            NetworkInfo {
                chain_id,
                rpc_url: rpc_url.to_string(),
            },
        );
        self
    }

    pub fn with_token(mut self, chain: &str, token: &str, address: Address, decimals: u32) -> Self {
        self.tokens.insert(
            (chain.to_lowercase(), token.to_lowercase()),
            TokenInfo { address, decimals },
        );
        self
    }

    pub fn with_native(self, chain: &str, symbol: &str) -> Self {
        self.with_token(chain, symbol, Address::zero(), NATIVE_DECIMALS)
    }

    pub fn token(&self, chain: &str, token: &str) -> Option<TokenInfo> {
        self.tokens
            .get(&(chain.to_lowercase(), token.to_lowercase()))
            .copied()
    }

    pub fn resolve_token_address(&self, chain: &str, token: &str) -> Option<Address> {
        self.token(chain, token).map(|info| info.address)
    }

    pub fn network(&self, chain: &str) -> Option<&NetworkInfo> {
        self.networks.get(&chain.to_lowercase())
    }

    pub fn rpc_url(&self, chain: &str) -> Option<&str> {
        self.network(chain).map(|n| n.rpc_url.as_str())
    }

    pub fn set_rpc_url(&mut self, chain: &str, rpc_url: &str) {
        if let Some(network) = self.networks.get_mut(&chain.to_lowercase()) {
            network.rpc_url = rpc_url.to_string();
        }
    }
}

fn known(address: &str) -> Address {
    Address::from_str(address).expect("builtin token address is valid hex")
}

/// Switches and windows for the server-side verification pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub verify_transaction: bool,
    pub verify_on_chain: bool,
    pub mark_used: bool,
    /// Maximum proof age in seconds.
    pub freshness_window_secs: u64,
    /// Maximum tolerated clock skew for proofs from the future.
    pub future_skew_secs: u64,
    /// How long admitted proof hashes are remembered.
    pub replay_retention_secs: u64,
    /// When transactions are verified, require the proof signer to be the payer.
    pub require_signer_is_payer: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            verify_transaction: true,
            verify_on_chain: false,
            mark_used: false,
            freshness_window_secs: 300,
            future_skew_secs: 60,
            replay_retention_secs: 600,
            require_signer_is_payer: true,
        }
    }
}

impl PipelineConfig {
    /// Admitted hashes must outlive every timestamp the freshness check
    /// still accepts, otherwise a swept proof could be admitted again.
    pub fn check_windows(&self) -> Result<(), String> {
        let accepted_span = self
            .freshness_window_secs
            .saturating_add(self.future_skew_secs);
        if self.replay_retention_secs < accepted_span {
            return Err(format!(
                "replay retention ({}s) must cover the freshness window plus future skew ({}s)",
                self.replay_retention_secs, accepted_span
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Payment terms for the protected routes
    pub payment_chain: String,
    pub payment_token: String,
    pub payment_amount: String,
    pub recipient_address: Address,

    // Chain access
    pub rpc_url: Option<String>,
    pub rpc_timeout: Duration,

    // Optional attestor contract
    pub attestor_address: Option<Address>,
    pub seller_private_key: Option<String>,

    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;
        let defaults = PipelineConfig::default();

        let config = Self {
            environment,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", "8080")
                .parse()
                .context("Invalid PORT")?,

            payment_chain: env_or("PAYMENT_CHAIN", "base_sepolia").to_lowercase(),
            payment_token: env_or("PAYMENT_TOKEN", "usdc").to_lowercase(),
            payment_amount: env_or("PAYMENT_AMOUNT", "0.01"),
            recipient_address: Self::parse_address("RECIPIENT_ADDRESS")?,

            rpc_url: std::env::var("RPC_URL").ok(),
            rpc_timeout: Duration::from_secs(
                env_or("RPC_TIMEOUT_SECS", "10")
                    .parse()
                    .context("Invalid RPC_TIMEOUT_SECS")?,
            ),

            attestor_address: match std::env::var("ATTESTOR_ADDRESS") {
                Ok(_) => Some(Self::parse_address("ATTESTOR_ADDRESS")?),
                Err(_) => None,
            },
            seller_private_key: std::env::var("SELLER_PRIVATE_KEY").ok(),

            pipeline: PipelineConfig {
                verify_transaction: env_flag("VERIFY_TRANSACTION", defaults.verify_transaction)?,
                verify_on_chain: env_flag("VERIFY_ON_CHAIN", defaults.verify_on_chain)?,
                mark_used: env_flag("MARK_USED", defaults.mark_used)?,
                freshness_window_secs: env_or("FRESHNESS_WINDOW_SECS", "300")
                    .parse()
                    .context("Invalid FRESHNESS_WINDOW_SECS")?,
                future_skew_secs: env_or("FUTURE_SKEW_SECS", "60")
                    .parse()
                    .context("Invalid FUTURE_SKEW_SECS")?,
                replay_retention_secs: env_or("REPLAY_RETENTION_SECS", "600")
                    .parse()
                    .context("Invalid REPLAY_RETENTION_SECS")?,
                require_signer_is_payer: env_flag(
                    "REQUIRE_SIGNER_IS_PAYER",
                    defaults.require_signer_is_payer,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Builtin registry with the configured RPC endpoint applied.
    pub fn registry(&self) -> TokenRegistry {
        let mut registry = TokenRegistry::builtin();
        if let Some(url) = &self.rpc_url {
            registry.set_rpc_url(&self.payment_chain, url);
        }
        registry
    }

    /// Challenge string served for every protected route.
    pub fn challenge(&self) -> String {
        format!(
            "{}:{}:{:?}?amount={}",
            self.payment_token, self.payment_chain, self.recipient_address, self.payment_amount
        )
    }

    fn parse_environment() -> Result<Environment> {
        let env = env_or("ENVIRONMENT", "development");

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_address(var: &str) -> Result<Address> {
        let addr_str = std::env::var(var)
            .with_context(|| format!("{} required", var))?;
        Address::from_str(&addr_str)
            .with_context(|| format!("Invalid address for {}", var))
    }

    fn validate(&self) -> Result<()> {
        let registry = self.registry();

        let Some(rpc_url) = registry.rpc_url(&self.payment_chain) else {
            bail!("Unsupported PAYMENT_CHAIN: {}", self.payment_chain);
        };
        if !rpc_url.starts_with("http") {
            bail!("RPC_URL must be HTTP(S) URL");
        }
        if registry
            .resolve_token_address(&self.payment_chain, &self.payment_token)
            .is_none()
        {
            bail!(
                "PAYMENT_TOKEN {} is not supported on {}",
                self.payment_token,
                self.payment_chain
            );
        }

        if let Err(reason) = self.pipeline.check_windows() {
            bail!("REPLAY_RETENTION_SECS too short: {}", reason);
        }

        if self.pipeline.verify_on_chain && self.attestor_address.is_none() {
            bail!("VERIFY_ON_CHAIN requires ATTESTOR_ADDRESS");
        }
        if self.pipeline.mark_used {
            if !self.pipeline.verify_on_chain {
                bail!("MARK_USED requires VERIFY_ON_CHAIN");
            }
            let Some(key) = &self.seller_private_key else {
                bail!("MARK_USED requires SELLER_PRIVATE_KEY");
            };
            // Same parser the signer uses; accepts keys with or without 0x.
            key.parse::<LocalWallet>()
                .map_err(|_| anyhow::anyhow!("SELLER_PRIVATE_KEY is not a valid private key"))?;
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_flag(var: &str, default: bool) -> Result<bool> {
    match std::env::var(var) {
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("Invalid boolean for {}: {}", var, value),
        },
        Err(_) => Ok(default),
    }
}
