//! Service configuration.

use anyhow::{Context, Result};
use ethers::types::Address;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use zkvault_common::DEFAULT_TOKEN_SYMBOL;
use zkvault_ledger::DEFAULT_LEDGER_DB_PATH;
use zkvault_relayer::{
    pipeline::DEFAULT_PRE_VERIFICATION_GAS_MULTIPLIER, DEFAULT_ACCOUNT_FACTORY, DEFAULT_CHAIN_ID,
    DEFAULT_ENTRY_POINT,
};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Backend configuration.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Chain-data JSON-RPC endpoint.
    pub rpc_url: String,
    /// Bundler and paymaster endpoint; defaults to `rpc_url`.
    pub bundler_url: String,
    /// Vault contract: call target and webhook log filter.
    pub vault_address: Address,
    /// ERC-20 token for wallet balance lookups.
    pub usdc_address: Option<Address>,
    pub token_symbol: String,
    pub chain_id: u64,
    pub entry_point: Address,
    pub account_factory: Address,
    pub pre_verification_gas_multiplier: u64,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub ledger_db_path: String,
    pub port: u16,
    pub log_format: LogFormat,
}

impl BackendConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let rpc_url = env::var("RPC_URL").context("RPC_URL must be set")?;
        let bundler_url = env::var("BUNDLER_URL").unwrap_or_else(|_| rpc_url.clone());

        let vault_address = parse_address(
            "VAULT_ADDRESS",
            &env::var("VAULT_ADDRESS").context("VAULT_ADDRESS must be set")?,
        )?;
        let usdc_address = env::var("USDC_ADDRESS")
            .ok()
            .map(|value| parse_address("USDC_ADDRESS", &value))
            .transpose()?;

        let token_symbol =
            env::var("TOKEN_SYMBOL").unwrap_or_else(|_| DEFAULT_TOKEN_SYMBOL.to_string());

        let entry_point = parse_address(
            "ENTRY_POINT_ADDRESS",
            &env::var("ENTRY_POINT_ADDRESS").unwrap_or_else(|_| DEFAULT_ENTRY_POINT.to_string()),
        )?;
        let account_factory = parse_address(
            "ACCOUNT_FACTORY_ADDRESS",
            &env::var("ACCOUNT_FACTORY_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_ACCOUNT_FACTORY.to_string()),
        )?;

        let chain_id = parse_or("CHAIN_ID", DEFAULT_CHAIN_ID)?;
        let pre_verification_gas_multiplier = parse_or(
            "PRE_VERIFICATION_GAS_MULTIPLIER",
            DEFAULT_PRE_VERIFICATION_GAS_MULTIPLIER,
        )?;
        let receipt_timeout =
            Duration::from_secs(parse_or("RECEIPT_TIMEOUT_SECS", DEFAULT_RECEIPT_TIMEOUT_SECS)?);
        let receipt_poll_interval = Duration::from_millis(parse_or(
            "RECEIPT_POLL_INTERVAL_MS",
            DEFAULT_RECEIPT_POLL_INTERVAL_MS,
        )?);

        let ledger_db_path =
            env::var("LEDGER_DB_PATH").unwrap_or_else(|_| DEFAULT_LEDGER_DB_PATH.to_string());
        let port = parse_or("PORT", DEFAULT_PORT)?;

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            rpc_url,
            bundler_url,
            vault_address,
            usdc_address,
            token_symbol,
            chain_id,
            entry_point,
            account_factory,
            pre_verification_gas_multiplier,
            receipt_timeout,
            receipt_poll_interval,
            ledger_db_path,
            port,
            log_format,
        })
    }
}

fn parse_address(name: &str, value: &str) -> Result<Address> {
    Address::from_str(value.trim()).with_context(|| format!("{name} is not an address: {value}"))
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{name} is invalid: {value}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_settings() {
        env::set_var("RPC_URL", "http://localhost:8545");
        env::set_var("VAULT_ADDRESS", "0x1111111111111111111111111111111111111111");
        for key in [
            "BUNDLER_URL",
            "USDC_ADDRESS",
            "CHAIN_ID",
            "PRE_VERIFICATION_GAS_MULTIPLIER",
            "RECEIPT_TIMEOUT_SECS",
            "PORT",
            "LOG_FORMAT",
        ] {
            env::remove_var(key);
        }

        let config = BackendConfig::from_env().unwrap();
        assert_eq!(config.bundler_url, "http://localhost:8545");
        assert_eq!(config.chain_id, 84532);
        assert_eq!(config.pre_verification_gas_multiplier, 2);
        assert_eq!(config.receipt_timeout, Duration::from_secs(120));
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.usdc_address.is_none());
        assert_eq!(
            config.entry_point,
            Address::from_str(DEFAULT_ENTRY_POINT).unwrap()
        );
    }

    #[test]
    fn parse_helpers_report_the_variable() {
        let err = parse_address("VAULT_ADDRESS", "not-an-address").unwrap_err();
        assert!(err.to_string().contains("VAULT_ADDRESS"));

        env::set_var("ZKVAULT_TEST_NUMBER", "abc");
        let err = parse_or::<u64>("ZKVAULT_TEST_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("ZKVAULT_TEST_NUMBER"));
        env::remove_var("ZKVAULT_TEST_NUMBER");
        assert_eq!(parse_or::<u64>("ZKVAULT_TEST_NUMBER", 7).unwrap(), 7);
    }
}
