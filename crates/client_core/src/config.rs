use std::{fs, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use url::Url;

use crate::abi;

pub const SETTINGS_FILE: &str = "voter.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub contract_address: Option<String>,
    pub rpc_url: String,
    pub signer_url: Option<String>,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            contract_address: None,
            rpc_url: "http://127.0.0.1:8545".into(),
            signer_url: None,
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    contract_address: Option<String>,
    rpc_url: Option<String>,
    signer_url: Option<String>,
    confirmation_timeout_secs: Option<u64>,
    receipt_poll_interval_ms: Option<u64>,
}

/// Validated settings. Only this type is accepted by the controller
/// constructors, so a missing contract address cannot get past startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub contract_address: String,
    pub rpc_url: Url,
    pub signer_url: Url,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the settings file, then the environment. `APP__*` wins over
/// the bare variable name.
pub fn load_settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        let file_cfg: FileSettings =
            toml::from_str(raw).with_context(|| format!("failed to parse {SETTINGS_FILE}"))?;
        if let Some(v) = file_cfg.contract_address {
            settings.contract_address = Some(v);
        }
        if let Some(v) = file_cfg.rpc_url {
            settings.rpc_url = v;
        }
        if let Some(v) = file_cfg.signer_url {
            settings.signer_url = Some(v);
        }
        if let Some(v) = file_cfg.confirmation_timeout_secs {
            settings.confirmation_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file_cfg.receipt_poll_interval_ms {
            settings.receipt_poll_interval = Duration::from_millis(v);
        }
    }

    if let Some(v) = env_value(&env, "CONTRACT_ADDRESS") {
        settings.contract_address = Some(v);
    }
    if let Some(v) = env_value(&env, "RPC_URL") {
        settings.rpc_url = v;
    }
    if let Some(v) = env_value(&env, "SIGNER_URL") {
        settings.signer_url = Some(v);
    }
    if let Some(v) = env("APP__CONFIRMATION_TIMEOUT_SECS") {
        let secs = v
            .parse::<u64>()
            .with_context(|| format!("APP__CONFIRMATION_TIMEOUT_SECS is not a number: {v}"))?;
        settings.confirmation_timeout = Duration::from_secs(secs);
    }
    if let Some(v) = env("APP__RECEIPT_POLL_INTERVAL_MS") {
        let millis = v
            .parse::<u64>()
            .with_context(|| format!("APP__RECEIPT_POLL_INTERVAL_MS is not a number: {v}"))?;
        settings.receipt_poll_interval = Duration::from_millis(millis);
    }

    Ok(settings)
}

fn env_value(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(&format!("APP__{name}")).or_else(|| env(name))
}

impl Settings {
    pub fn validate(self) -> anyhow::Result<ClientConfig> {
        let contract_address = self
            .contract_address
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                anyhow!("CONTRACT_ADDRESS is not set in {SETTINGS_FILE} or the environment")
            })?;
        abi::parse_address(&contract_address)
            .map_err(|e| anyhow!("CONTRACT_ADDRESS {contract_address:?} is invalid: {e}"))?;

        let rpc_url = parse_http_url("rpc_url", &self.rpc_url)?;
        let signer_url = match self.signer_url {
            Some(raw) => parse_http_url("signer_url", &raw)?,
            None => rpc_url.clone(),
        };

        if self.confirmation_timeout.is_zero() {
            return Err(anyhow!("confirmation timeout must be greater than zero"));
        }

        Ok(ClientConfig {
            contract_address,
            rpc_url,
            signer_url,
            confirmation_timeout: self.confirmation_timeout,
            receipt_poll_interval: self.receipt_poll_interval,
        })
    }
}

fn parse_http_url(field: &str, raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("{field} is not a valid URL: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("{field} must start with http:// or https://"));
    }
    Ok(url)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
