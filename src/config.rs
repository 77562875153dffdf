pub const PROVER_URL_KEY: &'static str = "PROVER_URL";
pub const RPC_URL_KEY: &'static str = "RPC_URL";
pub const CHAIN_ID_KEY: &'static str = "CHAIN_ID";
pub const PRIVATE_KEY_HEX_KEY: &'static str = "PRIVATE_KEY_HEX";

pub const PROVER_ADDRESS_KEY: &'static str = "PROVER_ADDRESS";
pub const VERIFIER_ADDRESS_KEY: &'static str = "VERIFIER_ADDRESS";
pub const PROVER_FUNCTION_KEY: &'static str = "PROVER_FUNCTION";
pub const VERIFIER_FUNCTION_KEY: &'static str = "VERIFIER_FUNCTION";
pub const SUPPORTED_PROOF_SCHEMAS_KEY: &'static str = "SUPPORTED_PROOF_SCHEMAS";

pub const CONFIRMATIONS_KEY: &'static str = "CONFIRMATIONS";
pub const CONFIRMATION_RETRY_COUNT_KEY: &'static str = "CONFIRMATION_RETRY_COUNT";
pub const CONFIRMATION_RETRY_DELAY_MS_KEY: &'static str = "CONFIRMATION_RETRY_DELAY_MS";
pub const PROVING_MAX_ATTEMPTS_KEY: &'static str = "PROVING_MAX_ATTEMPTS";
pub const PROVING_POLL_DELAY_MS_KEY: &'static str = "PROVING_POLL_DELAY_MS";
pub const PROVING_MAX_DELAY_MS_KEY: &'static str = "PROVING_MAX_DELAY_MS";
pub const PROVING_BACKOFF_KEY: &'static str = "PROVING_BACKOFF";

pub const CHECKPOINT_DIR_KEY: &'static str = "CHECKPOINT_DIR";
pub const RESOLVE_DKIM_KEYS_KEY: &'static str = "RESOLVE_DKIM_KEYS";
pub const DEDUP_HEADERS_KEY: &'static str = "DEDUP_HEADERS";

pub const SERVER_PORT_KEY: &'static str = "SERVER_PORT";
pub const MAX_UPLOAD_BYTES_KEY: &'static str = "MAX_UPLOAD_BYTES";
pub const REQUIRE_DATE_WINDOW_KEY: &'static str = "REQUIRE_DATE_WINDOW";
pub const ROUTE_STYLE_KEY: &'static str = "ROUTE_STYLE";
pub const UPLOAD_MODE_KEY: &'static str = "UPLOAD_MODE";

use crate::abi::{parse_selector, Selector};
use crate::canonicalizer::DEFAULT_DEDUP_HEADERS;
use crate::retry::RetryPolicy;
use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the caller names the address to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStyle {
    /// `POST /generate-proof/:email`
    PathParam,
    /// `POST /generate-proof` with an `email` field.
    BodyField,
}

impl FromStr for RouteStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "path-param" => Ok(RouteStyle::PathParam),
            "body-field" => Ok(RouteStyle::BodyField),
            other => Err(anyhow!("unknown route style {other:?} (path-param | body-field)")),
        }
    }
}

/// How the caller ships the email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// `multipart/form-data` with an `emlFile` part.
    Multipart,
    /// JSON body carrying the email inline.
    InlineJson,
}

impl FromStr for UploadMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "multipart" => Ok(UploadMode::Multipart),
            "inline-json" => Ok(UploadMode::InlineJson),
            other => Err(anyhow!("unknown upload mode {other:?} (multipart | inline-json)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub require_date_window: bool,
    pub route_style: RouteStyle,
    pub upload_mode: UploadMode,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            require_date_window: false,
            route_style: RouteStyle::PathParam,
            upload_mode: UploadMode::Multipart,
        }
    }
}

/// Everything the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chain_id: u64,
    pub prover_address: Address,
    pub verifier_address: Address,
    pub prover_function: String,
    pub verifier_selector: Selector,
    pub supported_proof_schemas: Vec<u32>,
    pub required_confirmations: u64,
    pub proving_policy: RetryPolicy,
    pub confirmation_policy: RetryPolicy,
    pub dedup_headers: Vec<String>,
    pub options: PipelineOptions,
}

impl PipelineConfig {
    pub fn new(
        chain_id: u64,
        prover_address: Address,
        verifier_address: Address,
        verifier_selector: Selector,
    ) -> Self {
        Self {
            chain_id,
            prover_address,
            verifier_address,
            prover_function: "main".to_string(),
            verifier_selector,
            supported_proof_schemas: vec![1],
            required_confirmations: 1,
            proving_policy: RetryPolicy::proving(),
            confirmation_policy: RetryPolicy::default(),
            dedup_headers: default_dedup_headers(),
            options: PipelineOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
}

/// Process configuration, read once at startup.
#[derive(Clone)]
pub struct RelayerConfig {
    pub prover_url: String,
    pub rpc_url: String,
    pub private_key_hex: String,
    pub checkpoint_dir: PathBuf,
    pub resolve_dkim_keys: bool,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("prover_url", &self.prover_url)
            .field("rpc_url", &self.rpc_url)
            .field("private_key_hex", &"<redacted>")
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("resolve_dkim_keys", &self.resolve_dkim_keys)
            .field("pipeline", &self.pipeline)
            .field("server", &self.server)
            .finish()
    }
}

impl RelayerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let chain_id = vars.required(CHAIN_ID_KEY)?;
        let prover_address = vars.required(PROVER_ADDRESS_KEY)?;
        let verifier_address = vars.required(VERIFIER_ADDRESS_KEY)?;
        let verifier_selector = parse_selector(&vars.raw_required(VERIFIER_FUNCTION_KEY)?)
            .with_context(|| format!("{VERIFIER_FUNCTION_KEY} is invalid"))?;

        let proving_policy = RetryPolicy::fixed(
            vars.attempts(PROVING_MAX_ATTEMPTS_KEY, 120)?,
            Duration::from_millis(vars.optional(PROVING_POLL_DELAY_MS_KEY, 1000)?),
        )
        .with_multiplier(vars.optional(PROVING_BACKOFF_KEY, 1.5)?)
        .with_max_delay(Duration::from_millis(
            vars.optional(PROVING_MAX_DELAY_MS_KEY, 10_000)?,
        ));
        let confirmation_policy = RetryPolicy::fixed(
            vars.attempts(CONFIRMATION_RETRY_COUNT_KEY, 60)?,
            Duration::from_millis(vars.optional(CONFIRMATION_RETRY_DELAY_MS_KEY, 1000)?),
        );

        let pipeline = PipelineConfig {
            prover_function: vars.optional(PROVER_FUNCTION_KEY, "main".to_string())?,
            supported_proof_schemas: vars.list(SUPPORTED_PROOF_SCHEMAS_KEY, vec![1])?,
            required_confirmations: vars.optional(CONFIRMATIONS_KEY, 1)?,
            proving_policy,
            confirmation_policy,
            dedup_headers: vars.list(DEDUP_HEADERS_KEY, default_dedup_headers())?,
            options: PipelineOptions {
                require_date_window: vars.optional(REQUIRE_DATE_WINDOW_KEY, false)?,
                route_style: vars.optional(ROUTE_STYLE_KEY, RouteStyle::PathParam)?,
                upload_mode: vars.optional(UPLOAD_MODE_KEY, UploadMode::Multipart)?,
            },
            ..PipelineConfig::new(chain_id, prover_address, verifier_address, verifier_selector)
        };

        Ok(Self {
            prover_url: vars.raw_required(PROVER_URL_KEY)?,
            rpc_url: vars.raw_required(RPC_URL_KEY)?,
            private_key_hex: vars.raw_required(PRIVATE_KEY_HEX_KEY)?,
            checkpoint_dir: PathBuf::from(
                vars.optional(CHECKPOINT_DIR_KEY, "./db/checkpoints".to_string())?,
            ),
            resolve_dkim_keys: vars.optional(RESOLVE_DKIM_KEYS_KEY, true)?,
            pipeline,
            server: ServerConfig {
                port: vars.optional(SERVER_PORT_KEY, 3002)?,
                max_upload_bytes: vars.optional(MAX_UPLOAD_BYTES_KEY, 10 * 1024 * 1024)?,
            },
        })
    }
}

fn default_dedup_headers() -> Vec<String> {
    DEFAULT_DEDUP_HEADERS.iter().map(|header| header.to_string()).collect()
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn raw_required(&self, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| anyhow!("{key} is not set"))
    }

    fn required<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self.raw_required(key)?;
        value.parse().map_err(|e| anyhow!("{key}={value:?}: {e}"))
    }

    fn optional<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(value) => value.parse().map_err(|e| anyhow!("{key}={value:?}: {e}")),
            None => Ok(default),
        }
    }

    /// Poll budgets of zero would time out without ever polling.
    fn attempts(&self, key: &str, default: u32) -> Result<u32> {
        match self.optional(key, default)? {
            0 => Err(anyhow!("{key} must be at least 1")),
            attempts => Ok(attempts),
        }
    }

    fn list<T>(&self, key: &str, default: Vec<T>) -> Result<Vec<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.parse().map_err(|e| anyhow!("{key} item {item:?}: {e}")))
                .collect(),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (PROVER_URL_KEY, "http://127.0.0.1:3000"),
            (RPC_URL_KEY, "http://127.0.0.1:8545"),
            (CHAIN_ID_KEY, "31337"),
            (
                PRIVATE_KEY_HEX_KEY,
                "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            ),
            (PROVER_ADDRESS_KEY, "0x9c107e40d560a13449ed7b12f01d01dea88ea33f"),
            (VERIFIER_ADDRESS_KEY, "0x05a4b5e04d625eec182bd0898e8adfe20cf5a857"),
            (VERIFIER_FUNCTION_KEY, "verify(bytes)"),
        ])
    }

    fn load(vars: HashMap<&'static str, &'static str>) -> Result<RelayerConfig> {
        RelayerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(base()).unwrap();
        assert_eq!(config.pipeline.chain_id, 31337);
        assert_eq!(config.pipeline.prover_function, "main");
        assert_eq!(config.pipeline.required_confirmations, 1);
        assert_eq!(
            config.pipeline.confirmation_policy,
            RetryPolicy::fixed(60, Duration::from_millis(1000))
        );
        assert_eq!(config.pipeline.dedup_headers, vec!["DKIM-Signature", "Content-Type"]);
        assert_eq!(config.pipeline.options, PipelineOptions::default());
        assert_eq!(config.server.port, 3002);
        assert!(!format!("{:?}", config).contains("ac0974"));
    }

    #[test]
    fn options_are_parsed() {
        let mut vars = base();
        vars.insert(ROUTE_STYLE_KEY, "body-field");
        vars.insert(UPLOAD_MODE_KEY, "inline-json");
        vars.insert(REQUIRE_DATE_WINDOW_KEY, "true");
        vars.insert(SUPPORTED_PROOF_SCHEMAS_KEY, "1, 2");
        vars.insert(CONFIRMATION_RETRY_COUNT_KEY, "5");
        let config = load(vars).unwrap();
        assert_eq!(
            config.pipeline.options,
            PipelineOptions {
                require_date_window: true,
                route_style: RouteStyle::BodyField,
                upload_mode: UploadMode::InlineJson,
            }
        );
        assert_eq!(config.pipeline.supported_proof_schemas, vec![1, 2]);
        assert_eq!(config.pipeline.confirmation_policy.max_attempts, 5);
    }

    #[test]
    fn missing_and_invalid_keys_are_named() {
        let mut vars = base();
        vars.remove(RPC_URL_KEY);
        assert!(load(vars).unwrap_err().to_string().contains(RPC_URL_KEY));

        let mut vars = base();
        vars.insert(ROUTE_STYLE_KEY, "query");
        assert!(load(vars).unwrap_err().to_string().contains(ROUTE_STYLE_KEY));

        let mut vars = base();
        vars.insert(VERIFIER_FUNCTION_KEY, "verify");
        assert!(format!("{:#}", load(vars).unwrap_err()).contains(VERIFIER_FUNCTION_KEY));
    }

    #[test]
    fn zero_poll_budgets_are_rejected() {
        for key in [PROVING_MAX_ATTEMPTS_KEY, CONFIRMATION_RETRY_COUNT_KEY] {
            let mut vars = base();
            vars.insert(key, "0");
            let err = load(vars).unwrap_err().to_string();
            assert!(err.contains(key), "{err}");
            assert!(err.contains("at least 1"), "{err}");
        }

        let mut vars = base();
        vars.insert(PROVING_MAX_ATTEMPTS_KEY, "1");
        assert_eq!(load(vars).unwrap().pipeline.proving_policy.max_attempts, 1);
    }
}
