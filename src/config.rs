//! Environment-driven configuration shared by the callback server and the cranker.
//!
//! Everything has a local-validator default except the MPC account set, which only the
//! cranker needs (see [`Config::program_layout`]).

use anyhow::Context;
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::coordinator::ProtocolTimeouts;
use crate::instructions::{MpcAccounts, ProgramLayout};

pub const DEFAULT_PROGRAM_ID: &str = "DQ5MR2aPD9sPBN9ukVkhwrAn8ADxpkAE5AHUnXxKEvn1";
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8899";
const DEFAULT_PORT: u16 = 3000;
const MIN_ADMIN_TOKEN_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct Config {
    /// Solana HTTP RPC endpoint.
    pub rpc_url: String,
    /// Matching-engine program id.
    pub program_id: Pubkey,
    /// JSON keypair file. Signs `finalize_submit_order` as callback authority, and is the
    /// payer/user for cranker flows.
    pub keypair_path: PathBuf,
    /// Axum bind address, host:port.
    pub api_bind: String,
    /// Gates `/metrics`. The route is not mounted when unset.
    pub admin_token: Option<String>,
    pub callback_max_body_bytes: usize,
    /// Node keys allowed to sign callbacks; empty accepts any valid signature.
    pub trusted_node_keys: Vec<[u8; 32]>,
    pub confirm_timeout: Duration,
    pub timeouts: ProtocolTimeouts,
    pub watch_poll: Duration,

    pub arcium_program_id: Option<Pubkey>,
    pub arcium_cluster: Option<Pubkey>,
    pub arcium_fee_pool: Option<Pubkey>,
    pub arcium_clock: Option<Pubkey>,
    pub base_mint: Option<Pubkey>,
    pub quote_mint: Option<Pubkey>,
}

impl Config {
    /// Full deployment layout. Fails naming the first missing variable.
    pub fn program_layout(&self) -> anyhow::Result<ProgramLayout> {
        fn need(v: Option<Pubkey>, key: &str) -> anyhow::Result<Pubkey> {
            v.ok_or_else(|| anyhow::anyhow!("Missing env var: {key}"))
        }
        Ok(ProgramLayout {
            program_id: self.program_id,
            mpc: MpcAccounts {
                arcium_program: need(self.arcium_program_id, "ARCIUM_PROGRAM_ID")?,
                cluster: need(self.arcium_cluster, "ARCIUM_CLUSTER_ACCOUNT")?,
                fee_pool: need(self.arcium_fee_pool, "ARCIUM_FEE_POOL_ACCOUNT")?,
                clock: need(self.arcium_clock, "ARCIUM_CLOCK_ACCOUNT")?,
            },
            base_mint: need(self.base_mint, "BASE_MINT")?,
            quote_mint: need(self.quote_mint, "QUOTE_MINT")?,
        })
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Same as [`load_config`], reading variables through `get`.
pub fn load_config_from(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let u64_or = |key: &str, default: u64| -> anyhow::Result<u64> {
        match var(key) {
            Some(v) => v.parse().with_context(|| format!("Invalid {key}: {v}")),
            None => Ok(default),
        }
    };
    let pubkey = |key: &str| -> anyhow::Result<Option<Pubkey>> {
        var(key)
            .map(|v| Pubkey::from_str(&v).with_context(|| format!("Invalid {key}: {v}")))
            .transpose()
    };

    let rpc_url = validate_rpc_url(&var("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.into()))?;
    let program_id = match pubkey("PROGRAM_ID")? {
        Some(p) => p,
        None => Pubkey::from_str(DEFAULT_PROGRAM_ID).context("Invalid default program id")?,
    };

    let keypair_path = match var("KEYPAIR_PATH") {
        Some(p) => PathBuf::from(p),
        None => {
            let home = var("HOME").context("KEYPAIR_PATH unset and HOME unknown")?;
            PathBuf::from(home).join(".config/solana/id.json")
        }
    };
    // Basic path traversal guard for env-provided paths.
    if !keypair_path.is_absolute() {
        anyhow::bail!("KEYPAIR_PATH must be an absolute path");
    }

    let api_bind = match var("API_BIND") {
        Some(b) => b,
        None => {
            let port = u64_or("PORT", DEFAULT_PORT as u64)?;
            let port = u16::try_from(port).with_context(|| format!("Invalid PORT: {port}"))?;
            format!("0.0.0.0:{port}")
        }
    };

    let admin_token = var("ADMIN_TOKEN");
    if let Some(t) = admin_token.as_deref() {
        if t.len() < MIN_ADMIN_TOKEN_LEN {
            anyhow::bail!("ADMIN_TOKEN must be at least {MIN_ADMIN_TOKEN_LEN} characters");
        }
    }

    let trusted_node_keys = match var("TRUSTED_NODE_KEYS") {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Pubkey::from_str(s)
                    .map(|p| p.to_bytes())
                    .with_context(|| format!("Invalid TRUSTED_NODE_KEYS entry: {s}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(Config {
        rpc_url,
        program_id,
        keypair_path,
        api_bind,
        admin_token,
        callback_max_body_bytes: u64_or("CALLBACK_MAX_BODY_BYTES", 64 * 1024)? as usize,
        trusted_node_keys,
        confirm_timeout: Duration::from_secs(u64_or("CONFIRM_TIMEOUT_SECS", 60)?),
        timeouts: ProtocolTimeouts {
            finalization: Duration::from_secs(u64_or("FINALIZE_TIMEOUT_SECS", 120)?),
            event: Duration::from_secs(u64_or("EVENT_TIMEOUT_SECS", 60)?),
        },
        watch_poll: Duration::from_millis(u64_or("WATCH_POLL_MS", 400)?),
        arcium_program_id: pubkey("ARCIUM_PROGRAM_ID")?,
        arcium_cluster: pubkey("ARCIUM_CLUSTER_ACCOUNT")?,
        arcium_fee_pool: pubkey("ARCIUM_FEE_POOL_ACCOUNT")?,
        arcium_clock: pubkey("ARCIUM_CLOCK_ACCOUNT")?,
        base_mint: pubkey("BASE_MINT")?,
        quote_mint: pubkey("QUOTE_MINT")?,
    })
}

fn validate_rpc_url(raw: &str) -> anyhow::Result<String> {
    let u = Url::parse(raw).with_context(|| format!("Invalid RPC_URL: {raw}"))?;
    if !matches!(u.scheme(), "http" | "https") {
        anyhow::bail!("RPC_URL must use http or https: {raw}");
    }
    if u.host_str().is_none() {
        anyhow::bail!("RPC_URL missing host: {raw}");
    }
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let m: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_config_from(|k| m.get(k).cloned())
    }

    #[test]
    fn defaults_target_local_validator() {
        let cfg = load(&[("HOME", "/home/op")]).unwrap();
        assert_eq!(cfg.rpc_url, "http://127.0.0.1:8899");
        assert_eq!(cfg.program_id.to_string(), DEFAULT_PROGRAM_ID);
        assert_eq!(cfg.keypair_path, PathBuf::from("/home/op/.config/solana/id.json"));
        assert_eq!(cfg.api_bind, "0.0.0.0:3000");
        assert_eq!(cfg.callback_max_body_bytes, 64 * 1024);
        assert_eq!(cfg.timeouts.event, Duration::from_secs(60));
        assert_eq!(cfg.timeouts.finalization, Duration::from_secs(120));
        assert!(cfg.admin_token.is_none());
        assert!(cfg.trusted_node_keys.is_empty());
    }

    #[test]
    fn port_and_bind() {
        let cfg = load(&[("HOME", "/h"), ("PORT", "8080")]).unwrap();
        assert_eq!(cfg.api_bind, "0.0.0.0:8080");
        let cfg = load(&[("HOME", "/h"), ("PORT", "8080"), ("API_BIND", "127.0.0.1:9")]).unwrap();
        assert_eq!(cfg.api_bind, "127.0.0.1:9");
        assert!(load(&[("HOME", "/h"), ("PORT", "70000")]).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[("KEYPAIR_PATH", "id.json")]).is_err());
        assert!(load(&[("HOME", "/h"), ("RPC_URL", "ftp://x")]).is_err());
        assert!(load(&[("HOME", "/h"), ("ADMIN_TOKEN", "short")]).is_err());
        assert!(load(&[("HOME", "/h"), ("TRUSTED_NODE_KEYS", "nope")]).is_err());
        assert!(load(&[("HOME", "/h"), ("EVENT_TIMEOUT_SECS", "soon")]).is_err());
    }

    #[test]
    fn layout_names_missing_variable() {
        let cfg = load(&[("HOME", "/h")]).unwrap();
        let err = cfg.program_layout().unwrap_err().to_string();
        assert!(err.contains("ARCIUM_PROGRAM_ID"), "{err}");

        let k = Pubkey::new_unique().to_string();
        let k = k.as_str();
        let cfg = load(&[
            ("HOME", "/h"),
            ("ARCIUM_PROGRAM_ID", k),
            ("ARCIUM_CLUSTER_ACCOUNT", k),
            ("ARCIUM_FEE_POOL_ACCOUNT", k),
            ("ARCIUM_CLOCK_ACCOUNT", k),
            ("BASE_MINT", k),
            ("QUOTE_MINT", k),
        ])
        .unwrap();
        assert_eq!(cfg.program_layout().unwrap().program_id, cfg.program_id);
    }

    #[test]
    fn trusted_keys_parse() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let list = format!("{a}, {b}");
        let cfg = load(&[("HOME", "/h"), ("TRUSTED_NODE_KEYS", list.as_str())]).unwrap();
        assert_eq!(cfg.trusted_node_keys, vec![a.to_bytes(), b.to_bytes()]);
    }
}
