//! Callback server.
//!
//! - `POST /callback` -> signed orderbook snapshot from an MPC node; verified, then
//!   finalized on-chain with `finalize_submit_order`
//! - `GET  /health`   -> liveness
//! - `GET  /ready`    -> readiness + callback authority
//! - `GET  /metrics`  -> Prometheus (only when `ADMIN_TOKEN` is set)

use matching_coordinator::{config, router, solana, state};
use solana_sdk::signature::{read_keypair_file, Signer};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,matching_coordinator=debug".into()),
        )
        .init();

    let cfg = config::load_config()?;
    let authority = read_keypair_file(&cfg.keypair_path).map_err(|e| {
        anyhow::anyhow!(
            "read callback authority keypair {} failed: {e}",
            cfg.keypair_path.display()
        )
    })?;
    let authority = Arc::new(authority);
    info!(
        "starting callback server (bind={}, program_id={}, rpc_url={}, authority={})",
        cfg.api_bind,
        cfg.program_id,
        cfg.rpc_url,
        authority.pubkey()
    );
    if cfg.trusted_node_keys.is_empty() {
        warn!("TRUSTED_NODE_KEYS unset: any node key with a valid signature is accepted");
    } else {
        info!("callback node allowlist enabled ({} keys)", cfg.trusted_node_keys.len());
    }
    if cfg.admin_token.is_none() {
        info!("ADMIN_TOKEN unset: /metrics disabled");
    }

    let rpc = Arc::new(solana::rpc_client(cfg.rpc_url.clone()));
    let gateway = solana::SolanaGateway::new(
        rpc,
        cfg.program_id,
        None,
        authority.clone(),
        cfg.confirm_timeout,
    );
    let bind = cfg.api_bind.clone();
    let state = state::AppState::new(cfg, Arc::new(gateway), authority.pubkey());
    let app = router::build(state);

    let listener = tokio::net::TcpListener::bind(bind.as_str()).await?;
    info!("api listening on http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}
