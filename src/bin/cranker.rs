//! Drives order and ledger flows against a live cluster.
//!
//! The keypair at `KEYPAIR_PATH` is fee payer, user, and the operator for `match`.
//! Ciphertexts and the user's x25519 key are produced client-side and passed in as hex.

use anyhow::Context;
use matching_coordinator::config;
use matching_coordinator::coordinator::ComputationCoordinator;
use matching_coordinator::instructions::{
    InitLedgerArgs, LedgerAsset, LedgerTransferArgs, OrderArgs, OrderSide,
};
use matching_coordinator::ledger::{LedgerUpdateProtocol, WithdrawOutcome};
use matching_coordinator::matching::MatchingTrigger;
use matching_coordinator::order::TwoPhaseOrderProtocol;
use matching_coordinator::solana::{rpc_client, SolanaGateway};
use matching_coordinator::watcher::LedgerWatcher;
use solana_sdk::signature::{read_keypair_file, Signer};
use std::sync::Arc;
use tracing::info;

const USAGE: &str = "usage:
  cranker order <order_id> <buy|sell> <amount_ct_hex> <price_ct_hex> <enc_pubkey_hex> <nonce>
  cranker init-ledger <enc_pubkey_hex> <nonce>
  cranker deposit <base|quote> <amount> <enc_pubkey_hex>
  cranker withdraw <base|quote> <amount> <enc_pubkey_hex>
  cranker match";

fn hex32(field: &str, s: &str) -> anyhow::Result<[u8; 32]> {
    let t = s.trim().trim_start_matches("0x");
    let mut out = [0u8; 32];
    hex::decode_to_slice(t, &mut out)
        .with_context(|| format!("{field} must be 32-byte hex (64 chars)"))?;
    Ok(out)
}

fn arg<'a>(args: &'a [String], i: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing <{name}>\n{USAGE}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,matching_coordinator=debug".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = arg(&args, 0, "command")?;

    let cfg = config::load_config()?;
    let layout = cfg.program_layout()?;
    let payer = read_keypair_file(&cfg.keypair_path).map_err(|e| {
        anyhow::anyhow!("read keypair {} failed: {e}", cfg.keypair_path.display())
    })?;
    let payer = Arc::new(payer);
    let user = payer.pubkey();
    info!(
        "cranker {} (program_id={}, rpc_url={}, user={})",
        cmd, cfg.program_id, cfg.rpc_url, user
    );

    let rpc = Arc::new(rpc_client(cfg.rpc_url.clone()));
    let gateway = SolanaGateway::new(
        rpc.clone(),
        cfg.program_id,
        Some(layout),
        payer.clone(),
        cfg.confirm_timeout,
    );
    let coordinator = Arc::new(ComputationCoordinator::new(Arc::new(gateway)));

    let mut watcher = LedgerWatcher::new(
        rpc,
        cfg.program_id,
        layout.mpc.arcium_program,
        coordinator.clone(),
        cfg.watch_poll,
    );
    // Position before dispatching so the first finalization is not skipped.
    watcher
        .start_at_head()
        .await
        .context("reading program transaction head")?;
    tokio::spawn(watcher.run());

    let out = match cmd {
        "order" => {
            let order = OrderArgs {
                user,
                order_id: arg(&args, 1, "order_id")?.parse().context("order_id")?,
                side: arg(&args, 2, "side")?
                    .parse::<OrderSide>()
                    .map_err(anyhow::Error::msg)?,
                amount_ct: hex32("amount_ct", arg(&args, 3, "amount_ct_hex")?)?,
                price_ct: hex32("price_ct", arg(&args, 4, "price_ct_hex")?)?,
                user_enc_pubkey: hex32("enc_pubkey", arg(&args, 5, "enc_pubkey_hex")?)?,
                order_nonce: arg(&args, 6, "nonce")?.parse().context("nonce")?,
            };
            let proto = TwoPhaseOrderProtocol::new(coordinator, cfg.timeouts);
            let rec = proto.run(order).await?;
            serde_json::json!({
                "order_id": rec.order_id,
                "status": format!("{:?}", rec.status),
            })
        }
        "init-ledger" => {
            let proto = LedgerUpdateProtocol::new(coordinator, cfg.timeouts);
            proto
                .initialize(InitLedgerArgs {
                    user,
                    user_enc_pubkey: hex32("enc_pubkey", arg(&args, 1, "enc_pubkey_hex")?)?,
                    nonce: arg(&args, 2, "nonce")?.parse().context("nonce")?,
                })
                .await?;
            serde_json::json!({ "user": user.to_string(), "initialized": true })
        }
        "deposit" | "withdraw" => {
            let req = LedgerTransferArgs {
                user,
                asset: arg(&args, 1, "asset")?
                    .parse::<LedgerAsset>()
                    .map_err(anyhow::Error::msg)?,
                amount: arg(&args, 2, "amount")?.parse().context("amount")?,
                user_enc_pubkey: hex32("enc_pubkey", arg(&args, 3, "enc_pubkey_hex")?)?,
            };
            let proto = LedgerUpdateProtocol::new(coordinator, cfg.timeouts);
            if cmd == "deposit" {
                let ledger = proto.deposit(req).await?;
                serde_json::json!({
                    "user": ledger.owner.to_string(),
                    "balance_nonce": ledger.balance_nonce.to_string(),
                })
            } else {
                match proto.withdraw(req).await? {
                    WithdrawOutcome::Transferred { signature, ledger } => serde_json::json!({
                        "withdrawn": true,
                        "signature": signature,
                        "balance_nonce": ledger.balance_nonce.to_string(),
                    }),
                    WithdrawOutcome::Rejected { user, amount } => serde_json::json!({
                        "withdrawn": false,
                        "user": user.to_string(),
                        "amount": amount,
                    }),
                }
            }
        }
        "match" => {
            let trigger = MatchingTrigger::new(coordinator, cfg.timeouts.finalization);
            let round = trigger.run(user).await?;
            serde_json::json!({
                "ticket": round.ticket.to_string(),
                "signature": round.signature,
                "match_result": round.result.map(|r| serde_json::json!({
                    "results": hex::encode(r.results),
                    "nonce": r.nonce.to_string(),
                    "orderbook_nonce": r.orderbook_nonce.to_string(),
                    "timestamp": r.timestamp,
                })),
            })
        }
        other => anyhow::bail!("unknown command {other}\n{USAGE}"),
    };
    println!("{out}");
    Ok(())
}
