//! Follows the matching program's confirmed transactions and feeds their events to the
//! coordinator.
//!
//! Polls `getSignaturesForAddress` for the program id, fetches each new transaction in
//! slot order and decodes its log messages. Failed transactions are skipped: their events
//! were rolled back.

use solana_client::rpc_client::{GetConfirmedSignaturesForAddress2Config, RpcClient};
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::coordinator::{ComputationCoordinator, CoordinatorError};
use crate::events::{decode_logs, TransactionEvents};
use crate::gateway::GatewayError;
use crate::metrics;

const PAGE_LIMIT: usize = 1_000;

pub struct LedgerWatcher {
    rpc: Arc<RpcClient>,
    program_id: Pubkey,
    mpc_program_id: Pubkey,
    coordinator: Arc<ComputationCoordinator>,
    poll: Duration,
    /// Newest signature already processed.
    cursor: Option<Signature>,
}

impl LedgerWatcher {
    pub fn new(
        rpc: Arc<RpcClient>,
        program_id: Pubkey,
        mpc_program_id: Pubkey,
        coordinator: Arc<ComputationCoordinator>,
        poll: Duration,
    ) -> Self {
        Self {
            rpc,
            program_id,
            mpc_program_id,
            coordinator,
            poll,
            cursor: None,
        }
    }

    /// Start from the current head so history from before start-up is not replayed.
    pub async fn start_at_head(&mut self) -> Result<(), GatewayError> {
        let head = self.signatures(None, None, 1).await?;
        self.cursor = head.first().map(|(s, _)| *s);
        info!(
            program_id = %self.program_id,
            cursor = ?self.cursor.map(|s| s.to_string()),
            "ledger watcher positioned"
        );
        Ok(())
    }

    pub async fn run(mut self) {
        if self.cursor.is_none() {
            if let Err(e) = self.start_at_head().await {
                warn!(error = %e, "could not read program head, watching from full history");
            }
        }
        loop {
            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!(transactions = n, "watcher caught up"),
                Err(e) => warn!(error = %e, "watcher poll failed"),
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Process every transaction newer than the cursor. Returns how many carried events.
    pub async fn poll_once(&mut self) -> Result<usize, GatewayError> {
        let mut fresh: Vec<(Signature, bool)> = Vec::new();
        let mut before: Option<Signature> = None;
        loop {
            let page = self.signatures(before, self.cursor, PAGE_LIMIT).await?;
            let full = page.len() == PAGE_LIMIT;
            before = page.last().map(|(s, _)| *s);
            fresh.extend(page);
            if !full || before.is_none() {
                break;
            }
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut seen = 0;
        // Oldest first, so outcomes are routed in ledger order. The cursor only moves past
        // transactions that were handled; a failed fetch stops the pass and is retried.
        for (sig, ok) in fresh.into_iter().rev() {
            if ok {
                let tx = match self.transaction(sig).await {
                    Ok(tx) => tx,
                    Err(e) => {
                        warn!(signature = %sig, error = %e, "could not fetch transaction, retrying next poll");
                        break;
                    }
                };
                if self.route(&sig, tx) {
                    seen += 1;
                }
            } else {
                debug!(signature = %sig, "skipping failed transaction");
            }
            self.cursor = Some(sig);
        }
        Ok(seen)
    }

    /// Decode and deliver one fetched transaction. `false` if it carried no events.
    fn route(&self, sig: &Signature, tx: EncodedConfirmedTransactionWithStatusMeta) -> bool {
        let Some(logs) = transaction_logs(tx) else {
            return false;
        };
        let events = decode_logs(&sig.to_string(), &logs, &self.program_id, &self.mpc_program_id);
        if events.is_empty() {
            return false;
        }
        deliver(&self.coordinator, &events);
        true
    }

    /// Newest first, with whether the transaction succeeded.
    async fn signatures(
        &self,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<(Signature, bool)>, GatewayError> {
        let rpc = self.rpc.clone();
        let program_id = self.program_id;
        let cfg = GetConfirmedSignaturesForAddress2Config {
            limit: Some(limit),
            before,
            until,
            commitment: Some(CommitmentConfig::confirmed()),
        };
        let page = tokio::task::spawn_blocking(move || {
            rpc.get_signatures_for_address_with_config(&program_id, cfg)
        })
        .await
        .map_err(|e| GatewayError::Rpc(format!("join error: {e}")))?
        .map_err(|e| GatewayError::Rpc(format!("get_signatures_for_address failed: {e}")))?;
        Ok(page
            .iter()
            .filter_map(|i| {
                Signature::from_str(&i.signature)
                    .ok()
                    .map(|s| (s, i.err.is_none()))
            })
            .collect())
    }

    async fn transaction(
        &self,
        sig: Signature,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta, GatewayError> {
        let rpc = self.rpc.clone();
        let cfg = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            max_supported_transaction_version: Some(0),
            commitment: Some(CommitmentConfig::confirmed()),
        };
        tokio::task::spawn_blocking(move || rpc.get_transaction_with_config(&sig, cfg))
            .await
            .map_err(|e| GatewayError::Rpc(format!("join error: {e}")))?
            .map_err(|e| GatewayError::Rpc(format!("get_transaction failed: {e}")))
    }
}

fn transaction_logs(tx: EncodedConfirmedTransactionWithStatusMeta) -> Option<Vec<String>> {
    let meta = tx.transaction.meta?;
    Option::<Vec<String>>::from(meta.log_messages)
}

/// Hand one transaction's events to the coordinator. Signals for tickets this process
/// never dispatched (other cranker instances, abandoned flows) are expected and only logged.
pub fn deliver(coordinator: &ComputationCoordinator, events: &TransactionEvents) {
    metrics::metrics().watcher_transactions_total.inc();
    for err in coordinator.ingest(events) {
        match err {
            CoordinatorError::UnknownTicket(ticket) => {
                debug!(signature = %events.signature, %ticket, "finalization for foreign ticket")
            }
            other => warn!(signature = %events.signature, error = %other, "event not routed"),
        }
    }
}
