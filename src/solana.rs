//! Solana RPC implementation of the program gateway.
//!
//! Instructions come from `instructions.rs`; this module only signs, sends and waits for
//! confirmation. The RPC client is blocking, so every round-trip runs in `spawn_blocking`.

use async_trait::async_trait;
use solana_client::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use solana_transaction_status::TransactionConfirmationStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::gateway::{GatewayError, ProgramGateway};
use crate::instructions::{finalize_submit_order_ix, ProgramCall, ProgramLayout};

pub fn rpc_client(rpc_url: String) -> RpcClient {
    RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed())
}

pub struct SolanaGateway {
    rpc: Arc<RpcClient>,
    program_id: Pubkey,
    /// Full deployment layout; without it only finalization can be submitted.
    layout: Option<ProgramLayout>,
    authority: Arc<Keypair>,
    confirm_timeout: Duration,
}

impl SolanaGateway {
    pub fn new(
        rpc: Arc<RpcClient>,
        program_id: Pubkey,
        layout: Option<ProgramLayout>,
        authority: Arc<Keypair>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            program_id,
            layout,
            authority,
            confirm_timeout,
        }
    }

    pub fn authority(&self) -> Pubkey {
        self.authority.pubkey()
    }

    fn build(&self, call: &ProgramCall) -> Result<Instruction, GatewayError> {
        let authority = self.authority.pubkey();
        if let ProgramCall::FinalizeSubmitOrder(chunks) = call {
            return Ok(finalize_submit_order_ix(&self.program_id, &authority, chunks));
        }
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| GatewayError::Rejected("program layout not configured".into()))?;
        if let ProgramCall::Queue { request, .. } = call {
            // The queue instructions are signed by the order/ledger owner.
            if request.signer() != authority {
                return Err(GatewayError::Rejected(format!(
                    "{} must be signed by {}, gateway key is {}",
                    call.label(),
                    request.signer(),
                    authority
                )));
            }
        }
        call.instruction(layout, &authority)
            .map_err(|e| GatewayError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl ProgramGateway for SolanaGateway {
    async fn submit(&self, call: ProgramCall) -> Result<String, GatewayError> {
        let ix = self.build(&call)?;
        let label = call.label();
        let rpc = self.rpc.clone();
        let authority = self.authority.clone();
        let timeout = self.confirm_timeout;
        let sig = tokio::task::spawn_blocking(move || {
            let sig = send_instruction(&rpc, &authority, ix)?;
            wait_for_signature_confirmed(&rpc, &sig, timeout)?;
            Ok::<_, GatewayError>(sig)
        })
        .await
        .map_err(|e| GatewayError::Rpc(format!("join error: {e}")))??;
        tracing::info!(call = label, signature = %sig, "transaction confirmed");
        Ok(sig.to_string())
    }
}

/// Sign and send a single-instruction transaction paid by `payer`.
pub fn send_instruction(
    rpc: &RpcClient,
    payer: &Keypair,
    ix: Instruction,
) -> Result<Signature, GatewayError> {
    let bh = rpc
        .get_latest_blockhash()
        .map_err(|e| GatewayError::Rpc(format!("blockhash failed: {e}")))?;
    let mut tx = Transaction::new_unsigned(Message::new(&[ix], Some(&payer.pubkey())));
    tx.try_sign(&[payer], bh)
        .map_err(|e| GatewayError::Rejected(format!("sign tx failed: {e}")))?;
    // Preflight simulation errors surface here, so a program-level refusal is a rejection.
    rpc.send_transaction(&tx)
        .map_err(|e| GatewayError::Rejected(format!("send tx failed: {e}")))
}

/// Block until `sig` is confirmed/finalized, or return an error/timeout.
///
/// Uses RPC polling plus thread sleep; call it from `spawn_blocking`.
pub fn wait_for_signature_confirmed(
    rpc: &RpcClient,
    sig: &Signature,
    timeout: Duration,
) -> Result<(), GatewayError> {
    let t0 = Instant::now();
    let mut backoff_ms: u64 = 250;
    loop {
        if t0.elapsed() > timeout {
            return Err(GatewayError::Timeout(timeout.as_secs()));
        }

        let st = rpc
            .get_signature_statuses(&[*sig])
            .map_err(|e| GatewayError::Rpc(format!("get_signature_statuses failed: {e}")))?;

        if let Some(s0) = st.value.first().and_then(|v| v.as_ref()) {
            if let Some(err) = &s0.err {
                tracing::warn!(?err, signature = %sig, "tx failed while confirming");
                return Err(GatewayError::Rejected(format!("tx failed: {err}")));
            }
            let ok = matches!(
                s0.confirmation_status,
                Some(TransactionConfirmationStatus::Confirmed | TransactionConfirmationStatus::Finalized)
            ) || s0.confirmations.is_none();
            if ok {
                return Ok(());
            }
        }

        std::thread::sleep(Duration::from_millis(backoff_ms));
        backoff_ms = (backoff_ms.saturating_mul(2)).min(2_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::{ComputationRequest, InitLedgerArgs};
    use crate::testing::{test_keypair, test_layout};
    use crate::ticket::ComputationTicket;

    fn gateway(layout: Option<ProgramLayout>) -> SolanaGateway {
        SolanaGateway::new(
            Arc::new(rpc_client("http://127.0.0.1:1".into())),
            Pubkey::new_unique(),
            layout,
            Arc::new(test_keypair(9)),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn finalization_builds_without_layout() {
        let gw = gateway(None);
        let ix = gw
            .build(&ProgramCall::FinalizeSubmitOrder(Box::new([[1u8; 32]; 32])))
            .unwrap();
        assert_eq!(ix.program_id, gw.program_id);
        assert_eq!(ix.accounts[1].pubkey, gw.authority());
    }

    #[test]
    fn queue_needs_layout() {
        let gw = gateway(None);
        let call = ProgramCall::Queue {
            ticket: ComputationTicket::from_offset(1),
            request: ComputationRequest::InitUserLedger(InitLedgerArgs {
                user: gw.authority(),
                user_enc_pubkey: [1; 32],
                nonce: 0,
            }),
        };
        assert!(matches!(gw.build(&call), Err(GatewayError::Rejected(_))));
    }

    #[test]
    fn queue_for_foreign_user_is_rejected() {
        let gw = gateway(Some(test_layout()));
        let call = ProgramCall::Queue {
            ticket: ComputationTicket::from_offset(1),
            request: ComputationRequest::InitUserLedger(InitLedgerArgs {
                user: Pubkey::new_unique(),
                user_enc_pubkey: [1; 32],
                nonce: 0,
            }),
        };
        assert!(matches!(gw.build(&call), Err(GatewayError::Rejected(_))));

        let own = ProgramCall::Queue {
            ticket: ComputationTicket::from_offset(1),
            request: ComputationRequest::InitUserLedger(InitLedgerArgs {
                user: gw.authority(),
                user_enc_pubkey: [1; 32],
                nonce: 0,
            }),
        };
        assert!(gw.build(&own).is_ok());
    }
}
