//! Shared test fixtures: an in-memory gateway, a scripted MPC cluster, keys and layouts.

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::signer::keypair::keypair_from_seed;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::coordinator::{ComputationCoordinator, FinalizationReceipt};
use crate::events::ProgramEvent;
use crate::gateway::{GatewayError, ProgramGateway};
use crate::instructions::{
    ComputationRequest, MpcAccounts, OrderArgs, OrderSide, ProgramCall, ProgramLayout,
};
use crate::ticket::ComputationTicket;

#[derive(Default)]
struct Recorded {
    calls: Vec<ProgramCall>,
    rejected: HashSet<&'static str>,
    unconfirmed: HashSet<&'static str>,
    subscribers: Vec<mpsc::UnboundedSender<ProgramCall>>,
}

/// Accepts every call (except labels marked rejected) and records it.
#[derive(Default)]
pub struct RecordingGateway {
    inner: Mutex<Recorded>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject(&self, label: &'static str) {
        self.inner.lock().unwrap().rejected.insert(label);
    }

    /// Calls with this label are sent but never confirm.
    pub fn time_out(&self, label: &'static str) {
        self.inner.lock().unwrap().unconfirmed.insert(label);
    }

    /// Accepted calls only.
    pub fn calls(&self) -> Vec<ProgramCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls().iter().filter(|c| c.label() == label).count()
    }

    /// Stream of calls accepted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgramCall> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().subscribers.push(tx);
        rx
    }
}

#[async_trait]
impl ProgramGateway for RecordingGateway {
    async fn submit(&self, call: ProgramCall) -> Result<String, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        let label = call.label();
        if inner.rejected.contains(label) {
            return Err(GatewayError::Rejected(format!("{label} refused by test gateway")));
        }
        if inner.unconfirmed.contains(label) {
            return Err(GatewayError::Timeout(60));
        }
        inner.calls.push(call.clone());
        let sig = format!("sig-{}", inner.calls.len());
        inner
            .subscribers
            .retain(|s| s.send(call.clone()).is_ok());
        Ok(sig)
    }
}

/// What the fake cluster does after a computation is queued.
#[derive(Debug, Clone)]
pub enum Signal {
    /// Outcome event for the computation just queued.
    Outcome(ProgramEvent),
    /// Finalization of the computation just queued.
    Finalize,
    OutcomeFor(ComputationTicket, ProgramEvent),
    FinalizeFor(ComputationTicket),
}

/// Answers every queued computation with the signals `script` returns for it.
/// Signals the coordinator refuses are ignored, like stray ledger events would be.
pub fn spawn_cluster<F>(
    coord: Arc<ComputationCoordinator>,
    mut calls: mpsc::UnboundedReceiver<ProgramCall>,
    mut script: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(ComputationTicket, &ComputationRequest) -> Vec<Signal> + Send + 'static,
{
    tokio::spawn(async move {
        let mut n = 0u64;
        while let Some(call) = calls.recv().await {
            let ProgramCall::Queue { ticket, request } = call else {
                continue;
            };
            for signal in script(ticket, &request) {
                n += 1;
                let _ = match signal {
                    Signal::Outcome(ev) => coord.notify_outcome(ticket, ev),
                    Signal::OutcomeFor(t, ev) => coord.notify_outcome(t, ev),
                    Signal::Finalize => coord.notify_finalized(FinalizationReceipt {
                        ticket,
                        signature: format!("cb-{n}"),
                    }),
                    Signal::FinalizeFor(t) => coord.notify_finalized(FinalizationReceipt {
                        ticket: t,
                        signature: format!("cb-{n}"),
                    }),
                };
            }
        }
    })
}

pub fn test_user() -> Pubkey {
    Pubkey::new_from_array([0x55; 32])
}

pub fn order_args(user: Pubkey, order_id: u64) -> OrderArgs {
    OrderArgs {
        user,
        order_id,
        amount_ct: [1; 32],
        price_ct: [2; 32],
        user_enc_pubkey: [3; 32],
        side: OrderSide::Buy,
        order_nonce: 77,
    }
}

pub fn test_keypair(seed: u8) -> Keypair {
    keypair_from_seed(&[seed; 32]).unwrap()
}

pub fn sign_detached(kp: &Keypair, msg: &[u8]) -> [u8; 64] {
    let sig = kp.sign_message(msg);
    let mut out = [0u8; 64];
    out.copy_from_slice(sig.as_ref());
    out
}

pub fn test_layout() -> ProgramLayout {
    ProgramLayout {
        program_id: Pubkey::new_from_array([0x10; 32]),
        mpc: MpcAccounts {
            arcium_program: Pubkey::new_from_array([0x20; 32]),
            cluster: Pubkey::new_from_array([0x21; 32]),
            fee_pool: Pubkey::new_from_array([0x22; 32]),
            clock: Pubkey::new_from_array([0x23; 32]),
        },
        base_mint: Pubkey::new_from_array([0x30; 32]),
        quote_mint: Pubkey::new_from_array([0x31; 32]),
    }
}
