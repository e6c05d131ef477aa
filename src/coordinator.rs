//! Correlates dispatched MPC computations with their finalization and outcome events.
//!
//! Every dispatch registers an in-flight slot keyed by a fresh [`ComputationTicket`]
//! *before* the queue transaction is sent, so signals that race ahead of the caller are
//! buffered instead of lost. A slot holds two one-shot channels: one for the
//! finalization receipt and one for the single typed business outcome. Only the first
//! signal of each kind is delivered; duplicates are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::events::{ProgramEvent, TransactionEvents};
use crate::gateway::{GatewayError, ProgramGateway};
use crate::instructions::{ComputationKind, ComputationRequest, ProgramCall};
use crate::metrics;
use crate::ticket::ComputationTicket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizationReceipt {
    pub ticket: ComputationTicket,
    /// Signature of the ledger transaction that carried the finalization.
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTimeouts {
    pub finalization: Duration,
    pub event: Duration,
}

impl Default for ProtocolTimeouts {
    fn default() -> Self {
        Self {
            finalization: Duration::from_secs(120),
            event: Duration::from_secs(60),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("{call} dispatch rejected: {source}")]
    DispatchRejected {
        call: &'static str,
        source: GatewayError,
    },
    /// The queue transaction was sent but not confirmed in time. It may still land and the
    /// computation may still run under `ticket`; its slot is released all the same.
    #[error("{call} for ticket {ticket} unconfirmed: {source}")]
    DispatchUnconfirmed {
        call: &'static str,
        ticket: ComputationTicket,
        source: GatewayError,
    },
    #[error("ticket {ticket} timed out after {waited_ms}ms")]
    Timeout {
        ticket: ComputationTicket,
        waited_ms: u64,
    },
    #[error("unknown ticket {0}")]
    UnknownTicket(ComputationTicket),
    #[error("ticket {0} is already being awaited")]
    AlreadyAwaited(ComputationTicket),
    #[error("ticket {0} was abandoned")]
    Abandoned(ComputationTicket),
    #[error("ticket {ticket} ({kind}) cannot accept {event}")]
    UnexpectedEvent {
        ticket: ComputationTicket,
        kind: &'static str,
        event: &'static str,
    },
}

/// Whether `event` is a business outcome of a computation of `kind`.
pub fn expects(kind: ComputationKind, event: &ProgramEvent) -> bool {
    matches!(
        (kind, event),
        (
            ComputationKind::SubmitOrderCheck,
            ProgramEvent::OrderCheckSucceeded(_) | ProgramEvent::OrderCheckFailed(_)
        ) | (ComputationKind::SubmitOrder, ProgramEvent::OrderProcessed(_))
            | (ComputationKind::InitUserLedger, ProgramEvent::UserLedgerInitialized(_))
            | (ComputationKind::DepositToLedger, ProgramEvent::UserLedgerDeposited(_))
            | (
                ComputationKind::WithdrawVerify,
                ProgramEvent::WithdrawVerified(_) | ProgramEvent::WithdrawRejected(_)
            )
            | (ComputationKind::MatchOrders, ProgramEvent::MatchResult(_))
    )
}

struct Slot<T> {
    tx: Option<oneshot::Sender<T>>,
    rx: Option<oneshot::Receiver<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }

    /// `false` if a value was already delivered.
    fn deliver(&mut self, v: T) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // A dropped receiver means the waiter went away; the slot is about to be released.
                let _ = tx.send(v);
                true
            }
            None => false,
        }
    }
}

struct InFlight {
    kind: ComputationKind,
    dispatched_at: Instant,
    finalized: Slot<FinalizationReceipt>,
    outcome: Slot<ProgramEvent>,
}

impl InFlight {
    fn new(kind: ComputationKind) -> Self {
        Self {
            kind,
            dispatched_at: Instant::now(),
            finalized: Slot::new(),
            outcome: Slot::new(),
        }
    }
}

pub struct ComputationCoordinator {
    gateway: Arc<dyn ProgramGateway>,
    inflight: Mutex<HashMap<ComputationTicket, InFlight>>,
}

impl ComputationCoordinator {
    pub fn new(gateway: Arc<dyn ProgramGateway>) -> Self {
        Self {
            gateway,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ComputationTicket, InFlight>> {
        // The map holds no invariants a panicking holder could break halfway.
        self.inflight.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn in_flight(&self) -> usize {
        self.slots().len()
    }

    fn register(&self, kind: ComputationKind) -> ComputationTicket {
        let mut slots = self.slots();
        let ticket = loop {
            let t = ComputationTicket::random();
            if !slots.contains_key(&t) {
                break t;
            }
        };
        slots.insert(ticket, InFlight::new(kind));
        metrics::metrics().computations_in_flight.set(slots.len() as i64);
        ticket
    }

    /// Queue `request` on the ledger under a fresh ticket. No retry on rejection.
    pub async fn dispatch(
        &self,
        request: ComputationRequest,
    ) -> Result<ComputationTicket, CoordinatorError> {
        let kind = request.kind();
        let ticket = self.register(kind);
        metrics::metrics().computations_dispatched_total.inc();
        match self.gateway.submit(ProgramCall::Queue { ticket, request }).await {
            Ok(signature) => {
                info!(%ticket, circuit = kind.circuit(), %signature, "computation queued");
                Ok(ticket)
            }
            Err(source @ GatewayError::Timeout(_)) => {
                self.release(ticket);
                warn!(%ticket, circuit = kind.circuit(), error = %source, "dispatch unconfirmed, computation may still run");
                Err(CoordinatorError::DispatchUnconfirmed {
                    call: kind.method(),
                    ticket,
                    source,
                })
            }
            Err(source) => {
                self.release(ticket);
                warn!(%ticket, circuit = kind.circuit(), error = %source, "dispatch rejected");
                Err(CoordinatorError::DispatchRejected {
                    call: kind.method(),
                    source,
                })
            }
        }
    }

    /// Plain submission with no computation attached (e.g. the vault transfer).
    pub async fn execute(&self, call: ProgramCall) -> Result<String, CoordinatorError> {
        let label = call.label();
        self.gateway
            .submit(call)
            .await
            .map_err(|source| CoordinatorError::DispatchRejected { call: label, source })
    }

    pub async fn await_finalization(
        &self,
        ticket: ComputationTicket,
        timeout: Duration,
    ) -> Result<FinalizationReceipt, CoordinatorError> {
        let rx = {
            let mut slots = self.slots();
            let slot = slots
                .get_mut(&ticket)
                .ok_or(CoordinatorError::UnknownTicket(ticket))?;
            slot.finalized
                .rx
                .take()
                .ok_or(CoordinatorError::AlreadyAwaited(ticket))?
        };
        self.wait(ticket, rx, timeout).await
    }

    pub async fn await_outcome(
        &self,
        ticket: ComputationTicket,
        timeout: Duration,
    ) -> Result<ProgramEvent, CoordinatorError> {
        let rx = {
            let mut slots = self.slots();
            let slot = slots
                .get_mut(&ticket)
                .ok_or(CoordinatorError::UnknownTicket(ticket))?;
            slot.outcome
                .rx
                .take()
                .ok_or(CoordinatorError::AlreadyAwaited(ticket))?
        };
        self.wait(ticket, rx, timeout).await
    }

    async fn wait<T>(
        &self,
        ticket: ComputationTicket,
        rx: oneshot::Receiver<T>,
        timeout: Duration,
    ) -> Result<T, CoordinatorError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(_)) => Err(CoordinatorError::Abandoned(ticket)),
            Err(_) => {
                metrics::metrics().computation_timeouts_total.inc();
                self.release(ticket);
                warn!(%ticket, waited_ms = timeout.as_millis() as u64, "computation wait timed out");
                Err(CoordinatorError::Timeout {
                    ticket,
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Await finalization and then the outcome of `ticket`, releasing the slot either way.
    pub async fn resolve(
        &self,
        ticket: ComputationTicket,
        timeouts: ProtocolTimeouts,
    ) -> Result<(FinalizationReceipt, ProgramEvent), CoordinatorError> {
        let res = async {
            let receipt = self.await_finalization(ticket, timeouts.finalization).await?;
            let outcome = self.await_outcome(ticket, timeouts.event).await?;
            Ok::<_, CoordinatorError>((receipt, outcome))
        }
        .await;
        self.release(ticket);
        res
    }

    /// Outcome already delivered for `ticket`, without waiting.
    pub fn take_outcome(&self, ticket: ComputationTicket) -> Option<ProgramEvent> {
        let mut slots = self.slots();
        let rx = slots.get_mut(&ticket)?.outcome.rx.as_mut()?;
        rx.try_recv().ok()
    }

    /// Drop the slot of `ticket`. Later signals for it are rejected as unknown.
    pub fn release(&self, ticket: ComputationTicket) {
        let mut slots = self.slots();
        if let Some(slot) = slots.remove(&ticket) {
            debug!(
                %ticket,
                circuit = slot.kind.circuit(),
                held_ms = slot.dispatched_at.elapsed().as_millis() as u64,
                "released computation slot"
            );
        }
        metrics::metrics().computations_in_flight.set(slots.len() as i64);
    }

    pub fn notify_finalized(
        &self,
        receipt: FinalizationReceipt,
    ) -> Result<(), CoordinatorError> {
        let ticket = receipt.ticket;
        let mut slots = self.slots();
        let slot = slots
            .get_mut(&ticket)
            .ok_or(CoordinatorError::UnknownTicket(ticket))?;
        if !slot.finalized.deliver(receipt) {
            debug!(%ticket, "duplicate finalization dropped");
        }
        Ok(())
    }

    pub fn notify_outcome(
        &self,
        ticket: ComputationTicket,
        event: ProgramEvent,
    ) -> Result<(), CoordinatorError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(&ticket)
            .ok_or(CoordinatorError::UnknownTicket(ticket))?;
        if !expects(slot.kind, &event) {
            return Err(CoordinatorError::UnexpectedEvent {
                ticket,
                kind: slot.kind.circuit(),
                event: event.name(),
            });
        }
        let name = event.name();
        if !slot.outcome.deliver(event) {
            debug!(%ticket, event = name, "duplicate outcome dropped");
        }
        Ok(())
    }

    /// Route the events of one ledger transaction.
    ///
    /// Outcome events carry no ticket; they belong to the computation finalized in the same
    /// transaction. An event is delivered only when exactly one in-flight ticket finalized
    /// there expects it. Outcomes are delivered before the finalization so a waiter that
    /// wakes on finalization always finds its outcome buffered.
    pub fn ingest(&self, tx: &TransactionEvents) -> Vec<CoordinatorError> {
        let mut errors = Vec::new();
        let kinds: Vec<(ComputationTicket, Option<ComputationKind>)> = {
            let slots = self.slots();
            tx.finalizations
                .iter()
                .map(|f| (f.ticket(), slots.get(&f.ticket()).map(|s| s.kind)))
                .collect()
        };

        for event in &tx.program_events {
            let candidates: Vec<ComputationTicket> = kinds
                .iter()
                .filter(|(_, k)| k.map(|k| expects(k, event)).unwrap_or(false))
                .map(|(t, _)| *t)
                .collect();
            match candidates.as_slice() {
                [ticket] => {
                    if let Err(e) = self.notify_outcome(*ticket, event.clone()) {
                        errors.push(e);
                    }
                }
                [] => debug!(
                    signature = %tx.signature,
                    event = event.name(),
                    "event has no in-flight computation"
                ),
                many => warn!(
                    signature = %tx.signature,
                    event = event.name(),
                    candidates = many.len(),
                    "ambiguous event attribution, dropped"
                ),
            }
        }

        for (ticket, _) in &kinds {
            let receipt = FinalizationReceipt {
                ticket: *ticket,
                signature: tx.signature.clone(),
            };
            if let Err(e) = self.notify_finalized(receipt) {
                errors.push(e);
            }
        }
        errors
    }
}
