//! Check-then-commit order lifecycle.
//!
//! ```text
//! PendingCheck --(check success)--> CheckPassed --(submit_order finalized)--> Committed
//! PendingCheck --(check failure)--> CheckFailed
//! ```
//!
//! `commit` only accepts a [`PassedCheck`], and a `PassedCheck` can only be built from an
//! observed success event for the same order, so the commit computation can never be
//! queued ahead of (or without) a positive check.

use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{info, warn};

use crate::coordinator::{ComputationCoordinator, CoordinatorError, ProtocolTimeouts};
use crate::events::{OrderCheckSucceeded, ProgramEvent};
use crate::instructions::{ComputationRequest, OrderArgs, OrderSide};
use crate::ticket::ComputationTicket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    PendingCheck,
    CheckPassed,
    CheckFailed,
    Committed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::CheckFailed | OrderStatus::Committed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub order_id: u64,
    pub owner: Pubkey,
    pub owner_enc_pubkey: [u8; 32],
    pub amount_ct: [u8; 32],
    pub price_ct: [u8; 32],
    pub side: OrderSide,
    pub nonce: u128,
    pub status: OrderStatus,
}

impl OrderRecord {
    fn from_args(a: &OrderArgs) -> Self {
        Self {
            order_id: a.order_id,
            owner: a.user,
            owner_enc_pubkey: a.user_enc_pubkey,
            amount_ct: a.amount_ct,
            price_ct: a.price_ct,
            side: a.side,
            nonce: a.order_nonce,
            status: OrderStatus::PendingCheck,
        }
    }

    fn args(&self) -> OrderArgs {
        OrderArgs {
            user: self.owner,
            order_id: self.order_id,
            amount_ct: self.amount_ct,
            price_ct: self.price_ct,
            user_enc_pubkey: self.owner_enc_pubkey,
            side: self.side,
            order_nonce: self.nonce,
        }
    }
}

#[derive(Debug)]
pub struct PendingCheck {
    record: OrderRecord,
    ticket: ComputationTicket,
}

impl PendingCheck {
    pub fn record(&self) -> &OrderRecord {
        &self.record
    }

    pub fn ticket(&self) -> ComputationTicket {
        self.ticket
    }
}

/// Proof that the check computation for this order finalized with a success event.
#[derive(Debug)]
pub struct PassedCheck {
    record: OrderRecord,
    event: OrderCheckSucceeded,
}

impl PassedCheck {
    pub fn record(&self) -> &OrderRecord {
        &self.record
    }

    pub fn event(&self) -> &OrderCheckSucceeded {
        &self.event
    }
}

#[derive(Debug)]
pub enum CheckDecision {
    Passed(PassedCheck),
    Failed(OrderRecord),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order {order_id}: {source}")]
    Dispatch {
        order_id: u64,
        source: CoordinatorError,
    },
    #[error("order {order_id}: no check decision: {source}")]
    NoDecision {
        order_id: u64,
        source: CoordinatorError,
    },
    #[error("order {order_id}: commit not finalized: {source}")]
    CommitNotFinalized {
        order_id: u64,
        source: CoordinatorError,
    },
    #[error("order {order_id}: unexpected {event}")]
    EventMismatch { order_id: u64, event: String },
}

pub struct TwoPhaseOrderProtocol {
    coordinator: Arc<ComputationCoordinator>,
    timeouts: ProtocolTimeouts,
}

impl TwoPhaseOrderProtocol {
    pub fn new(coordinator: Arc<ComputationCoordinator>, timeouts: ProtocolTimeouts) -> Self {
        Self {
            coordinator,
            timeouts,
        }
    }

    pub async fn submit_for_check(&self, order: OrderArgs) -> Result<PendingCheck, OrderError> {
        let record = OrderRecord::from_args(&order);
        let ticket = self
            .coordinator
            .dispatch(ComputationRequest::SubmitOrderCheck(order))
            .await
            .map_err(|source| OrderError::Dispatch {
                order_id: record.order_id,
                source,
            })?;
        info!(order_id = record.order_id, %ticket, "order submitted for check");
        Ok(PendingCheck { record, ticket })
    }

    pub async fn await_check(&self, pending: PendingCheck) -> Result<CheckDecision, OrderError> {
        let PendingCheck { mut record, ticket } = pending;
        let order_id = record.order_id;
        let (_receipt, event) = self
            .coordinator
            .resolve(ticket, self.timeouts)
            .await
            .map_err(|source| OrderError::NoDecision { order_id, source })?;

        match event {
            ProgramEvent::OrderCheckSucceeded(ev)
                if ev.order_id == order_id && ev.user == record.owner =>
            {
                if ev.success {
                    record.status = OrderStatus::CheckPassed;
                    info!(order_id, "order check passed");
                    Ok(CheckDecision::Passed(PassedCheck { record, event: ev }))
                } else {
                    record.status = OrderStatus::CheckFailed;
                    info!(order_id, "order check reported success=false");
                    Ok(CheckDecision::Failed(record))
                }
            }
            ProgramEvent::OrderCheckFailed(ev)
                if ev.order_id == order_id && ev.user == record.owner =>
            {
                record.status = OrderStatus::CheckFailed;
                info!(order_id, "order check failed");
                Ok(CheckDecision::Failed(record))
            }
            other => {
                warn!(order_id, event = other.name(), "check outcome does not match order");
                Err(OrderError::EventMismatch {
                    order_id,
                    event: format!("{other:?}"),
                })
            }
        }
    }

    /// Queue the real order submission on the encrypted orderbook and wait for it to land.
    pub async fn commit(&self, passed: PassedCheck) -> Result<OrderRecord, OrderError> {
        let mut record = passed.record;
        let order_id = record.order_id;
        let ticket = self
            .coordinator
            .dispatch(ComputationRequest::SubmitOrder(record.args()))
            .await
            .map_err(|source| OrderError::Dispatch { order_id, source })?;

        let finalized = self
            .coordinator
            .await_finalization(ticket, self.timeouts.finalization)
            .await;
        let processed = self.coordinator.take_outcome(ticket);
        self.coordinator.release(ticket);
        let receipt =
            finalized.map_err(|source| OrderError::CommitNotFinalized { order_id, source })?;

        if let Some(ProgramEvent::OrderProcessed(p)) = processed {
            info!(
                order_id,
                added = p.success,
                buy_count = p.buy_count,
                sell_count = p.sell_count,
                "orderbook updated"
            );
        }
        record.status = OrderStatus::Committed;
        info!(order_id, signature = %receipt.signature, "order committed");
        Ok(record)
    }

    /// Full lifecycle. A failed check is a normal terminal result.
    pub async fn run(&self, order: OrderArgs) -> Result<OrderRecord, OrderError> {
        let pending = self.submit_for_check(order).await?;
        match self.await_check(pending).await? {
            CheckDecision::Passed(passed) => self.commit(passed).await,
            CheckDecision::Failed(record) => Ok(record),
        }
    }
}
