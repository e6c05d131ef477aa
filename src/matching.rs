//! Operator-triggered matching over the encrypted orderbook.
//!
//! `trigger_matching` queues the `match_orders` circuit. Completion is the finalization of
//! that computation; a `MatchResultEvent` is picked up when the callback emits one.

use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::coordinator::{ComputationCoordinator, CoordinatorError};
use crate::events::{MatchResult, ProgramEvent};
use crate::instructions::{ComputationRequest, MatchOrdersArgs};
use crate::ticket::ComputationTicket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRound {
    pub ticket: ComputationTicket,
    /// Callback transaction that wrote the matched orderbook back.
    pub signature: String,
    pub result: Option<MatchResult>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("match_orders dispatch: {0}")]
    Dispatch(CoordinatorError),
    #[error("match_orders not finalized: {0}")]
    NotFinalized(CoordinatorError),
}

pub struct MatchingTrigger {
    coordinator: Arc<ComputationCoordinator>,
    finalization_timeout: Duration,
}

impl MatchingTrigger {
    pub fn new(coordinator: Arc<ComputationCoordinator>, finalization_timeout: Duration) -> Self {
        Self {
            coordinator,
            finalization_timeout,
        }
    }

    pub async fn run(&self, operator: Pubkey) -> Result<MatchRound, MatchError> {
        let ticket = self
            .coordinator
            .dispatch(ComputationRequest::MatchOrders(MatchOrdersArgs { operator }))
            .await
            .map_err(MatchError::Dispatch)?;

        let finalized = self
            .coordinator
            .await_finalization(ticket, self.finalization_timeout)
            .await;
        let outcome = self.coordinator.take_outcome(ticket);
        self.coordinator.release(ticket);
        let receipt = finalized.map_err(MatchError::NotFinalized)?;

        let result = match outcome {
            Some(ProgramEvent::MatchResult(r)) => Some(r),
            _ => None,
        };
        info!(
            %ticket,
            signature = %receipt.signature,
            with_result = result.is_some(),
            "matching round finalized"
        );
        Ok(MatchRound {
            ticket,
            signature: receipt.signature,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::ProgramCall;
    use crate::testing::{spawn_cluster, RecordingGateway, Signal};

    fn matched() -> MatchResult {
        MatchResult {
            results: [7; 32],
            nonce: 1,
            orderbook_nonce: 2,
            timestamp: 1_700_000_000,
        }
    }

    fn trigger<F>(script: F) -> (Arc<RecordingGateway>, Arc<ComputationCoordinator>, MatchingTrigger)
    where
        F: FnMut(ComputationTicket, &ComputationRequest) -> Vec<Signal> + Send + 'static,
    {
        let gw = RecordingGateway::new();
        let coord = Arc::new(ComputationCoordinator::new(gw.clone()));
        spawn_cluster(coord.clone(), gw.subscribe(), script);
        let t = MatchingTrigger::new(coord.clone(), Duration::from_millis(200));
        (gw, coord, t)
    }

    #[tokio::test]
    async fn finalized_round_reports_result() {
        let (gw, coord, t) = trigger(|_, req| match req {
            ComputationRequest::MatchOrders(_) => {
                vec![Signal::Outcome(ProgramEvent::MatchResult(matched())), Signal::Finalize]
            }
            _ => vec![],
        });
        let operator = Pubkey::new_unique();
        let round = t.run(operator).await.unwrap();
        assert_eq!(round.result, Some(matched()));
        assert!(round.signature.starts_with("cb-"));
        assert_eq!(gw.count("trigger_matching"), 1);
        match &gw.calls()[0] {
            ProgramCall::Queue { request, .. } => assert_eq!(request.signer(), operator),
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(coord.in_flight(), 0);
    }

    #[tokio::test]
    async fn finalization_alone_completes_the_round() {
        let (_gw, _coord, t) = trigger(|_, _| vec![Signal::Finalize]);
        let round = t.run(Pubkey::new_unique()).await.unwrap();
        assert_eq!(round.result, None);
    }

    #[tokio::test]
    async fn missing_finalization_times_out() {
        let (_gw, coord, t) = trigger(|_, _| vec![]);
        let err = t.run(Pubkey::new_unique()).await.unwrap_err();
        assert!(matches!(
            err,
            MatchError::NotFinalized(CoordinatorError::Timeout { .. })
        ));
        assert_eq!(coord.in_flight(), 0);
    }
}
