//! Seams between the protocols and the ledger.

use async_trait::async_trait;

use crate::instructions::ProgramCall;
use crate::wire::OrderbookChunks;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The ledger (or local validation) refused the transaction.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("confirmation timeout after {0}s")]
    Timeout(u64),
}

/// Submits one instruction to the ledger and returns the confirmed transaction signature.
#[async_trait]
pub trait ProgramGateway: Send + Sync {
    async fn submit(&self, call: ProgramCall) -> Result<String, GatewayError>;
}

/// Posts a verified orderbook snapshot back on-chain.
#[async_trait]
pub trait FinalizationSubmitter: Send + Sync {
    async fn submit_finalization(&self, chunks: &OrderbookChunks) -> Result<String, GatewayError>;
}

#[async_trait]
impl<G: ProgramGateway + ?Sized> FinalizationSubmitter for G {
    async fn submit_finalization(&self, chunks: &OrderbookChunks) -> Result<String, GatewayError> {
        self.submit(ProgramCall::FinalizeSubmitOrder(Box::new(*chunks)))
            .await
    }
}
