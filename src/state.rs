use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;

use crate::callback::{RecentCallbacks, TrustedNodes};
use crate::config::Config;
use crate::gateway::FinalizationSubmitter;

/// Redeliveries remembered per process.
pub const RECENT_CALLBACKS: usize = 4_096;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    /// Submits `finalize_submit_order` signed by the callback authority.
    pub finalizer: Arc<dyn FinalizationSubmitter>,
    pub callback_authority: Pubkey,
    pub trusted_nodes: Arc<TrustedNodes>,
    pub recent_callbacks: Arc<RecentCallbacks>,
}

impl AppState {
    pub fn new(
        cfg: Config,
        finalizer: Arc<dyn FinalizationSubmitter>,
        callback_authority: Pubkey,
    ) -> Self {
        let trusted_nodes = Arc::new(TrustedNodes::new(cfg.trusted_node_keys.iter().copied()));
        Self {
            cfg: Arc::new(cfg),
            finalizer,
            callback_authority,
            trusted_nodes,
            recent_callbacks: Arc::new(RecentCallbacks::new(RECENT_CALLBACKS)),
        }
    }
}
