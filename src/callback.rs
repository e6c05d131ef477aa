//! MPC node callback pipeline: decode, authenticate, split into chunks, finalize on-chain.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::gateway::{FinalizationSubmitter, GatewayError};
use crate::metrics;
use crate::verify::verify_detached;
use crate::wire::{self, DecodeError, ORDERBOOK_CHUNK_COUNT, PUBKEY_LEN, SIGNATURE_LEN};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("malformed callback: {0}")]
    Malformed(#[from] DecodeError),
    #[error("unauthenticated callback: {0}")]
    Unauthenticated(&'static str),
    #[error("finalization submission failed: {0}")]
    Submission(GatewayError),
}

impl CallbackError {
    pub fn reason(&self) -> &'static str {
        match self {
            CallbackError::Malformed(_) => "malformed",
            CallbackError::Unauthenticated(_) => "signature",
            CallbackError::Submission(_) => "submission",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackAck {
    pub success: bool,
    pub message: String,
    pub chunks: usize,
    /// Signature of the `finalize_submit_order` transaction.
    pub signature: String,
}

/// Node keys allowed to sign callbacks. Empty means any key with a valid signature.
#[derive(Debug, Clone, Default)]
pub struct TrustedNodes {
    keys: HashSet<[u8; PUBKEY_LEN]>,
}

impl TrustedNodes {
    pub fn new(keys: impl IntoIterator<Item = [u8; PUBKEY_LEN]>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn allows(&self, key: &[u8; PUBKEY_LEN]) -> bool {
        self.keys.is_empty() || self.keys.contains(key)
    }
}

/// Remembers the finalization signature of recently accepted callbacks, keyed by the
/// node's data signature, so a redelivered callback is acknowledged without a second
/// on-chain submission.
pub struct RecentCallbacks {
    cap: usize,
    inner: Mutex<(HashMap<[u8; SIGNATURE_LEN], String>, VecDeque<[u8; SIGNATURE_LEN]>)>,
}

impl RecentCallbacks {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            inner: Mutex::new((HashMap::new(), VecDeque::new())),
        }
    }

    fn get(&self, data_sig: &[u8; SIGNATURE_LEN]) -> Option<String> {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        g.0.get(data_sig).cloned()
    }

    fn insert(&self, data_sig: [u8; SIGNATURE_LEN], signature: String) {
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let (map, order) = &mut *g;
        if map.insert(data_sig, signature).is_none() {
            order.push_back(data_sig);
        }
        while order.len() > self.cap {
            if let Some(old) = order.pop_front() {
                map.remove(&old);
            }
        }
    }
}

pub struct CallbackProcessor<'a> {
    pub submitter: &'a dyn FinalizationSubmitter,
    pub trusted: &'a TrustedNodes,
    pub recent: &'a RecentCallbacks,
}

impl CallbackProcessor<'_> {
    /// Runs one raw callback body to completion. Nothing is submitted unless the data
    /// signature verifies against the node key in the payload.
    pub async fn process(&self, raw: &[u8]) -> Result<CallbackAck, CallbackError> {
        let t0 = Instant::now();
        metrics::metrics().callback_requests_total.inc();
        let res = self.process_inner(raw).await;
        metrics::metrics()
            .callback_ms
            .observe(t0.elapsed().as_millis() as f64);
        match &res {
            Ok(_) => {
                metrics::metrics().callback_accepted_total.inc();
            }
            Err(e) => metrics::inc_callback_rejection(e.reason()),
        }
        res
    }

    async fn process_inner(&self, raw: &[u8]) -> Result<CallbackAck, CallbackError> {
        let payload = wire::decode(raw).map_err(|e| {
            warn!(len = raw.len(), error = %e, "malformed callback body");
            CallbackError::Malformed(e)
        })?;
        debug!(
            mempool_id = payload.mempool_id,
            comp_def_offset = payload.comp_def_offset,
            tx_sig = %hex::encode(&payload.tx_sig[..10]),
            node = %hex::encode(payload.pub_key),
            data_len = payload.data.len(),
            "callback decoded"
        );

        if !verify_detached(&payload.data, &payload.data_sig, &payload.pub_key) {
            warn!(
                security_event = true,
                node = %hex::encode(payload.pub_key),
                mempool_id = payload.mempool_id,
                "invalid callback signature, rejected"
            );
            return Err(CallbackError::Unauthenticated("invalid signature"));
        }
        if !self.trusted.allows(&payload.pub_key) {
            warn!(
                security_event = true,
                node = %hex::encode(payload.pub_key),
                "callback signed by untrusted node key, rejected"
            );
            return Err(CallbackError::Unauthenticated("untrusted node key"));
        }

        let chunks = wire::decode_orderbook_chunks(&payload.data)?;

        if let Some(signature) = self.recent.get(&payload.data_sig) {
            info!(%signature, "duplicate callback delivery, finalization already submitted");
            return Ok(CallbackAck {
                success: true,
                message: "Orderbook already finalized on-chain".into(),
                chunks: ORDERBOOK_CHUNK_COUNT,
                signature,
            });
        }

        match self.submitter.submit_finalization(&chunks).await {
            Ok(signature) => {
                metrics::metrics().finalizations_submitted_total.inc();
                info!(%signature, chunks = chunks.len(), "orderbook finalized on-chain");
                self.recent.insert(payload.data_sig, signature.clone());
                Ok(CallbackAck {
                    success: true,
                    message: "Orderbook finalized on-chain".into(),
                    chunks: chunks.len(),
                    signature,
                })
            }
            Err(e) => {
                // Already authenticated; keep it so an operator can replay the finalization.
                error!(
                    error = %e,
                    snapshot = %hex::encode(payload.data.as_slice()),
                    "finalization submission failed"
                );
                Err(CallbackError::Submission(e))
            }
        }
    }
}
