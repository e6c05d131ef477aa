use axum::body::Bytes;
use axum::extract::State;
use axum::Json;

use crate::callback::{CallbackAck, CallbackProcessor};
use crate::state::AppState;
use crate::types::{api_err, ApiResult, HealthResponse, ReadyResponse};

pub const SERVICE_NAME: &str = "Matching Engine Callback Server";

/// Raw binary callback from an MPC node.
pub async fn callback(State(st): State<AppState>, body: Bytes) -> ApiResult<CallbackAck> {
    let processor = CallbackProcessor {
        submitter: st.finalizer.as_ref(),
        trusted: &st.trusted_nodes,
        recent: &st.recent_callbacks,
    };
    match processor.process(&body).await {
        Ok(ack) => Ok(Json(ack)),
        Err(e) => api_err(e.into()),
    }
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn ready(State(st): State<AppState>) -> ApiResult<ReadyResponse> {
    // The server only starts once the authority keypair has been loaded.
    Ok(Json(ReadyResponse {
        ready: true,
        callback_authority: st.callback_authority.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from;
    use crate::testing::{sign_detached, test_keypair, RecordingGateway};
    use crate::wire::{encode, CallbackPayload, ORDERBOOK_SNAPSHOT_LEN};
    use axum::http::StatusCode;
    use solana_sdk::signature::Signer;
    use std::sync::Arc;

    fn state(gw: Arc<RecordingGateway>, admin: Option<&str>) -> AppState {
        let admin = admin.map(str::to_string);
        let cfg = load_config_from(|k| match k {
            "HOME" => Some("/tmp".into()),
            "ADMIN_TOKEN" => admin.clone(),
            _ => None,
        })
        .unwrap();
        AppState::new(cfg, gw, test_keypair(5).pubkey())
    }

    fn body(flip: Option<usize>) -> Bytes {
        let kp = test_keypair(1);
        let mut data = vec![0u8; ORDERBOOK_SNAPSHOT_LEN];
        let data_sig = sign_detached(&kp, &data);
        if let Some(i) = flip {
            data[i] ^= 0x80;
        }
        Bytes::from(encode(&CallbackPayload {
            mempool_id: 7,
            comp_def_offset: 3,
            tx_sig: [0; 64],
            data_sig,
            pub_key: kp.pubkey().to_bytes(),
            data,
        }))
    }

    #[tokio::test]
    async fn callback_ok() {
        let gw = RecordingGateway::new();
        let Json(ack) = callback(State(state(gw.clone(), None)), body(None)).await.unwrap();
        assert!(ack.success);
        assert_eq!(ack.message, "Orderbook finalized on-chain");
        assert_eq!(ack.chunks, 32);
        assert_eq!(gw.count("finalize_submit_order"), 1);
    }

    #[tokio::test]
    async fn flipped_byte_is_401_and_nothing_submitted() {
        let gw = RecordingGateway::new();
        let (status, Json(err)) = callback(State(state(gw.clone(), None)), body(Some(0)))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(err.error.contains("invalid signature"));
        assert!(gw.calls().is_empty());
    }

    #[tokio::test]
    async fn truncated_is_400() {
        let gw = RecordingGateway::new();
        let raw = body(None).slice(..100);
        let (status, _) = callback(State(state(gw.clone(), None)), raw).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(gw.calls().is_empty());
    }

    #[tokio::test]
    async fn submission_failure_is_500() {
        let gw = RecordingGateway::new();
        gw.reject("finalize_submit_order");
        let (status, Json(err)) = callback(State(state(gw, None)), body(None)).await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.error.contains("finalization submission failed"));
    }

    #[tokio::test]
    async fn health_and_ready() {
        let Json(h) = health().await;
        assert_eq!(h.status, "healthy");
        assert!(chrono::DateTime::parse_from_rfc3339(&h.timestamp).is_ok());

        let st = state(RecordingGateway::new(), None);
        let Json(r) = ready(State(st)).await.unwrap();
        assert!(r.ready);
        assert_eq!(r.callback_authority, test_keypair(5).pubkey().to_string());
    }

    #[test]
    fn router_builds_with_and_without_admin_routes() {
        let _ = crate::router::build(state(RecordingGateway::new(), None));
        let _ = crate::router::build(state(
            RecordingGateway::new(),
            Some("0123456789abcdef0123456789abcdef"),
        ));
    }
}
