//! Decoding of Anchor events out of transaction log messages.
//!
//! Anchor's `emit!` writes `Program data: <base64>` where the payload is
//! `sha256("event:<Name>")[..8] || borsh(event)`. The line is attributed to whichever
//! program is on top of the invoke stack at that point, which is how events of the
//! matching program are told apart from the MPC program's `FinalizeComputationEvent`
//! that share the same callback transaction.

use base64::Engine;
use borsh::BorshDeserialize;
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::sync::OnceLock;

use crate::ticket::ComputationTicket;

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

#[derive(thiserror::Error, Debug)]
pub enum EventDecodeError {
    #[error("event payload shorter than discriminator")]
    TooShort,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("borsh decode of {name} failed: {source}")]
    Borsh {
        name: &'static str,
        source: std::io::Error,
    },
}

pub fn event_discriminator(name: &str) -> [u8; 8] {
    let mut h = Sha256::new();
    h.update(format!("event:{name}").as_bytes());
    let out = h.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&out[..8]);
    disc
}

#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderCheckSucceeded {
    pub order_id: u64,
    pub user: Pubkey,
    pub success: bool,
}

#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderCheckFailed {
    pub order_id: u64,
    pub user: Pubkey,
}

#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrderProcessed {
    pub order_id: u64,
    pub success: bool,
    pub buy_count: u8,
    pub sell_count: u8,
    pub orderbook_nonce: u128,
}

#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserLedgerInitialized {
    pub user: Pubkey,
}

#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserLedgerDeposited {
    pub user: Pubkey,
    pub amount: u64,
    pub encrypted_balances: [[u8; 32]; 4],
    pub balance_nonce: u128,
}

#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct WithdrawVerified {
    pub user: Pubkey,
    pub amount: u64,
    pub encrypted_balances: [[u8; 32]; 4],
    pub balance_nonce: u128,
}

#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct WithdrawRejected {
    pub user: Pubkey,
    pub amount: u64,
}

/// Result of a `match_orders` run, encrypted for the operator.
#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub results: [u8; 32],
    pub nonce: u128,
    pub orderbook_nonce: u128,
    pub timestamp: i64,
}

/// Emitted by the MPC program once a computation's result has been written back on-chain.
#[derive(BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct FinalizeComputation {
    pub computation_offset: u64,
    pub mxe_program_id: Pubkey,
}

impl FinalizeComputation {
    pub fn ticket(&self) -> ComputationTicket {
        ComputationTicket::from_offset(self.computation_offset)
    }
}

/// Business-outcome events of the matching program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramEvent {
    OrderCheckSucceeded(OrderCheckSucceeded),
    OrderCheckFailed(OrderCheckFailed),
    OrderProcessed(OrderProcessed),
    UserLedgerInitialized(UserLedgerInitialized),
    UserLedgerDeposited(UserLedgerDeposited),
    WithdrawVerified(WithdrawVerified),
    WithdrawRejected(WithdrawRejected),
    MatchResult(MatchResult),
}

impl ProgramEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgramEvent::OrderCheckSucceeded(_) => ORDER_CHECK_SUCCESS,
            ProgramEvent::OrderCheckFailed(_) => ORDER_CHECK_FAILED,
            ProgramEvent::OrderProcessed(_) => ORDER_PROCESSED,
            ProgramEvent::UserLedgerInitialized(_) => LEDGER_INITIALIZED,
            ProgramEvent::UserLedgerDeposited(_) => LEDGER_DEPOSITED,
            ProgramEvent::WithdrawVerified(_) => WITHDRAW_VERIFIED,
            ProgramEvent::WithdrawRejected(_) => WITHDRAW_REJECTED,
            ProgramEvent::MatchResult(_) => MATCH_RESULT,
        }
    }
}

const ORDER_CHECK_SUCCESS: &str = "OrderSubmittedCheckSuccessEvent";
const ORDER_CHECK_FAILED: &str = "OrderSubmittedCheckFailedEvent";
const ORDER_PROCESSED: &str = "OrderProcessedEvent";
const LEDGER_INITIALIZED: &str = "UserLedgerInitializedEvent";
const LEDGER_DEPOSITED: &str = "UserLedgerDepositedEvent";
const WITHDRAW_VERIFIED: &str = "UserLedgerWithdrawVerifiedSuccessEvent";
const WITHDRAW_REJECTED: &str = "UserLedgerWithdrawVerifiedFailedEvent";
const MATCH_RESULT: &str = "MatchResultEvent";
const FINALIZE_COMPUTATION: &str = "FinalizeComputationEvent";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    OrderCheckSucceeded,
    OrderCheckFailed,
    OrderProcessed,
    LedgerInitialized,
    LedgerDeposited,
    WithdrawVerified,
    WithdrawRejected,
    MatchResult,
    FinalizeComputation,
}

fn discriminators() -> &'static [([u8; 8], Kind, &'static str)] {
    static TABLE: OnceLock<Vec<([u8; 8], Kind, &'static str)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (ORDER_CHECK_SUCCESS, Kind::OrderCheckSucceeded),
            (ORDER_CHECK_FAILED, Kind::OrderCheckFailed),
            (ORDER_PROCESSED, Kind::OrderProcessed),
            (LEDGER_INITIALIZED, Kind::LedgerInitialized),
            (LEDGER_DEPOSITED, Kind::LedgerDeposited),
            (WITHDRAW_VERIFIED, Kind::WithdrawVerified),
            (WITHDRAW_REJECTED, Kind::WithdrawRejected),
            (MATCH_RESULT, Kind::MatchResult),
            (FINALIZE_COMPUTATION, Kind::FinalizeComputation),
        ]
        .into_iter()
        .map(|(name, kind)| (event_discriminator(name), kind, name))
        .collect()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Program(ProgramEvent),
    Finalized(FinalizeComputation),
}

fn borsh<T: BorshDeserialize>(name: &'static str, body: &[u8]) -> Result<T, EventDecodeError> {
    T::try_from_slice(body).map_err(|source| EventDecodeError::Borsh { name, source })
}

/// Decode one raw event payload (discriminator + borsh body).
///
/// `Ok(None)` means the discriminator belongs to an event this crate does not track.
pub fn decode_event(raw: &[u8]) -> Result<Option<DecodedEvent>, EventDecodeError> {
    if raw.len() < 8 {
        return Err(EventDecodeError::TooShort);
    }
    let (disc, body) = raw.split_at(8);
    let Some((_, kind, name)) = discriminators().iter().find(|(d, _, _)| d == disc) else {
        return Ok(None);
    };
    let ev = match kind {
        Kind::OrderCheckSucceeded => {
            DecodedEvent::Program(ProgramEvent::OrderCheckSucceeded(borsh(name, body)?))
        }
        Kind::OrderCheckFailed => {
            DecodedEvent::Program(ProgramEvent::OrderCheckFailed(borsh(name, body)?))
        }
        Kind::OrderProcessed => {
            DecodedEvent::Program(ProgramEvent::OrderProcessed(borsh(name, body)?))
        }
        Kind::LedgerInitialized => {
            DecodedEvent::Program(ProgramEvent::UserLedgerInitialized(borsh(name, body)?))
        }
        Kind::LedgerDeposited => {
            DecodedEvent::Program(ProgramEvent::UserLedgerDeposited(borsh(name, body)?))
        }
        Kind::WithdrawVerified => {
            DecodedEvent::Program(ProgramEvent::WithdrawVerified(borsh(name, body)?))
        }
        Kind::WithdrawRejected => {
            DecodedEvent::Program(ProgramEvent::WithdrawRejected(borsh(name, body)?))
        }
        Kind::MatchResult => DecodedEvent::Program(ProgramEvent::MatchResult(borsh(name, body)?)),
        Kind::FinalizeComputation => DecodedEvent::Finalized(borsh(name, body)?),
    };
    Ok(Some(ev))
}

/// Events of a single ledger transaction that concern the matching program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionEvents {
    pub signature: String,
    pub program_events: Vec<ProgramEvent>,
    pub finalizations: Vec<FinalizeComputation>,
}

impl TransactionEvents {
    pub fn is_empty(&self) -> bool {
        self.program_events.is_empty() && self.finalizations.is_empty()
    }
}

/// Walk the log lines of one transaction and collect the events emitted by `program_id`
/// plus the finalization events the MPC program emitted for computations of `program_id`.
pub fn decode_logs(
    signature: &str,
    logs: &[String],
    program_id: &Pubkey,
    mpc_program_id: &Pubkey,
) -> TransactionEvents {
    let program = program_id.to_string();
    let mpc = mpc_program_id.to_string();
    let mut stack: Vec<&str> = Vec::new();
    let mut out = TransactionEvents {
        signature: signature.to_string(),
        ..Default::default()
    };

    for line in logs {
        if let Some(rest) = line.strip_prefix("Program ") {
            if let Some(b64) = line.strip_prefix(PROGRAM_DATA_PREFIX) {
                let Some(current) = stack.last().copied() else {
                    continue;
                };
                if current != program && current != mpc {
                    continue;
                }
                let raw = match base64::engine::general_purpose::STANDARD.decode(b64.trim()) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(signature, error = %e, "skipping undecodable program data");
                        continue;
                    }
                };
                match decode_event(&raw) {
                    Ok(Some(DecodedEvent::Program(ev))) if current == program => {
                        out.program_events.push(ev)
                    }
                    Ok(Some(DecodedEvent::Finalized(f))) if current == mpc => {
                        if f.mxe_program_id == *program_id {
                            out.finalizations.push(f);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(signature, error = %e, "failed to decode event");
                    }
                }
                continue;
            }
            let mut parts = rest.split_whitespace();
            let (Some(id), Some(verb)) = (parts.next(), parts.next()) else {
                continue;
            };
            match verb {
                "invoke" => stack.push(id),
                "success" | "failed:" => {
                    stack.pop();
                }
                _ => {}
            }
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use borsh::BorshSerialize;

    #[derive(BorshSerialize)]
    pub(crate) struct CheckOk {
        pub(crate) order_id: u64,
        pub(crate) user: [u8; 32],
        pub(crate) success: bool,
    }

    #[derive(BorshSerialize)]
    pub(crate) struct Finalize {
        pub(crate) computation_offset: u64,
        pub(crate) mxe_program_id: [u8; 32],
    }

    #[derive(BorshSerialize)]
    pub(crate) struct Matched {
        pub(crate) results: [u8; 32],
        pub(crate) nonce: u128,
        pub(crate) orderbook_nonce: u128,
        pub(crate) timestamp: i64,
    }

    pub(crate) fn data_line<T: BorshSerialize>(name: &str, ev: &T) -> String {
        let mut raw = event_discriminator(name).to_vec();
        raw.extend(borsh::to_vec(ev).unwrap());
        format!(
            "{PROGRAM_DATA_PREFIX}{}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }

    fn ids() -> (Pubkey, Pubkey) {
        (Pubkey::new_unique(), Pubkey::new_unique())
    }

    #[test]
    fn discriminator_matches_anchor_scheme() {
        let mut h = Sha256::new();
        h.update(b"event:OrderProcessedEvent");
        let full = h.finalize();
        assert_eq!(event_discriminator("OrderProcessedEvent"), full[..8]);
    }

    #[test]
    fn attributes_events_to_invoking_program() {
        let (program, mpc) = ids();
        let user = Pubkey::new_unique();
        let logs = vec![
            format!("Program {mpc} invoke [1]"),
            format!("Program {program} invoke [2]"),
            data_line(
                ORDER_CHECK_SUCCESS,
                &CheckOk {
                    order_id: 5,
                    user: user.to_bytes(),
                    success: true,
                },
            ),
            format!("Program {program} consumed 1200 of 200000 compute units"),
            format!("Program {program} success"),
            data_line(
                FINALIZE_COMPUTATION,
                &Finalize {
                    computation_offset: 77,
                    mxe_program_id: program.to_bytes(),
                },
            ),
            format!("Program {mpc} success"),
        ];
        let evs = decode_logs("sig", &logs, &program, &mpc);
        assert_eq!(
            evs.program_events,
            vec![ProgramEvent::OrderCheckSucceeded(OrderCheckSucceeded {
                order_id: 5,
                user,
                success: true
            })]
        );
        assert_eq!(evs.finalizations.len(), 1);
        assert_eq!(evs.finalizations[0].ticket(), ComputationTicket::from_offset(77));
    }

    #[test]
    fn ignores_finalizations_for_other_programs() {
        let (program, mpc) = ids();
        let logs = vec![
            format!("Program {mpc} invoke [1]"),
            data_line(
                FINALIZE_COMPUTATION,
                &Finalize {
                    computation_offset: 1,
                    mxe_program_id: Pubkey::new_unique().to_bytes(),
                },
            ),
            format!("Program {mpc} success"),
        ];
        assert!(decode_logs("sig", &logs, &program, &mpc).is_empty());
    }

    #[test]
    fn ignores_data_from_unrelated_programs() {
        let (program, mpc) = ids();
        let other = Pubkey::new_unique();
        let logs = vec![
            format!("Program {other} invoke [1]"),
            data_line(
                ORDER_CHECK_SUCCESS,
                &CheckOk {
                    order_id: 1,
                    user: [0; 32],
                    success: true,
                },
            ),
            format!("Program {other} success"),
        ];
        assert!(decode_logs("sig", &logs, &program, &mpc).is_empty());
    }

    #[test]
    fn decodes_match_result() {
        let mut raw = event_discriminator(MATCH_RESULT).to_vec();
        raw.extend(
            borsh::to_vec(&Matched {
                results: [9; 32],
                nonce: 3,
                orderbook_nonce: 4,
                timestamp: -1,
            })
            .unwrap(),
        );
        assert_eq!(
            decode_event(&raw).unwrap(),
            Some(DecodedEvent::Program(ProgramEvent::MatchResult(MatchResult {
                results: [9; 32],
                nonce: 3,
                orderbook_nonce: 4,
                timestamp: -1,
            })))
        );
    }

    #[test]
    fn unknown_discriminator_is_not_an_error() {
        let raw = [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 1, 2, 3];
        assert!(decode_event(&raw).unwrap().is_none());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut raw = event_discriminator(ORDER_PROCESSED).to_vec();
        raw.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            decode_event(&raw),
            Err(EventDecodeError::Borsh { .. })
        ));
        assert!(matches!(decode_event(&[1, 2]), Err(EventDecodeError::TooShort)));
    }
}
