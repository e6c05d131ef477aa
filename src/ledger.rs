//! Private ledger updates: init, deposit (single phase) and withdrawal (verify, then transfer).
//!
//! A vault transfer needs an [`ApprovedWithdrawal`], which only `verify_withdrawal` can
//! produce, and only from a verify-success event for the same user and amount delivered to
//! the ticket of that verification.

use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{info, warn};

use crate::coordinator::{ComputationCoordinator, CoordinatorError, ProtocolTimeouts};
use crate::events::ProgramEvent;
use crate::instructions::{
    ComputationRequest, InitLedgerArgs, LedgerTransferArgs, ProgramCall, VaultTransferArgs,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLedgerRecord {
    pub owner: Pubkey,
    pub encrypted_balances: [[u8; 32]; 4],
    pub balance_nonce: u128,
}

#[derive(Debug)]
pub struct ApprovedWithdrawal {
    request: LedgerTransferArgs,
    ledger: UserLedgerRecord,
}

impl ApprovedWithdrawal {
    pub fn request(&self) -> &LedgerTransferArgs {
        &self.request
    }

    pub fn ledger(&self) -> &UserLedgerRecord {
        &self.ledger
    }
}

#[derive(Debug)]
pub enum WithdrawVerdict {
    Approved(ApprovedWithdrawal),
    Rejected { user: Pubkey, amount: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Transferred {
        signature: String,
        ledger: UserLedgerRecord,
    },
    Rejected {
        user: Pubkey,
        amount: u64,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{op}: {source}")]
    Dispatch {
        op: &'static str,
        source: CoordinatorError,
    },
    #[error("{op}: no outcome: {source}")]
    NoOutcome {
        op: &'static str,
        source: CoordinatorError,
    },
    #[error("{op}: outcome does not match request: {detail}")]
    EventMismatch { op: &'static str, detail: String },
    #[error("vault transfer failed: {0}")]
    Transfer(CoordinatorError),
}

pub struct LedgerUpdateProtocol {
    coordinator: Arc<ComputationCoordinator>,
    timeouts: ProtocolTimeouts,
}

impl LedgerUpdateProtocol {
    pub fn new(coordinator: Arc<ComputationCoordinator>, timeouts: ProtocolTimeouts) -> Self {
        Self {
            coordinator,
            timeouts,
        }
    }

    async fn compute(
        &self,
        op: &'static str,
        request: ComputationRequest,
    ) -> Result<ProgramEvent, LedgerError> {
        let ticket = self
            .coordinator
            .dispatch(request)
            .await
            .map_err(|source| LedgerError::Dispatch { op, source })?;
        let (receipt, event) = self
            .coordinator
            .resolve(ticket, self.timeouts)
            .await
            .map_err(|source| LedgerError::NoOutcome { op, source })?;
        info!(op, %ticket, signature = %receipt.signature, event = event.name(), "ledger computation finalized");
        Ok(event)
    }

    pub async fn initialize(&self, args: InitLedgerArgs) -> Result<(), LedgerError> {
        const OP: &str = "init_user_ledger";
        let user = args.user;
        match self
            .compute(OP, ComputationRequest::InitUserLedger(args))
            .await?
        {
            ProgramEvent::UserLedgerInitialized(ev) if ev.user == user => Ok(()),
            other => Err(mismatch(OP, &other)),
        }
    }

    pub async fn deposit(&self, args: LedgerTransferArgs) -> Result<UserLedgerRecord, LedgerError> {
        const OP: &str = "deposit_to_ledger";
        let (user, amount) = (args.user, args.amount);
        match self
            .compute(OP, ComputationRequest::DepositToLedger(args))
            .await?
        {
            ProgramEvent::UserLedgerDeposited(ev) if ev.user == user && ev.amount == amount => {
                Ok(UserLedgerRecord {
                    owner: ev.user,
                    encrypted_balances: ev.encrypted_balances,
                    balance_nonce: ev.balance_nonce,
                })
            }
            other => Err(mismatch(OP, &other)),
        }
    }

    pub async fn verify_withdrawal(
        &self,
        args: LedgerTransferArgs,
    ) -> Result<WithdrawVerdict, LedgerError> {
        const OP: &str = "withdraw_from_ledger_verify";
        let (user, amount) = (args.user, args.amount);
        let event = self
            .compute(OP, ComputationRequest::WithdrawVerify(args.clone()))
            .await?;
        match event {
            ProgramEvent::WithdrawVerified(ev) if ev.user == user && ev.amount == amount => {
                info!(%user, amount, "withdrawal approved");
                Ok(WithdrawVerdict::Approved(ApprovedWithdrawal {
                    request: args,
                    ledger: UserLedgerRecord {
                        owner: ev.user,
                        encrypted_balances: ev.encrypted_balances,
                        balance_nonce: ev.balance_nonce,
                    },
                }))
            }
            ProgramEvent::WithdrawRejected(ev) if ev.user == user && ev.amount == amount => {
                info!(%user, amount, "withdrawal rejected by ledger check");
                Ok(WithdrawVerdict::Rejected { user, amount })
            }
            other => Err(mismatch(OP, &other)),
        }
    }

    /// Move tokens out of the vault. Signed by the operator key, not the user.
    pub async fn transfer(&self, approved: &ApprovedWithdrawal) -> Result<String, LedgerError> {
        let r = &approved.request;
        let sig = self
            .coordinator
            .execute(ProgramCall::WithdrawFromVault(VaultTransferArgs {
                user: r.user,
                amount: r.amount,
                asset: r.asset,
            }))
            .await
            .map_err(LedgerError::Transfer)?;
        info!(user = %r.user, amount = r.amount, signature = %sig, "vault transfer confirmed");
        Ok(sig)
    }

    pub async fn withdraw(&self, args: LedgerTransferArgs) -> Result<WithdrawOutcome, LedgerError> {
        match self.verify_withdrawal(args).await? {
            WithdrawVerdict::Approved(approved) => {
                let signature = self.transfer(&approved).await?;
                Ok(WithdrawOutcome::Transferred {
                    signature,
                    ledger: approved.ledger,
                })
            }
            WithdrawVerdict::Rejected { user, amount } => {
                Ok(WithdrawOutcome::Rejected { user, amount })
            }
        }
    }
}

fn mismatch(op: &'static str, event: &ProgramEvent) -> LedgerError {
    warn!(op, event = event.name(), "ledger outcome does not match request");
    LedgerError::EventMismatch {
        op,
        detail: format!("{event:?}"),
    }
}
