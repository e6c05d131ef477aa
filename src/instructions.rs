//! Instruction builders for the matching-engine program.
//!
//! Instruction data is built by hand in the Anchor ABI: `sha256("global:<name>")[..8]`
//! followed by the little-endian arguments. Every instruction has an explicit account
//! list in the order of the program's `Accounts` struct.

use sha2::{Digest, Sha256};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
#[allow(deprecated)]
use solana_sdk::system_program;

use crate::ticket::ComputationTicket;
use crate::wire::OrderbookChunks;

pub const SPL_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const SPL_ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

const ORDERBOOK_SEED: &[u8] = b"order_book_state";
const ORDER_SEED: &[u8] = b"order";
const USER_LEDGER_SEED: &[u8] = b"user_ledger";
const VAULT_SEED: &[u8] = b"vault";
const VAULT_AUTHORITY_SEED: &[u8] = b"vault_authority";
const SIGN_PDA_SEED: &[u8] = b"SignerAccount";

const MXE_SEED: &[u8] = b"MXEAccount";
const MEMPOOL_SEED: &[u8] = b"Mempool";
const EXECPOOL_SEED: &[u8] = b"Execpool";
const COMPUTATION_SEED: &[u8] = b"ComputationAccount";
const COMP_DEF_SEED: &[u8] = b"ComputationDefinitionAccount";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInstruction {
    #[error("{0} must be > 0")]
    ZeroAmount(&'static str),
    #[error("{field} must not be all zero bytes")]
    EmptyCiphertext { field: &'static str },
}

pub fn anchor_discriminator(ix_name: &str) -> [u8; 8] {
    let mut h = Sha256::new();
    h.update(format!("global:{ix_name}").as_bytes());
    let out = h.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&out[..8]);
    disc
}

/// Offset of a circuit's computation definition: first four bytes of `sha256(name)`, LE.
pub fn comp_def_offset(circuit: &str) -> u32 {
    let h = Sha256::digest(circuit.as_bytes());
    u32::from_le_bytes([h[0], h[1], h[2], h[3]])
}

/// MPC-side accounts every queued computation has to reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpcAccounts {
    pub arcium_program: Pubkey,
    pub cluster: Pubkey,
    pub fee_pool: Pubkey,
    pub clock: Pubkey,
}

/// Static addresses of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLayout {
    pub program_id: Pubkey,
    pub mpc: MpcAccounts,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
}

impl ProgramLayout {
    fn pda(&self, seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &self.program_id).0
    }

    fn mpc_pda(&self, seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &self.mpc.arcium_program).0
    }

    pub fn orderbook_state(&self) -> Pubkey {
        self.pda(&[ORDERBOOK_SEED])
    }

    pub fn order_account(&self, order_id: u64) -> Pubkey {
        self.pda(&[ORDER_SEED, &order_id.to_le_bytes()])
    }

    pub fn user_ledger(&self, user: &Pubkey) -> Pubkey {
        self.pda(&[USER_LEDGER_SEED, user.as_ref()])
    }

    pub fn vault(&self, mint: &Pubkey) -> Pubkey {
        self.pda(&[VAULT_SEED, mint.as_ref()])
    }

    pub fn vault_authority(&self) -> Pubkey {
        self.pda(&[VAULT_AUTHORITY_SEED])
    }

    pub fn sign_pda(&self) -> Pubkey {
        self.pda(&[SIGN_PDA_SEED])
    }

    pub fn mxe_account(&self) -> Pubkey {
        self.mpc_pda(&[MXE_SEED, self.program_id.as_ref()])
    }

    pub fn mempool(&self) -> Pubkey {
        self.mpc_pda(&[MEMPOOL_SEED, self.program_id.as_ref()])
    }

    pub fn execpool(&self) -> Pubkey {
        self.mpc_pda(&[EXECPOOL_SEED, self.program_id.as_ref()])
    }

    pub fn computation_account(&self, ticket: ComputationTicket) -> Pubkey {
        self.mpc_pda(&[
            COMPUTATION_SEED,
            self.program_id.as_ref(),
            &ticket.to_le_bytes(),
        ])
    }

    pub fn comp_def_account(&self, circuit: &str) -> Pubkey {
        self.mpc_pda(&[
            COMP_DEF_SEED,
            self.program_id.as_ref(),
            &comp_def_offset(circuit).to_le_bytes(),
        ])
    }

    pub fn mint(&self, asset: LedgerAsset) -> Pubkey {
        match asset {
            LedgerAsset::Base => self.base_mint,
            LedgerAsset::Quote => self.quote_mint,
        }
    }
}

pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), SPL_TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &SPL_ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_u8(self) -> u8 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerAsset {
    Base,
    Quote,
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "0" => Ok(OrderSide::Buy),
            "sell" | "1" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

impl std::str::FromStr for LedgerAsset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "base" => Ok(LedgerAsset::Base),
            "quote" => Ok(LedgerAsset::Quote),
            other => Err(format!("unknown asset: {other}")),
        }
    }
}

impl LedgerAsset {
    pub fn is_base_token(self) -> bool {
        matches!(self, LedgerAsset::Base)
    }
}

/// Arguments shared by `submit_order_check` and `submit_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderArgs {
    /// Ledger identity of the order owner; signs the queue transaction.
    pub user: Pubkey,
    pub order_id: u64,
    pub amount_ct: [u8; 32],
    pub price_ct: [u8; 32],
    /// Owner's x25519 key the ciphertexts are encrypted to.
    pub user_enc_pubkey: [u8; 32],
    pub side: OrderSide,
    pub order_nonce: u128,
}

impl OrderArgs {
    pub fn validate(&self) -> Result<(), InvalidInstruction> {
        ensure_nonzero_ct("amount_ct", &self.amount_ct)?;
        ensure_nonzero_ct("price_ct", &self.price_ct)?;
        ensure_nonzero_ct("user_enc_pubkey", &self.user_enc_pubkey)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitLedgerArgs {
    pub user: Pubkey,
    pub user_enc_pubkey: [u8; 32],
    pub nonce: u128,
}

/// Deposit into, or verified withdrawal out of, a user's private ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransferArgs {
    pub user: Pubkey,
    pub user_enc_pubkey: [u8; 32],
    pub amount: u64,
    pub asset: LedgerAsset,
}

impl LedgerTransferArgs {
    pub fn validate(&self) -> Result<(), InvalidInstruction> {
        if self.amount == 0 {
            return Err(InvalidInstruction::ZeroAmount("amount"));
        }
        ensure_nonzero_ct("user_enc_pubkey", &self.user_enc_pubkey)
    }
}

/// `trigger_matching`: runs the matching circuit over the shared orderbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOrdersArgs {
    /// Operator key that pays for and signs the queue transaction.
    pub operator: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultTransferArgs {
    pub user: Pubkey,
    pub amount: u64,
    pub asset: LedgerAsset,
}

fn ensure_nonzero_ct(field: &'static str, v: &[u8; 32]) -> Result<(), InvalidInstruction> {
    if v.iter().all(|b| *b == 0) {
        return Err(InvalidInstruction::EmptyCiphertext { field });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputationKind {
    SubmitOrderCheck,
    SubmitOrder,
    InitUserLedger,
    DepositToLedger,
    WithdrawVerify,
    MatchOrders,
}

impl ComputationKind {
    /// Name of the confidential circuit the computation runs.
    pub fn circuit(self) -> &'static str {
        match self {
            ComputationKind::SubmitOrderCheck => "submit_order_check",
            ComputationKind::SubmitOrder => "submit_order",
            ComputationKind::InitUserLedger => "init_user_ledger",
            ComputationKind::DepositToLedger => "update_ledger_deposit",
            ComputationKind::WithdrawVerify => "update_ledger_withdraw_verify",
            ComputationKind::MatchOrders => "match_orders",
        }
    }

    /// Program instruction that queues it.
    pub fn method(self) -> &'static str {
        match self {
            ComputationKind::SubmitOrderCheck => "submit_order_check",
            ComputationKind::SubmitOrder => "submit_order",
            ComputationKind::InitUserLedger => "initialize_user_ledger",
            ComputationKind::DepositToLedger => "deposit_to_ledger",
            ComputationKind::WithdrawVerify => "withdraw_from_ledger_verify",
            ComputationKind::MatchOrders => "trigger_matching",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputationRequest {
    SubmitOrderCheck(OrderArgs),
    SubmitOrder(OrderArgs),
    InitUserLedger(InitLedgerArgs),
    DepositToLedger(LedgerTransferArgs),
    WithdrawVerify(LedgerTransferArgs),
    MatchOrders(MatchOrdersArgs),
}

impl ComputationRequest {
    pub fn kind(&self) -> ComputationKind {
        match self {
            ComputationRequest::SubmitOrderCheck(_) => ComputationKind::SubmitOrderCheck,
            ComputationRequest::SubmitOrder(_) => ComputationKind::SubmitOrder,
            ComputationRequest::InitUserLedger(_) => ComputationKind::InitUserLedger,
            ComputationRequest::DepositToLedger(_) => ComputationKind::DepositToLedger,
            ComputationRequest::WithdrawVerify(_) => ComputationKind::WithdrawVerify,
            ComputationRequest::MatchOrders(_) => ComputationKind::MatchOrders,
        }
    }

    /// Key that has to sign the queue transaction.
    pub fn signer(&self) -> Pubkey {
        match self {
            ComputationRequest::SubmitOrderCheck(a) | ComputationRequest::SubmitOrder(a) => a.user,
            ComputationRequest::InitUserLedger(a) => a.user,
            ComputationRequest::DepositToLedger(a) | ComputationRequest::WithdrawVerify(a) => {
                a.user
            }
            ComputationRequest::MatchOrders(a) => a.operator,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidInstruction> {
        match self {
            ComputationRequest::SubmitOrderCheck(a) | ComputationRequest::SubmitOrder(a) => {
                a.validate()
            }
            ComputationRequest::InitUserLedger(a) => {
                ensure_nonzero_ct("user_enc_pubkey", &a.user_enc_pubkey)
            }
            ComputationRequest::DepositToLedger(a) | ComputationRequest::WithdrawVerify(a) => {
                a.validate()
            }
            ComputationRequest::MatchOrders(_) => Ok(()),
        }
    }

    fn data(&self, ticket: ComputationTicket) -> Vec<u8> {
        let kind = self.kind();
        let mut data = anchor_discriminator(kind.method()).to_vec();
        match self {
            // disc || amount[32] || price[32] || user_pubkey[32] || order_type u8
            //      || computation_offset u64 || order_id u64 || order_nonce u128
            ComputationRequest::SubmitOrderCheck(a) | ComputationRequest::SubmitOrder(a) => {
                data.extend_from_slice(&a.amount_ct);
                data.extend_from_slice(&a.price_ct);
                data.extend_from_slice(&a.user_enc_pubkey);
                data.push(a.side.as_u8());
                data.extend_from_slice(&ticket.to_le_bytes());
                data.extend_from_slice(&a.order_id.to_le_bytes());
                data.extend_from_slice(&a.order_nonce.to_le_bytes());
            }
            ComputationRequest::InitUserLedger(a) => {
                data.extend_from_slice(&a.user_enc_pubkey);
                data.extend_from_slice(&a.nonce.to_le_bytes());
                data.extend_from_slice(&ticket.to_le_bytes());
            }
            ComputationRequest::DepositToLedger(a) | ComputationRequest::WithdrawVerify(a) => {
                data.extend_from_slice(&a.user_enc_pubkey);
                data.extend_from_slice(&a.amount.to_le_bytes());
                data.push(a.asset.is_base_token() as u8);
                data.extend_from_slice(&ticket.to_le_bytes());
            }
            ComputationRequest::MatchOrders(_) => {
                data.extend_from_slice(&ticket.to_le_bytes());
            }
        }
        data
    }

    /// Accounts of the program's `queue_computation` context, in declaration order.
    fn accounts(&self, layout: &ProgramLayout, ticket: ComputationTicket) -> Vec<AccountMeta> {
        let user = self.signer();
        let mut accounts = vec![
            AccountMeta::new(user, true),
            AccountMeta::new(layout.sign_pda(), false),
            AccountMeta::new_readonly(layout.mxe_account(), false),
            AccountMeta::new(layout.mempool(), false),
            AccountMeta::new(layout.execpool(), false),
            AccountMeta::new(layout.computation_account(ticket), false),
            AccountMeta::new_readonly(layout.comp_def_account(self.kind().circuit()), false),
            AccountMeta::new(layout.mpc.cluster, false),
            AccountMeta::new(layout.mpc.fee_pool, false),
            AccountMeta::new_readonly(layout.mpc.clock, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(layout.mpc.arcium_program, false),
        ];
        match self {
            ComputationRequest::SubmitOrderCheck(a) | ComputationRequest::SubmitOrder(a) => {
                accounts.extend([
                    AccountMeta::new(layout.base_mint, false),
                    AccountMeta::new(layout.vault(&layout.base_mint), false),
                    AccountMeta::new(layout.order_account(a.order_id), false),
                    AccountMeta::new(layout.user_ledger(&a.user), false),
                    AccountMeta::new(layout.orderbook_state(), false),
                ]);
            }
            ComputationRequest::InitUserLedger(a) => {
                accounts.push(AccountMeta::new(layout.user_ledger(&a.user), false));
            }
            ComputationRequest::DepositToLedger(a) | ComputationRequest::WithdrawVerify(a) => {
                let mint = layout.mint(a.asset);
                accounts.extend([
                    AccountMeta::new_readonly(layout.vault_authority(), false),
                    AccountMeta::new_readonly(mint, false),
                    AccountMeta::new(layout.vault(&mint), false),
                    AccountMeta::new(associated_token_address(&a.user, &mint), false),
                    AccountMeta::new(layout.user_ledger(&a.user), false),
                    AccountMeta::new_readonly(SPL_TOKEN_PROGRAM_ID, false),
                    AccountMeta::new_readonly(SPL_ASSOCIATED_TOKEN_PROGRAM_ID, false),
                ]);
            }
            ComputationRequest::MatchOrders(_) => {
                accounts.push(AccountMeta::new(layout.orderbook_state(), false));
            }
        }
        accounts
    }
}

/// One outbound submission to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramCall {
    Queue {
        ticket: ComputationTicket,
        request: ComputationRequest,
    },
    WithdrawFromVault(VaultTransferArgs),
    FinalizeSubmitOrder(Box<OrderbookChunks>),
}

impl ProgramCall {
    pub fn label(&self) -> &'static str {
        match self {
            ProgramCall::Queue { request, .. } => request.kind().method(),
            ProgramCall::WithdrawFromVault(_) => "withdraw_from_vault",
            ProgramCall::FinalizeSubmitOrder(_) => "finalize_submit_order",
        }
    }

    /// Build the instruction. `authority` is the operator key that signs the
    /// non-user instructions (vault transfer, finalization).
    pub fn instruction(
        &self,
        layout: &ProgramLayout,
        authority: &Pubkey,
    ) -> Result<Instruction, InvalidInstruction> {
        let (accounts, data) = match self {
            ProgramCall::Queue { ticket, request } => {
                request.validate()?;
                (request.accounts(layout, *ticket), request.data(*ticket))
            }
            ProgramCall::WithdrawFromVault(a) => {
                if a.amount == 0 {
                    return Err(InvalidInstruction::ZeroAmount("amount"));
                }
                let mint = layout.mint(a.asset);
                let mut data = anchor_discriminator("withdraw_from_vault").to_vec();
                data.extend_from_slice(&a.amount.to_le_bytes());
                data.extend_from_slice(a.user.as_ref());
                let accounts = vec![
                    AccountMeta::new(*authority, true),
                    AccountMeta::new_readonly(layout.vault_authority(), false),
                    AccountMeta::new_readonly(mint, false),
                    AccountMeta::new(layout.vault(&mint), false),
                    AccountMeta::new(associated_token_address(&a.user, &mint), false),
                    AccountMeta::new_readonly(SPL_TOKEN_PROGRAM_ID, false),
                ];
                (accounts, data)
            }
            ProgramCall::FinalizeSubmitOrder(chunks) => {
                return Ok(finalize_submit_order_ix(&layout.program_id, authority, chunks));
            }
        };
        Ok(Instruction {
            program_id: layout.program_id,
            accounts,
            data,
        })
    }
}

/// `finalize_submit_order(orderbook_chunks)`; only needs the program id, so the callback
/// server can build it without the MPC account set.
pub fn finalize_submit_order_ix(
    program_id: &Pubkey,
    callback_authority: &Pubkey,
    chunks: &OrderbookChunks,
) -> Instruction {
    let mut data = anchor_discriminator("finalize_submit_order").to_vec();
    for c in chunks.iter() {
        data.extend_from_slice(c);
    }
    let (orderbook_state, _bump) = Pubkey::find_program_address(&[ORDERBOOK_SEED], program_id);
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(orderbook_state, false),
            AccountMeta::new_readonly(*callback_authority, true),
        ],
        data,
    }
}
