//! Coordinator for a confidential order-matching program whose matching runs in an
//! external MPC cluster.
//!
//! Two halves share this crate:
//! - the callback server (`router`, `handlers`, `callback`) that authenticates signed
//!   orderbook snapshots from MPC nodes and finalizes them on-chain;
//! - the protocol side (`coordinator`, `order`, `ledger`, `matching`, `watcher`) that queues
//!   computations, waits for their finalization and typed outcome events, and only then
//!   moves on to the next phase.

pub mod auth;
pub mod callback;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod instructions;
pub mod ledger;
pub mod matching;
pub mod metrics;
pub mod order;
pub mod router;
pub mod solana;
pub mod state;
pub mod ticket;
pub mod types;
pub mod utils;
pub mod verify;
pub mod watcher;
pub mod wire;

#[cfg(test)]
mod testing;
