//! Threshold-signature coordination over BFT block execution.
//!
//! Drives FROST Ed25519 key generation and signing ceremonies among a
//! replicated validator set, using consensus vote extensions as the
//! transport. Each validator emits its per-round contributions in a
//! vote extension; the block proposer folds the previous block's
//! extensions into an aggregated payload injected as a synthetic first
//! transaction; begin-of-block promotes the payload into committed
//! contribution tables and end-of-block advances the session state
//! machines, producing a committed group public key (DKG) or a
//! committed 64-byte signature (signing) identically on every honest
//! replica.
//!
//! The pieces are wired by the host node:
//!
//! - [`Keeper`] owns committed state over a [`KvStore`] and drives
//!   sessions from block execution;
//! - [`StateManager`] holds this validator's volatile FROST protocol
//!   state and the key shares persisted by [`KeyShareStore`];
//! - [`ProposalHandler`] and the shared [`PayloadSlot`] form the
//!   proposal pipeline;
//! - [`ContractRuntime`] receives signing-completion callbacks.

mod block;
mod config;
mod contract;
mod error;
mod extension;
mod keeper;
mod keystore;
mod manager;
mod proposal;
mod store;

pub use config::{NodeConfig, SessionConfig};
pub use contract::{
    CallbackMsg, CreateKeySetResponse, RequestSignatureResponse, TssMsg,
    TssQuery,
};
pub use error::Error;
pub use keeper::{ContractRuntime, Keeper, ValidatorSet};
pub use keystore::{KeyShareFile, KeyShareStore};
pub use manager::StateManager;
pub use proposal::{aggregate_votes, CommitVote, PayloadSlot, ProposalHandler};
pub use store::{KvStore, MemoryStore};

/// Result type for the coordinator crate.
pub type Result<T> = std::result::Result<T, Error>;
