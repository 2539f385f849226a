//! Committed-state and wire types for the frostbft coordination core.
//!
//! Everything here is shared between the keeper, the vote-extension
//! pipeline and the session driver: the replicated entities (key sets,
//! sessions, requests and per-round contribution rows), the JSON wire
//! structures carried through consensus votes and block proposals, and
//! the per-round message envelopes.
#![deny(missing_docs)]

mod binary;
mod payload;
mod types;

pub use binary::Binary;
pub use payload::{AggregatedPayload, DkgEnvelope, SignEnvelope, VoteExtension};
pub use types::{
    DkgRound1Data, DkgRound2Data, DkgSession, DkgState, KeySet, KeySetStatus,
    KeyShareRef, RequestStatus, SignatureShareData, SigningCommitment,
    SigningRequest, SigningSession, SigningState,
};

/// Length in bytes of a message hash submitted for signing.
pub const MESSAGE_HASH_LEN: usize = 32;

/// Length in bytes of a serialized Ed25519 group public key.
pub const GROUP_KEY_LEN: usize = 32;

/// Length in bytes of a serialized Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;
