//! Vote-extension and aggregated-payload wire structures.
//!
//! Encoding is JSON with base64 binary payloads. Unknown fields are
//! ignored on decode so older nodes tolerate newer extensions.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Binary;

/// Per-validator contribution set attached to a consensus vote.
///
/// Keys of the DKG maps are session ids; keys of the signing maps are
/// request ids. A validator that already contributed for a given round
/// still re-emits the same bytes each block; committed state is the
/// authority for duplicate suppression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteExtension {
    /// Round 1 commitment envelopes by session id.
    #[serde(default)]
    pub dkg_round1: BTreeMap<String, Binary>,
    /// Round 2 share envelopes by session id.
    #[serde(default)]
    pub dkg_round2: BTreeMap<String, Binary>,
    /// Signing commitment envelopes by request id.
    #[serde(default)]
    pub signing_commitments: BTreeMap<String, Binary>,
    /// Signature share envelopes by request id.
    #[serde(default)]
    pub signature_shares: BTreeMap<String, Binary>,
}

impl VoteExtension {
    /// Whether the extension carries no contributions at all.
    pub fn is_empty(&self) -> bool {
        self.dkg_round1.is_empty()
            && self.dkg_round2.is_empty()
            && self.signing_commitments.is_empty()
            && self.signature_shares.is_empty()
    }
}

/// Deterministic fold of one block's vote extensions, injected as the
/// synthetic first transaction of the next block.
///
/// The inner maps are keyed by validator address; `BTreeMap` ordering
/// gives every replica the identical canonical encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPayload {
    /// Round 1 commitments by session id, then validator address.
    #[serde(default)]
    pub dkg_round1: BTreeMap<String, BTreeMap<String, Binary>>,
    /// Round 2 shares by session id, then validator address.
    #[serde(default)]
    pub dkg_round2: BTreeMap<String, BTreeMap<String, Binary>>,
    /// Signing commitments by request id, then validator address.
    #[serde(default)]
    pub signing_commitments: BTreeMap<String, BTreeMap<String, Binary>>,
    /// Signature shares by request id, then validator address.
    #[serde(default)]
    pub signature_shares: BTreeMap<String, BTreeMap<String, Binary>>,
}

impl AggregatedPayload {
    /// Whether the payload carries no contributions at all.
    pub fn is_empty(&self) -> bool {
        self.dkg_round1.is_empty()
            && self.dkg_round2.is_empty()
            && self.signing_commitments.is_empty()
            && self.signature_shares.is_empty()
    }
}

/// Envelope wrapping one validator's DKG round messages.
///
/// The `messages` list carries the driver's opaque wire bytes; the
/// envelope itself is the contribution payload stored on chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DkgEnvelope {
    /// Session the messages belong to.
    pub session_id: String,
    /// Producing validator.
    pub validator_addr: String,
    /// Opaque round messages, one per receiver.
    pub messages: Vec<Binary>,
}

/// Envelope wrapping one validator's signing round messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignEnvelope {
    /// Request the messages belong to.
    pub request_id: String,
    /// Producing validator.
    pub validator_addr: String,
    /// Opaque round messages, one per receiver.
    pub messages: Vec<Binary>,
}
