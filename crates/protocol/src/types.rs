//! Replicated entities of the coordination core.
//!
//! All of these are committed state: they live in the replicated
//! key-value store and are mutated only from within block execution.
use serde::{Deserialize, Serialize};

use crate::Binary;

/// Lifecycle of a key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySetStatus {
    /// Key generation has not completed yet.
    Pending,
    /// The group key exists and the key set can sign.
    Active,
    /// Key generation failed.
    Failed,
}

/// State machine of a key-generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DkgState {
    /// Gathering round 1 commitments.
    Round1,
    /// Gathering round 2 shares.
    Round2,
    /// Key generation finished and the key set is active.
    Complete,
    /// Key generation timed out or a contribution was invalid.
    Failed,
}

impl DkgState {
    /// Whether the session can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// State machine of a signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningState {
    /// Gathering signing commitments.
    Round1,
    /// Gathering signature shares.
    Round2,
    /// The aggregated signature was produced.
    Complete,
    /// Signing timed out or a share was invalid.
    Failed,
}

impl SigningState {
    /// Whether the session can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Lifecycle of a signing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Request accepted, session gathering commitments.
    Pending,
    /// Enough commitments arrived, shares being gathered.
    InProgress,
    /// The signature is available on the request.
    Complete,
    /// The session timed out or aggregation failed.
    Failed,
}

/// A group key handle tying together participants, threshold and the
/// group public key produced by key generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySet {
    /// Unique key set id.
    pub id: String,
    /// Address of the creator.
    pub owner: String,
    /// Minimum number of signers `t`.
    pub threshold: u16,
    /// Number of participants `n`.
    pub max_signers: u16,
    /// Participant validator addresses in lexicographic order.
    pub participants: Vec<String>,
    /// 32-byte Ed25519 group public key, set on completion.
    pub group_pubkey: Option<Binary>,
    /// Current lifecycle status.
    pub status: KeySetStatus,
    /// Free-form description supplied by the creator.
    pub description: String,
    /// Block height the key set was created at.
    pub created_height: u64,
}

/// A key-generation session paired with a [`KeySet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DkgSession {
    /// Session id, equal to the key set id.
    pub id: String,
    /// The key set being generated.
    pub keyset_id: String,
    /// Current round of the ceremony.
    pub state: DkgState,
    /// Minimum number of signers `t`.
    pub threshold: u16,
    /// Number of participants `n`.
    pub max_signers: u16,
    /// Participant validator addresses in lexicographic order.
    pub participants: Vec<String>,
    /// Height the ceremony started at.
    pub start_height: u64,
    /// Height at which the ceremony fails if still in flight.
    pub timeout_height: u64,
}

/// A round 1 commitment contribution, one per (session, validator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DkgRound1Data {
    /// Session the contribution belongs to.
    pub session_id: String,
    /// Contributing validator.
    pub validator_addr: String,
    /// Opaque commitment envelope.
    pub commitment: Binary,
}

/// A round 2 share contribution, one per (session, validator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DkgRound2Data {
    /// Session the contribution belongs to.
    pub session_id: String,
    /// Contributing validator.
    pub validator_addr: String,
    /// Opaque share envelope.
    pub share: Binary,
}

/// Committed reference to a validator's key share.
///
/// The secret itself never enters committed state; this row only
/// records that the share exists and which group key it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyShareRef {
    /// Key set the share belongs to.
    pub keyset_id: String,
    /// Validator holding the share.
    pub validator_addr: String,
    /// Opaque share metadata.
    pub share_ref: Binary,
    /// The group public key the share contributes to.
    pub group_pubkey: Binary,
    /// Height the share was recorded at.
    pub created_height: u64,
}

/// A request for a threshold signature over a message hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// Unique request id.
    pub id: String,
    /// Key set asked to sign.
    pub keyset_id: String,
    /// Address of the requester.
    pub requester: String,
    /// 32-byte hash of the message to sign.
    pub message_hash: Binary,
    /// Contract address to call back on completion.
    pub callback: Option<String>,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// 64-byte Ed25519 signature, set on completion.
    pub signature: Option<Binary>,
    /// Block height the request was created at.
    pub created_height: u64,
}

/// A signing session paired 1:1 with a [`SigningRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningSession {
    /// The request being served; also the session key.
    pub request_id: String,
    /// Key set doing the signing.
    pub keyset_id: String,
    /// Minimum number of signers `t`.
    pub threshold: u16,
    /// Chosen signer subset in lexicographic order, size >= `t`.
    pub participants: Vec<String>,
    /// Current round of the protocol.
    pub state: SigningState,
    /// Height the session started at.
    pub start_height: u64,
    /// Height at which the session fails if still in flight.
    pub timeout_height: u64,
}

/// A signing commitment, one per (request, validator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningCommitment {
    /// Request the commitment belongs to.
    pub request_id: String,
    /// Contributing validator.
    pub validator_addr: String,
    /// Opaque commitment envelope.
    pub commitment: Binary,
}

/// A signature share, one per (request, validator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureShareData {
    /// Request the share belongs to.
    pub request_id: String,
    /// Contributing validator.
    pub validator_addr: String,
    /// Opaque share envelope.
    pub share: Binary,
}
