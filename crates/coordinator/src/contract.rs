//! Contract-facing message and query surface.
//!
//! Only key-set creation and signature requests are exposed to
//! contracts; round contributions flow exclusively through vote
//! extensions and are never contract-submitted.
use frostbft_protocol::Binary;
use serde::{Deserialize, Serialize};

use crate::keeper::Keeper;
use crate::store::KvStore;
use crate::{Error, Result};

/// Messages a contract may submit to the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TssMsg {
    /// Create a key set and start its DKG ceremony.
    CreateKeySet {
        /// Minimum number of signers `t`.
        threshold: u16,
        /// Number of participants `n`.
        max_signers: u16,
        /// Free-form description.
        #[serde(default)]
        description: String,
        /// Ceremony timeout in blocks; 0 selects the node default.
        #[serde(default)]
        timeout_blocks: u64,
    },
    /// Request a threshold signature over a 32-byte message hash.
    RequestSignature {
        /// Key set to sign with.
        key_set_id: String,
        /// 32-byte message hash.
        message_hash: Binary,
        /// Contract address to call back on completion.
        #[serde(default)]
        callback: Option<String>,
    },
}

/// Read-only queries a contract may issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TssQuery {
    /// Snapshot of a key set.
    KeySet {
        /// Key set id.
        id: String,
    },
    /// Snapshot of a signing request.
    SigningRequest {
        /// Request id.
        id: String,
    },
    /// Snapshot of a DKG session.
    DkgSession {
        /// Session id.
        id: String,
    },
    /// Snapshot of a signing session.
    SigningSession {
        /// Request id the session serves.
        request_id: String,
    },
}

/// Response to [`TssMsg::CreateKeySet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeySetResponse {
    /// Id of the created key set.
    pub key_set_id: String,
}

/// Response to [`TssMsg::RequestSignature`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSignatureResponse {
    /// Id of the created signing request.
    pub request_id: String,
}

/// Callback delivered to a contract when its signing request
/// completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackMsg {
    /// The completed request.
    pub request_id: String,
    /// The 64-byte Ed25519 group signature.
    pub signature: Binary,
}

impl<S: KvStore> Keeper<S> {
    /// Execute a contract-submitted message, returning its JSON
    /// response.
    pub fn handle_msg(
        &mut self,
        sender: &str,
        msg: &[u8],
        height: u64,
    ) -> Result<Vec<u8>> {
        let msg: TssMsg = serde_json::from_slice(msg).map_err(|err| {
            Error::Invalid(format!("unknown tss message: {err}"))
        })?;

        match msg {
            TssMsg::CreateKeySet {
                threshold,
                max_signers,
                description,
                timeout_blocks,
            } => {
                let key_set_id = self.create_keyset(
                    sender,
                    threshold,
                    max_signers,
                    description,
                    timeout_blocks,
                    height,
                )?;
                Ok(serde_json::to_vec(&CreateKeySetResponse {
                    key_set_id,
                })?)
            }
            TssMsg::RequestSignature {
                key_set_id,
                message_hash,
                callback,
            } => {
                let request_id = self.request_signature(
                    sender,
                    &key_set_id,
                    message_hash,
                    callback,
                    height,
                )?;
                Ok(serde_json::to_vec(&RequestSignatureResponse {
                    request_id,
                })?)
            }
        }
    }

    /// Serve a contract query, returning its JSON response.
    pub fn handle_query(&self, query: &[u8]) -> Result<Vec<u8>> {
        let query: TssQuery =
            serde_json::from_slice(query).map_err(|err| {
                Error::Invalid(format!("unknown tss query: {err}"))
            })?;

        match query {
            TssQuery::KeySet { id } => {
                Ok(serde_json::to_vec(&self.keyset(&id)?)?)
            }
            TssQuery::SigningRequest { id } => {
                Ok(serde_json::to_vec(&self.signing_request(&id)?)?)
            }
            TssQuery::DkgSession { id } => {
                Ok(serde_json::to_vec(&self.dkg_session(&id)?)?)
            }
            TssQuery::SigningSession { request_id } => {
                Ok(serde_json::to_vec(&self.signing_session(&request_id)?)?)
            }
        }
    }
}
