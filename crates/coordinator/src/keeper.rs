//! Committed-state keeper: contract-facing operations, contribution
//! acceptance and session completion.
use frostbft_protocol::{
    Binary, DkgRound1Data, DkgRound2Data, DkgSession, DkgState, KeySet,
    KeySetStatus, KeyShareRef, RequestStatus, SignatureShareData,
    SigningCommitment, SigningRequest, SigningSession, SigningState,
    GROUP_KEY_LEN, MESSAGE_HASH_LEN, SIGNATURE_LEN,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::manager::StateManager;
use crate::proposal::PayloadSlot;
use crate::store::{pair_key, KvStore, Table};
use crate::{Error, Result};

pub(crate) const KEYSETS: Table<KeySet> = Table::new("keyset");
pub(crate) const KEY_SHARE_REFS: Table<KeyShareRef> = Table::new("keyshare");
pub(crate) const DKG_SESSIONS: Table<DkgSession> = Table::new("dkg/session");
pub(crate) const DKG_ROUND1: Table<DkgRound1Data> = Table::new("dkg/round1");
pub(crate) const DKG_ROUND2: Table<DkgRound2Data> = Table::new("dkg/round2");
pub(crate) const SIGNING_REQUESTS: Table<SigningRequest> =
    Table::new("signing/request");
pub(crate) const SIGNING_SESSIONS: Table<SigningSession> =
    Table::new("signing/session");
pub(crate) const SIGNING_COMMITMENTS: Table<SigningCommitment> =
    Table::new("signing/commitment");
pub(crate) const SIGNATURE_SHARES: Table<SignatureShareData> =
    Table::new("signing/share");
pub(crate) const SEQUENCES: Table<u64> = Table::new("seq");

/// Source of the active validator set.
///
/// Provided by the host's staking subsystem; addresses are lowercase
/// hex consensus addresses and the returned order is not relied upon.
pub trait ValidatorSet {
    /// Addresses of currently bonded validators.
    fn active_validators(&self) -> Vec<String>;
}

impl ValidatorSet for Vec<String> {
    fn active_validators(&self) -> Vec<String> {
        self.clone()
    }
}

/// Callback sink into the smart-contract runtime.
///
/// Handlers run as ordinary contract messages inside block execution;
/// a failing handler must not roll back the state that triggered it.
pub trait ContractRuntime {
    /// Deliver a JSON message to the contract at `contract`.
    fn execute(
        &mut self,
        contract: &str,
        msg: &[u8],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Metadata recorded on each committed key-share reference.
#[derive(Serialize)]
struct ShareRefMeta<'a> {
    keyset_id: &'a str,
    threshold: u16,
    curve: &'static str,
    protocol: &'static str,
}

/// Coordination-core keeper over the replicated store.
///
/// Owns the committed tables and the handles to the per-node pieces:
/// the volatile FROST state manager, the stashed-payload slot shared
/// with proposal processing, and the contract runtime for callbacks.
pub struct Keeper<S: KvStore> {
    pub(crate) store: S,
    pub(crate) config: NodeConfig,
    pub(crate) frost: Arc<StateManager>,
    pub(crate) pending: Arc<PayloadSlot>,
    validator_set: Box<dyn ValidatorSet>,
    runtime: Option<Box<dyn ContractRuntime>>,
}

impl<S: KvStore> Keeper<S> {
    /// Create a keeper.
    pub fn new(
        store: S,
        config: NodeConfig,
        frost: Arc<StateManager>,
        pending: Arc<PayloadSlot>,
        validator_set: Box<dyn ValidatorSet>,
    ) -> Self {
        Self {
            store,
            config,
            frost,
            pending,
            validator_set,
            runtime: None,
        }
    }

    /// Attach the contract runtime for callback delivery.
    ///
    /// Separate from construction because the runtime is initialized
    /// after the keeper in the host's wiring order.
    pub fn set_contract_runtime(
        &mut self,
        runtime: Box<dyn ContractRuntime>,
    ) {
        self.runtime = Some(runtime);
    }

    /// The backing store, e.g. for state-hash comparison.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The per-validator state manager.
    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.frost
    }

    fn next_id(&mut self, kind: &str) -> Result<String> {
        let next = SEQUENCES.get(&self.store, kind)?.unwrap_or(0) + 1;
        SEQUENCES.set(&mut self.store, kind, &next)?;
        Ok(format!("{kind}-{next}"))
    }

    // ---- contract operations ----

    /// Create a key set and start its DKG ceremony.
    pub fn create_keyset(
        &mut self,
        owner: &str,
        threshold: u16,
        max_signers: u16,
        description: String,
        timeout_blocks: u64,
        height: u64,
    ) -> Result<String> {
        if threshold == 0 {
            return Err(Error::Invalid("threshold must be positive".into()));
        }
        if threshold > max_signers {
            return Err(Error::Invalid(format!(
                "threshold {threshold} exceeds max signers {max_signers}"
            )));
        }

        let mut participants = self.validator_set.active_validators();
        participants.sort();
        participants.dedup();
        participants.truncate(max_signers as usize);
        if participants.len() < threshold as usize {
            return Err(Error::Invalid(format!(
                "{} active validators cannot meet threshold {threshold}",
                participants.len()
            )));
        }
        let max_signers = participants.len() as u16;

        let timeout_blocks = if timeout_blocks == 0 {
            self.config.session.dkg_timeout_blocks
        } else {
            timeout_blocks
        };

        let id = self.next_id("keyset")?;
        let keyset = KeySet {
            id: id.clone(),
            owner: owner.to_string(),
            threshold,
            max_signers,
            participants: participants.clone(),
            group_pubkey: None,
            status: KeySetStatus::Pending,
            description,
            created_height: height,
        };
        KEYSETS.set(&mut self.store, &id, &keyset)?;

        let session = DkgSession {
            id: id.clone(),
            keyset_id: id.clone(),
            state: DkgState::Round1,
            threshold,
            max_signers,
            participants,
            start_height: height,
            timeout_height: height + timeout_blocks,
        };
        DKG_SESSIONS.set(&mut self.store, &id, &session)?;

        tracing::info!(
            keyset = %id,
            threshold,
            max_signers,
            timeout_height = session.timeout_height,
            "started dkg ceremony"
        );
        Ok(id)
    }

    /// Request a threshold signature over a 32-byte message hash.
    pub fn request_signature(
        &mut self,
        requester: &str,
        keyset_id: &str,
        message_hash: Binary,
        callback: Option<String>,
        height: u64,
    ) -> Result<String> {
        let keyset = KEYSETS.must_get(&self.store, keyset_id)?;
        if keyset.status != KeySetStatus::Active {
            return Err(Error::Invalid(format!(
                "keyset {keyset_id} is not active"
            )));
        }
        if message_hash.len() != MESSAGE_HASH_LEN {
            return Err(Error::Invalid(format!(
                "message hash must be {MESSAGE_HASH_LEN} bytes, got {}",
                message_hash.len()
            )));
        }

        // Fixed selection policy: the first `t` participants by
        // lexicographic address sign.
        let signers: Vec<String> = keyset
            .participants
            .iter()
            .take(keyset.threshold as usize)
            .cloned()
            .collect();

        let id = self.next_id("signreq")?;
        let request = SigningRequest {
            id: id.clone(),
            keyset_id: keyset_id.to_string(),
            requester: requester.to_string(),
            message_hash,
            callback,
            status: RequestStatus::Pending,
            signature: None,
            created_height: height,
        };
        SIGNING_REQUESTS.set(&mut self.store, &id, &request)?;

        let session = SigningSession {
            request_id: id.clone(),
            keyset_id: keyset_id.to_string(),
            threshold: keyset.threshold,
            participants: signers,
            state: SigningState::Round1,
            start_height: height,
            timeout_height: height
                + self.config.session.signing_timeout_blocks,
        };
        SIGNING_SESSIONS.set(&mut self.store, &id, &session)?;

        tracing::info!(
            request = %id,
            keyset = %keyset_id,
            timeout_height = session.timeout_height,
            "started signing session"
        );
        Ok(id)
    }

    // ---- queries ----

    /// Look up a key set.
    pub fn keyset(&self, id: &str) -> Result<KeySet> {
        KEYSETS.must_get(&self.store, id)
    }

    /// Look up a DKG session.
    pub fn dkg_session(&self, id: &str) -> Result<DkgSession> {
        DKG_SESSIONS.must_get(&self.store, id)
    }

    /// Look up a signing request.
    pub fn signing_request(&self, id: &str) -> Result<SigningRequest> {
        SIGNING_REQUESTS.must_get(&self.store, id)
    }

    /// Look up a signing session by request id.
    pub fn signing_session(&self, request_id: &str) -> Result<SigningSession> {
        SIGNING_SESSIONS.must_get(&self.store, request_id)
    }

    /// Look up one validator's key-share reference.
    pub fn key_share_ref(
        &self,
        keyset_id: &str,
        validator_addr: &str,
    ) -> Result<KeyShareRef> {
        KEY_SHARE_REFS
            .must_get(&self.store, &pair_key(keyset_id, validator_addr))
    }

    /// All key-share references recorded for a key set.
    pub fn key_share_refs(&self, keyset_id: &str) -> Result<Vec<KeyShareRef>> {
        KEY_SHARE_REFS.scan(&self.store, &format!("{keyset_id}:"))
    }

    /// Verify a 64-byte signature against a key set's group key.
    pub fn verify_signature(
        &self,
        keyset_id: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        if signature.len() != SIGNATURE_LEN {
            return Err(Error::Invalid(format!(
                "signature must be {SIGNATURE_LEN} bytes, got {}",
                signature.len()
            )));
        }
        let keyset = KEYSETS.must_get(&self.store, keyset_id)?;
        let group_key = keyset.group_pubkey.ok_or_else(|| {
            Error::Invalid(format!("keyset {keyset_id} has no group key"))
        })?;
        if group_key.len() != GROUP_KEY_LEN {
            return Err(Error::Invalid(
                "stored group key has unexpected length".into(),
            ));
        }
        Ok(frostbft_driver::verify_signature(
            group_key.as_ref(),
            message,
            signature,
        )?)
    }

    /// Retire a key set: drop this node's persisted share and the
    /// committed share references.
    pub fn retire_keyset(&mut self, keyset_id: &str) -> Result<()> {
        let keyset = KEYSETS.must_get(&self.store, keyset_id)?;
        for participant in &keyset.participants {
            KEY_SHARE_REFS
                .delete(&mut self.store, &pair_key(keyset_id, participant));
        }
        self.frost.retire_key_share(keyset_id)?;
        tracing::info!(keyset = %keyset_id, "retired key set");
        Ok(())
    }

    // ---- contribution acceptance ----

    /// Record a DKG round 1 commitment, subject to the acceptance
    /// rules. Duplicates are a silent no-op.
    pub fn accept_dkg_round1(
        &mut self,
        session_id: &str,
        validator_addr: &str,
        commitment: Binary,
    ) -> Result<()> {
        let session = DKG_SESSIONS.must_get(&self.store, session_id)?;
        if session.state != DkgState::Round1 {
            return Err(Error::Invalid(format!(
                "dkg session {session_id} is not accepting round 1 data"
            )));
        }
        self.require_participant(&session.participants, validator_addr)?;

        let key = pair_key(session_id, validator_addr);
        if DKG_ROUND1.has(&self.store, &key) {
            tracing::debug!(
                session = %session_id,
                validator = %validator_addr,
                "duplicate round 1 contribution dropped"
            );
            return Ok(());
        }
        DKG_ROUND1.set(
            &mut self.store,
            &key,
            &DkgRound1Data {
                session_id: session_id.to_string(),
                validator_addr: validator_addr.to_string(),
                commitment,
            },
        )
    }

    /// Record a DKG round 2 share, subject to the acceptance rules.
    pub fn accept_dkg_round2(
        &mut self,
        session_id: &str,
        validator_addr: &str,
        share: Binary,
    ) -> Result<()> {
        let session = DKG_SESSIONS.must_get(&self.store, session_id)?;
        if session.state != DkgState::Round2 {
            return Err(Error::Invalid(format!(
                "dkg session {session_id} is not accepting round 2 data"
            )));
        }
        self.require_participant(&session.participants, validator_addr)?;

        let key = pair_key(session_id, validator_addr);
        if DKG_ROUND2.has(&self.store, &key) {
            tracing::debug!(
                session = %session_id,
                validator = %validator_addr,
                "duplicate round 2 contribution dropped"
            );
            return Ok(());
        }
        DKG_ROUND2.set(
            &mut self.store,
            &key,
            &DkgRound2Data {
                session_id: session_id.to_string(),
                validator_addr: validator_addr.to_string(),
                share,
            },
        )
    }

    /// Record a signing commitment, subject to the acceptance rules.
    /// Only the chosen signer subset may contribute.
    pub fn accept_signing_commitment(
        &mut self,
        request_id: &str,
        validator_addr: &str,
        commitment: Binary,
    ) -> Result<()> {
        let session = SIGNING_SESSIONS.must_get(&self.store, request_id)?;
        if session.state != SigningState::Round1 {
            return Err(Error::Invalid(format!(
                "signing session {request_id} is not accepting commitments"
            )));
        }
        self.require_participant(&session.participants, validator_addr)?;

        let key = pair_key(request_id, validator_addr);
        if SIGNING_COMMITMENTS.has(&self.store, &key) {
            tracing::debug!(
                request = %request_id,
                validator = %validator_addr,
                "duplicate signing commitment dropped"
            );
            return Ok(());
        }
        SIGNING_COMMITMENTS.set(
            &mut self.store,
            &key,
            &SigningCommitment {
                request_id: request_id.to_string(),
                validator_addr: validator_addr.to_string(),
                commitment,
            },
        )
    }

    /// Record a signature share, subject to the acceptance rules.
    pub fn accept_signature_share(
        &mut self,
        request_id: &str,
        validator_addr: &str,
        share: Binary,
    ) -> Result<()> {
        let session = SIGNING_SESSIONS.must_get(&self.store, request_id)?;
        if session.state != SigningState::Round2 {
            return Err(Error::Invalid(format!(
                "signing session {request_id} is not accepting shares"
            )));
        }
        self.require_participant(&session.participants, validator_addr)?;

        let key = pair_key(request_id, validator_addr);
        if SIGNATURE_SHARES.has(&self.store, &key) {
            tracing::debug!(
                request = %request_id,
                validator = %validator_addr,
                "duplicate signature share dropped"
            );
            return Ok(());
        }
        SIGNATURE_SHARES.set(
            &mut self.store,
            &key,
            &SignatureShareData {
                request_id: request_id.to_string(),
                validator_addr: validator_addr.to_string(),
                share,
            },
        )
    }

    fn require_participant(
        &self,
        participants: &[String],
        validator_addr: &str,
    ) -> Result<()> {
        if participants.iter().any(|p| p == validator_addr) {
            Ok(())
        } else {
            Err(Error::Invalid(format!(
                "validator {validator_addr} is not a session participant"
            )))
        }
    }

    // ---- committed contribution readers ----

    pub(crate) fn dkg_round1_rows(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, Binary>> {
        Ok(DKG_ROUND1
            .scan(&self.store, &format!("{session_id}:"))?
            .into_iter()
            .map(|row| (row.validator_addr, row.commitment))
            .collect())
    }

    pub(crate) fn dkg_round2_rows(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, Binary>> {
        Ok(DKG_ROUND2
            .scan(&self.store, &format!("{session_id}:"))?
            .into_iter()
            .map(|row| (row.validator_addr, row.share))
            .collect())
    }

    pub(crate) fn signing_commitment_rows(
        &self,
        request_id: &str,
    ) -> Result<BTreeMap<String, Binary>> {
        Ok(SIGNING_COMMITMENTS
            .scan(&self.store, &format!("{request_id}:"))?
            .into_iter()
            .map(|row| (row.validator_addr, row.commitment))
            .collect())
    }

    pub(crate) fn signature_share_rows(
        &self,
        request_id: &str,
    ) -> Result<BTreeMap<String, Binary>> {
        Ok(SIGNATURE_SHARES
            .scan(&self.store, &format!("{request_id}:"))?
            .into_iter()
            .map(|row| (row.validator_addr, row.share))
            .collect())
    }

    // ---- completion ----

    /// Finalize a DKG ceremony whose round 2 reached threshold:
    /// produce the group key, persist this validator's share, flip the
    /// key set active and record a share reference per participant.
    pub(crate) fn complete_dkg(
        &mut self,
        session: &DkgSession,
        height: u64,
    ) -> Result<()> {
        let round1 = self.dkg_round1_rows(&session.id)?;
        let round2 = self.dkg_round2_rows(&session.id)?;

        let (group_key, key_package, public_package) = self.frost.dkg_finalize(
            &session.id,
            &session.participants,
            &round1,
            &round2,
        )?;
        self.frost.store_key_share(
            &session.keyset_id,
            &key_package,
            &public_package,
        )?;

        let mut keyset =
            KEYSETS.must_get(&self.store, &session.keyset_id)?;
        keyset.group_pubkey = Some(Binary(group_key.clone()));
        keyset.status = KeySetStatus::Active;
        KEYSETS.set(&mut self.store, &session.keyset_id, &keyset)?;

        let meta = serde_json::to_vec(&ShareRefMeta {
            keyset_id: &session.keyset_id,
            threshold: session.threshold,
            curve: "ed25519",
            protocol: "frost",
        })?;
        for participant in &session.participants {
            KEY_SHARE_REFS.set(
                &mut self.store,
                &pair_key(&session.keyset_id, participant),
                &KeyShareRef {
                    keyset_id: session.keyset_id.clone(),
                    validator_addr: participant.clone(),
                    share_ref: Binary(meta.clone()),
                    group_pubkey: Binary(group_key.clone()),
                    created_height: height,
                },
            )?;
        }

        self.frost.cleanup_dkg(&session.id);
        tracing::info!(
            keyset = %session.keyset_id,
            group_key = %hex::encode(&group_key),
            "dkg ceremony complete"
        );
        Ok(())
    }

    /// Finalize a signing session whose round 2 reached threshold:
    /// aggregate the signature, record it on the request and deliver
    /// the contract callback.
    pub(crate) fn complete_signing(
        &mut self,
        session: &SigningSession,
        height: u64,
    ) -> Result<()> {
        let mut request =
            SIGNING_REQUESTS.must_get(&self.store, &session.request_id)?;
        let keyset = KEYSETS.must_get(&self.store, &session.keyset_id)?;

        let commitments = self.signing_commitment_rows(&session.request_id)?;
        let shares = self.signature_share_rows(&session.request_id)?;

        let signature = self.frost.sign_finalize(
            &session.keyset_id,
            &keyset.participants,
            &commitments,
            &shares,
            request.message_hash.as_ref(),
        )?;

        request.signature = Some(Binary(signature.clone()));
        request.status = RequestStatus::Complete;
        SIGNING_REQUESTS.set(
            &mut self.store,
            &session.request_id,
            &request,
        )?;

        self.frost.cleanup_sign(&session.request_id);
        tracing::info!(
            request = %session.request_id,
            keyset = %session.keyset_id,
            height,
            "signing session complete"
        );

        if let Some(callback) = request.callback.clone() {
            self.dispatch_callback(&callback, &request.id, &signature);
        }
        Ok(())
    }

    fn dispatch_callback(
        &mut self,
        contract: &str,
        request_id: &str,
        signature: &[u8],
    ) {
        let Some(runtime) = self.runtime.as_mut() else {
            tracing::warn!(
                request = %request_id,
                "no contract runtime configured, skipping callback"
            );
            return;
        };
        let msg = crate::contract::CallbackMsg {
            request_id: request_id.to_string(),
            signature: Binary::from(signature),
        };
        let bytes = match serde_json::to_vec(&msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%err, "failed to encode callback message");
                return;
            }
        };
        // Callback failure does not roll back the completed signature.
        if let Err(err) = runtime.execute(contract, &bytes) {
            tracing::warn!(
                contract = %contract,
                request = %request_id,
                %err,
                "signature callback failed"
            );
        }
    }
}
