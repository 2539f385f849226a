//! Volatile per-validator protocol state and the key-share registry.
//!
//! This state is per-node, never consensus-replicated: only ceremony
//! participants hold driver state, and consensus-visible outputs
//! depend solely on committed contributions. A single read-write lock
//! guards all tables; the only I/O performed under the lock is the
//! short synchronous write persisting a completed key share.
use frostbft_driver::frost_ed25519::keys::{KeyPackage, PublicKeyPackage};
use frostbft_driver::frost_ed25519::Identifier;
use frostbft_driver::{
    aggregate_signature, group_key_to_bytes, signature_to_bytes, DkgDriver,
    DkgPackage, ProtocolDriver, RoundMessage, SignDriver, SignPackage,
};
use frostbft_protocol::{Binary, DkgEnvelope, SignEnvelope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::keystore::KeyShareStore;
use crate::{Error, Result};

/// 1-based position of `addr` in an ordered participant list.
pub(crate) fn party_number_of(
    participants: &[String],
    addr: &str,
) -> Option<u16> {
    participants
        .iter()
        .position(|participant| participant == addr)
        .map(|index| (index + 1) as u16)
}

fn identifier(party: u16) -> Result<Identifier> {
    Ok(Identifier::try_from(party).map_err(frostbft_driver::Error::from)?)
}

struct DkgLocal {
    driver: DkgDriver,
    round1_envelope: Option<Vec<u8>>,
    round2_envelope: Option<Vec<u8>>,
}

struct SignLocal {
    driver: SignDriver,
    round1_envelope: Option<Vec<u8>>,
    round2_envelope: Option<Vec<u8>>,
}

#[derive(Default)]
struct Volatile {
    dkg: HashMap<String, DkgLocal>,
    sign: HashMap<String, SignLocal>,
    key_shares: HashMap<String, KeyPackage>,
    public_shares: HashMap<String, PublicKeyPackage>,
}

/// Per-validator registry of in-flight protocol state and key shares.
pub struct StateManager {
    state: RwLock<Volatile>,
    keystore: KeyShareStore,
}

impl StateManager {
    /// Create a manager backed by the given key-share store.
    pub fn new(keystore: KeyShareStore) -> Self {
        Self {
            state: RwLock::new(Volatile::default()),
            keystore,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Volatile> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Volatile> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load every persisted key share from disk; called once at
    /// startup. Returns the number of shares recovered.
    pub fn load_all(&self) -> Result<usize> {
        let files = self.keystore.load_all()?;
        let mut state = self.write();
        let count = files.len();
        for file in files {
            state
                .key_shares
                .insert(file.keyset_id.clone(), file.secret_share);
            state
                .public_shares
                .insert(file.keyset_id, file.public_shares);
        }
        drop(state);
        if count > 0 {
            tracing::info!(count, "recovered key shares from disk");
        }
        Ok(count)
    }

    /// Whether a key share is loaded for the key set.
    pub fn has_key_share(&self, keyset_id: &str) -> bool {
        self.read().key_shares.contains_key(keyset_id)
    }

    /// Persist a completed key share and register it for signing.
    pub fn store_key_share(
        &self,
        keyset_id: &str,
        secret_share: &KeyPackage,
        public_shares: &PublicKeyPackage,
    ) -> Result<()> {
        let mut state = self.write();
        self.keystore.save(keyset_id, secret_share, public_shares)?;
        state
            .key_shares
            .insert(keyset_id.to_string(), secret_share.clone());
        state
            .public_shares
            .insert(keyset_id.to_string(), public_shares.clone());
        Ok(())
    }

    /// Remove a key share from memory and disk when a key set is
    /// retired.
    pub fn retire_key_share(&self, keyset_id: &str) -> Result<()> {
        let mut state = self.write();
        state.key_shares.remove(keyset_id);
        state.public_shares.remove(keyset_id);
        self.keystore.delete(keyset_id)
    }

    /// Allocate DKG driver state for a session; idempotent.
    pub fn ensure_dkg(
        &self,
        session_id: &str,
        party_number: u16,
        max_signers: u16,
        min_signers: u16,
    ) -> Result<()> {
        let mut state = self.write();
        if state.dkg.contains_key(session_id) {
            return Ok(());
        }
        let driver = DkgDriver::new(party_number, max_signers, min_signers)?;
        state.dkg.insert(
            session_id.to_string(),
            DkgLocal {
                driver,
                round1_envelope: None,
                round2_envelope: None,
            },
        );
        Ok(())
    }

    /// This validator's round 1 commitment envelope for a session.
    ///
    /// Produced once and cached, so re-emission across blocks is
    /// byte-stable.
    pub fn dkg_round1(
        &self,
        session_id: &str,
        validator_addr: &str,
    ) -> Result<Vec<u8>> {
        let mut state = self.write();
        let local = dkg_local(&mut state, session_id)?;
        if let Some(bytes) = &local.round1_envelope {
            return Ok(bytes.clone());
        }

        let messages = local.driver.proceed()?;
        let bytes = encode_dkg_envelope(
            session_id,
            validator_addr,
            &messages,
        )?;
        local.round1_envelope = Some(bytes.clone());
        Ok(bytes)
    }

    /// This validator's round 2 share envelope, driven from the
    /// committed round 1 contributions of its peers.
    pub fn dkg_round2(
        &self,
        session_id: &str,
        validator_addr: &str,
        participants: &[String],
        peer_round1: &BTreeMap<String, Binary>,
    ) -> Result<Vec<u8>> {
        let mut state = self.write();
        let local = dkg_local(&mut state, session_id)?;
        if let Some(bytes) = &local.round2_envelope {
            return Ok(bytes.clone());
        }
        if local.driver.round_number() != 2 {
            return Err(Error::Invalid(format!(
                "dkg session {session_id} has not produced round 1"
            )));
        }

        ingest_dkg(&mut local.driver, participants, peer_round1);
        let messages = local.driver.proceed()?;
        let bytes = encode_dkg_envelope(
            session_id,
            validator_addr,
            &messages,
        )?;
        local.round2_envelope = Some(bytes.clone());
        Ok(bytes)
    }

    /// Drive the final DKG round from committed contributions and
    /// produce the group key, this validator's secret share and the
    /// public share package.
    pub fn dkg_finalize(
        &self,
        session_id: &str,
        participants: &[String],
        round1: &BTreeMap<String, Binary>,
        round2: &BTreeMap<String, Binary>,
    ) -> Result<(Vec<u8>, KeyPackage, PublicKeyPackage)> {
        let mut state = self.write();
        let local = dkg_local(&mut state, session_id)?;

        ingest_dkg(&mut local.driver, participants, round1);
        ingest_dkg(&mut local.driver, participants, round2);

        match local.driver.try_finalize()? {
            Some((key_package, public_package)) => {
                let group_key =
                    group_key_to_bytes(&public_package)?.to_vec();
                Ok((group_key, key_package, public_package))
            }
            None => Err(Error::Invalid(format!(
                "dkg session {session_id} is missing round packages"
            ))),
        }
    }

    /// Drop DKG driver state; idempotent.
    pub fn cleanup_dkg(&self, session_id: &str) {
        self.write().dkg.remove(session_id);
    }

    /// Allocate signing driver state for a request; idempotent.
    ///
    /// Fails with `NotFound` when no key share is loaded for the key
    /// set, e.g. on a node that never completed the DKG.
    pub fn ensure_sign(
        &self,
        request_id: &str,
        keyset_id: &str,
        party_number: u16,
        signers: Vec<u16>,
        min_signers: u16,
        message: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.write();
        if state.sign.contains_key(request_id) {
            return Ok(());
        }

        let key_package = state
            .key_shares
            .get(keyset_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("key share for keyset {keyset_id}"))
            })?;
        let public_package = state
            .public_shares
            .get(keyset_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "public shares for keyset {keyset_id}"
                ))
            })?;

        let driver = SignDriver::new(
            party_number,
            signers,
            min_signers,
            key_package,
            public_package,
            message,
        )?;
        state.sign.insert(
            request_id.to_string(),
            SignLocal {
                driver,
                round1_envelope: None,
                round2_envelope: None,
            },
        );
        Ok(())
    }

    /// This validator's signing commitment envelope for a request.
    pub fn sign_round1(
        &self,
        request_id: &str,
        validator_addr: &str,
    ) -> Result<Vec<u8>> {
        let mut state = self.write();
        let local = sign_local(&mut state, request_id)?;
        if let Some(bytes) = &local.round1_envelope {
            return Ok(bytes.clone());
        }

        let messages = local.driver.proceed()?;
        let bytes = encode_sign_envelope(
            request_id,
            validator_addr,
            &messages,
        )?;
        local.round1_envelope = Some(bytes.clone());
        Ok(bytes)
    }

    /// This validator's signature share envelope, driven from the
    /// committed commitments of the other chosen signers.
    pub fn sign_round2(
        &self,
        request_id: &str,
        validator_addr: &str,
        participants: &[String],
        peer_commitments: &BTreeMap<String, Binary>,
    ) -> Result<Vec<u8>> {
        let mut state = self.write();
        let local = sign_local(&mut state, request_id)?;
        if let Some(bytes) = &local.round2_envelope {
            return Ok(bytes.clone());
        }
        if local.driver.round_number() != 2 {
            return Err(Error::Invalid(format!(
                "signing request {request_id} has not produced a commitment"
            )));
        }

        ingest_sign(&mut local.driver, participants, peer_commitments);
        let messages = local.driver.proceed()?;
        let bytes = encode_sign_envelope(
            request_id,
            validator_addr,
            &messages,
        )?;
        local.round2_envelope = Some(bytes.clone());
        Ok(bytes)
    }

    /// Aggregate committed commitments and shares into the final
    /// 64-byte signature.
    ///
    /// Needs only the key set's public share package, so every DKG
    /// participant computes the identical signature whether or not it
    /// was in the chosen signer subset.
    pub fn sign_finalize(
        &self,
        keyset_id: &str,
        participants: &[String],
        commitments: &BTreeMap<String, Binary>,
        shares: &BTreeMap<String, Binary>,
        message: &[u8],
    ) -> Result<Vec<u8>> {
        let state = self.read();
        let public_package =
            state.public_shares.get(keyset_id).ok_or_else(|| {
                Error::NotFound(format!(
                    "public shares for keyset {keyset_id}"
                ))
            })?;

        let mut commitment_map = BTreeMap::new();
        for (addr, payload) in commitments {
            let Some((party, body)) =
                unwrap_sign_contribution(participants, addr, payload)
            else {
                continue;
            };
            if let SignPackage::Round1(value) = body {
                commitment_map.insert(identifier(party)?, value);
            }
        }

        let mut share_map = BTreeMap::new();
        for (addr, payload) in shares {
            let Some((party, body)) =
                unwrap_sign_contribution(participants, addr, payload)
            else {
                continue;
            };
            if let SignPackage::Round2(value) = body {
                share_map.insert(identifier(party)?, value);
            }
        }

        let signature = aggregate_signature(
            &commitment_map,
            &share_map,
            message,
            public_package,
        )?;
        Ok(signature_to_bytes(&signature)?.to_vec())
    }

    /// Drop signing driver state; idempotent.
    pub fn cleanup_sign(&self, request_id: &str) {
        self.write().sign.remove(request_id);
    }
}

fn dkg_local<'a>(
    state: &'a mut Volatile,
    session_id: &str,
) -> Result<&'a mut DkgLocal> {
    state.dkg.get_mut(session_id).ok_or_else(|| {
        Error::NotFound(format!("dkg state for session {session_id}"))
    })
}

fn sign_local<'a>(
    state: &'a mut Volatile,
    request_id: &str,
) -> Result<&'a mut SignLocal> {
    state.sign.get_mut(request_id).ok_or_else(|| {
        Error::NotFound(format!("sign state for request {request_id}"))
    })
}

fn encode_dkg_envelope(
    session_id: &str,
    validator_addr: &str,
    messages: &[RoundMessage<DkgPackage>],
) -> Result<Vec<u8>> {
    let envelope = DkgEnvelope {
        session_id: session_id.to_string(),
        validator_addr: validator_addr.to_string(),
        messages: encode_messages(messages)?,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn encode_sign_envelope(
    request_id: &str,
    validator_addr: &str,
    messages: &[RoundMessage<SignPackage>],
) -> Result<Vec<u8>> {
    let envelope = SignEnvelope {
        request_id: request_id.to_string(),
        validator_addr: validator_addr.to_string(),
        messages: encode_messages(messages)?,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn encode_messages<B: Serialize + DeserializeOwned>(
    messages: &[RoundMessage<B>],
) -> Result<Vec<Binary>> {
    messages
        .iter()
        .map(|message| Ok(Binary(message.to_bytes()?)))
        .collect()
}

/// Feed one peer envelope's messages into a driver, keeping only
/// messages addressed to this party whose claimed sender matches the
/// party number registered for the contributing validator.
fn ingest_messages<D, B>(
    driver: &mut D,
    self_party: u16,
    sender_party: u16,
    messages: &[Binary],
) where
    D: ProtocolDriver<Message = RoundMessage<B>>,
    B: Serialize + DeserializeOwned,
{
    for bytes in messages {
        let message = match RoundMessage::<B>::from_bytes(bytes.as_ref()) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "dropping undecodable round message");
                continue;
            }
        };
        if message.receiver != self_party {
            continue;
        }
        if message.sender != sender_party {
            tracing::warn!(
                claimed = message.sender,
                expected = sender_party,
                "dropping round message with forged sender"
            );
            continue;
        }
        if let Err(err) = driver.handle_incoming(message) {
            tracing::warn!(%err, "driver rejected round message");
        }
    }
}

fn ingest_dkg(
    driver: &mut DkgDriver,
    participants: &[String],
    rows: &BTreeMap<String, Binary>,
) {
    let self_party = driver.party_number();
    for (addr, payload) in rows {
        let Some(party) = party_number_of(participants, addr) else {
            tracing::warn!(validator = %addr, "contribution from non-participant");
            continue;
        };
        if party == self_party {
            continue;
        }
        let envelope: DkgEnvelope =
            match serde_json::from_slice(payload.as_ref()) {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::warn!(validator = %addr, %err, "dropping malformed dkg envelope");
                    continue;
                }
            };
        if envelope.validator_addr != *addr {
            tracing::warn!(validator = %addr, "dkg envelope address mismatch");
            continue;
        }
        ingest_messages(driver, self_party, party, &envelope.messages);
    }
}

fn ingest_sign(
    driver: &mut SignDriver,
    participants: &[String],
    rows: &BTreeMap<String, Binary>,
) {
    let self_party = driver.party_number();
    for (addr, payload) in rows {
        let Some(party) = party_number_of(participants, addr) else {
            tracing::warn!(validator = %addr, "contribution from non-participant");
            continue;
        };
        if party == self_party {
            continue;
        }
        let envelope: SignEnvelope =
            match serde_json::from_slice(payload.as_ref()) {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::warn!(validator = %addr, %err, "dropping malformed sign envelope");
                    continue;
                }
            };
        if envelope.validator_addr != *addr {
            tracing::warn!(validator = %addr, "sign envelope address mismatch");
            continue;
        }
        ingest_messages(driver, self_party, party, &envelope.messages);
    }
}

/// Extract the (party number, first decodable package) of one signing
/// contribution row.
fn unwrap_sign_contribution(
    participants: &[String],
    addr: &str,
    payload: &Binary,
) -> Option<(u16, SignPackage)> {
    let Some(party) = party_number_of(participants, addr) else {
        tracing::warn!(validator = %addr, "contribution from non-participant");
        return None;
    };
    let envelope: SignEnvelope =
        match serde_json::from_slice(payload.as_ref()) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(validator = %addr, %err, "dropping malformed sign envelope");
                return None;
            }
        };
    for bytes in &envelope.messages {
        if let Ok(message) =
            RoundMessage::<SignPackage>::from_bytes(bytes.as_ref())
        {
            if message.sender == party {
                return Some((party, message.body));
            }
        }
    }
    None
}
