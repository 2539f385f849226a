//! Vote-extension production.
//!
//! Runs outside block execution, possibly concurrently with it; the
//! committed store is only read, and all mutable state lives behind
//! the state manager's lock. Per-session failures are logged and
//! skipped so one stuck ceremony never empties the whole extension.
use frostbft_protocol::{Binary, DkgState, SigningState, VoteExtension};

use crate::keeper::{
    Keeper, DKG_SESSIONS, KEYSETS, SIGNING_REQUESTS, SIGNING_SESSIONS,
};
use crate::manager::party_number_of;
use crate::store::KvStore;
use crate::Result;

impl<S: KvStore> Keeper<S> {
    /// Compute this validator's contributions for every session in an
    /// active round.
    ///
    /// Contributions are re-emitted each block until the session moves
    /// on; committed state suppresses the duplicates, and re-emission
    /// keeps ceremonies live across missed votes.
    pub fn extend_vote(&self, height: u64) -> Result<VoteExtension> {
        let mut extension = VoteExtension::default();
        let self_addr = self.config.validator_address.clone();
        if self_addr.is_empty() {
            return Ok(extension);
        }

        self.extend_dkg(height, &self_addr, &mut extension)?;
        self.extend_signing(height, &self_addr, &mut extension)?;
        Ok(extension)
    }

    fn extend_dkg(
        &self,
        height: u64,
        self_addr: &str,
        extension: &mut VoteExtension,
    ) -> Result<()> {
        for session in DKG_SESSIONS.scan(&self.store, "")? {
            if session.state.is_terminal()
                || height >= session.timeout_height
            {
                continue;
            }
            let Some(party) =
                party_number_of(&session.participants, self_addr)
            else {
                continue;
            };

            if let Err(err) = self.frost.ensure_dkg(
                &session.id,
                party,
                session.max_signers,
                session.threshold,
            ) {
                tracing::warn!(
                    session = %session.id,
                    %err,
                    "failed to allocate dkg state"
                );
                continue;
            }

            match session.state {
                DkgState::Round1 => {
                    match self.frost.dkg_round1(&session.id, self_addr) {
                        Ok(bytes) => {
                            extension
                                .dkg_round1
                                .insert(session.id.clone(), Binary(bytes));
                        }
                        Err(err) => tracing::warn!(
                            session = %session.id,
                            %err,
                            "failed to produce dkg round 1 data"
                        ),
                    }
                }
                DkgState::Round2 => {
                    let peer_round1 = self.dkg_round1_rows(&session.id)?;
                    match self.frost.dkg_round2(
                        &session.id,
                        self_addr,
                        &session.participants,
                        &peer_round1,
                    ) {
                        Ok(bytes) => {
                            extension
                                .dkg_round2
                                .insert(session.id.clone(), Binary(bytes));
                        }
                        Err(err) => tracing::warn!(
                            session = %session.id,
                            %err,
                            "failed to produce dkg round 2 data"
                        ),
                    }
                }
                DkgState::Complete | DkgState::Failed => {}
            }
        }
        Ok(())
    }

    fn extend_signing(
        &self,
        height: u64,
        self_addr: &str,
        extension: &mut VoteExtension,
    ) -> Result<()> {
        for session in SIGNING_SESSIONS.scan(&self.store, "")? {
            if session.state.is_terminal()
                || height >= session.timeout_height
            {
                continue;
            }
            // Only the chosen signer subset contributes.
            if !session.participants.iter().any(|p| p == self_addr) {
                continue;
            }

            // Party numbers for signing come from the key set's full
            // participant list, matching the DKG identifiers.
            let keyset =
                match KEYSETS.must_get(&self.store, &session.keyset_id) {
                    Ok(keyset) => keyset,
                    Err(err) => {
                        tracing::warn!(
                            request = %session.request_id,
                            %err,
                            "signing session without keyset"
                        );
                        continue;
                    }
                };
            let Some(party) =
                party_number_of(&keyset.participants, self_addr)
            else {
                continue;
            };

            match session.state {
                SigningState::Round1 => {
                    let request = match SIGNING_REQUESTS
                        .must_get(&self.store, &session.request_id)
                    {
                        Ok(request) => request,
                        Err(err) => {
                            tracing::warn!(
                                request = %session.request_id,
                                %err,
                                "signing session without request"
                            );
                            continue;
                        }
                    };
                    let signers: Vec<u16> = session
                        .participants
                        .iter()
                        .filter_map(|addr| {
                            party_number_of(&keyset.participants, addr)
                        })
                        .collect();
                    if signers.len() != session.participants.len() {
                        tracing::warn!(
                            request = %session.request_id,
                            "signer subset is not within the keyset"
                        );
                        continue;
                    }

                    if let Err(err) = self.frost.ensure_sign(
                        &session.request_id,
                        &session.keyset_id,
                        party,
                        signers,
                        session.threshold,
                        request.message_hash.clone().into_vec(),
                    ) {
                        tracing::warn!(
                            request = %session.request_id,
                            %err,
                            "failed to allocate signing state"
                        );
                        continue;
                    }
                    match self
                        .frost
                        .sign_round1(&session.request_id, self_addr)
                    {
                        Ok(bytes) => {
                            extension.signing_commitments.insert(
                                session.request_id.clone(),
                                Binary(bytes),
                            );
                        }
                        Err(err) => tracing::warn!(
                            request = %session.request_id,
                            %err,
                            "failed to produce signing commitment"
                        ),
                    }
                }
                SigningState::Round2 => {
                    let peer_commitments =
                        self.signing_commitment_rows(&session.request_id)?;
                    match self.frost.sign_round2(
                        &session.request_id,
                        self_addr,
                        &keyset.participants,
                        &peer_commitments,
                    ) {
                        Ok(bytes) => {
                            extension.signature_shares.insert(
                                session.request_id.clone(),
                                Binary(bytes),
                            );
                        }
                        Err(err) => tracing::warn!(
                            request = %session.request_id,
                            %err,
                            "failed to produce signature share"
                        ),
                    }
                }
                SigningState::Complete | SigningState::Failed => {}
            }
        }
        Ok(())
    }
}
