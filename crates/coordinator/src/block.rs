//! Begin- and end-of-block session driving.
//!
//! Begin-of-block drains the stashed aggregated payload into the
//! committed contribution tables; end-of-block walks every
//! non-terminal session and applies round transitions, completion and
//! height-based timeouts. Both run inside deterministic block
//! execution.
use frostbft_protocol::{DkgState, KeySetStatus, RequestStatus, SigningState};

use crate::keeper::{
    Keeper, DKG_SESSIONS, KEYSETS, SIGNING_REQUESTS, SIGNING_SESSIONS,
};
use crate::store::KvStore;
use crate::{Error, Result};

/// Whether a completion failure is scoped to one session (the session
/// fails) or a store-level fault that must halt the replica.
fn is_session_failure(err: &Error) -> bool {
    matches!(
        err,
        Error::Crypto(_) | Error::Invalid(_) | Error::NotFound(_)
    )
}

impl<S: KvStore> Keeper<S> {
    /// Ingest the stashed aggregated payload into committed state.
    ///
    /// Per-contribution errors are logged and skipped; one bad
    /// validator must not block the rest of the batch.
    pub fn begin_block(&mut self, height: u64) -> Result<()> {
        let Some(payload) = self.pending.take() else {
            return Ok(());
        };

        tracing::info!(
            height,
            dkg_round1 = payload.dkg_round1.len(),
            dkg_round2 = payload.dkg_round2.len(),
            commitments = payload.signing_commitments.len(),
            shares = payload.signature_shares.len(),
            "processing aggregated contributions"
        );

        for (session_id, contributions) in &payload.dkg_round1 {
            for (validator, data) in contributions {
                if let Err(err) = self.accept_dkg_round1(
                    session_id,
                    validator,
                    data.clone(),
                ) {
                    tracing::warn!(
                        session = %session_id,
                        validator = %validator,
                        %err,
                        "dropped dkg round 1 contribution"
                    );
                }
            }
        }
        for (session_id, contributions) in &payload.dkg_round2 {
            for (validator, data) in contributions {
                if let Err(err) = self.accept_dkg_round2(
                    session_id,
                    validator,
                    data.clone(),
                ) {
                    tracing::warn!(
                        session = %session_id,
                        validator = %validator,
                        %err,
                        "dropped dkg round 2 contribution"
                    );
                }
            }
        }
        for (request_id, contributions) in &payload.signing_commitments {
            for (validator, data) in contributions {
                if let Err(err) = self.accept_signing_commitment(
                    request_id,
                    validator,
                    data.clone(),
                ) {
                    tracing::warn!(
                        request = %request_id,
                        validator = %validator,
                        %err,
                        "dropped signing commitment"
                    );
                }
            }
        }
        for (request_id, contributions) in &payload.signature_shares {
            for (validator, data) in contributions {
                if let Err(err) = self.accept_signature_share(
                    request_id,
                    validator,
                    data.clone(),
                ) {
                    tracing::warn!(
                        request = %request_id,
                        validator = %validator,
                        %err,
                        "dropped signature share"
                    );
                }
            }
        }
        Ok(())
    }

    /// Advance every non-terminal session.
    ///
    /// DKG sessions are processed before signing sessions; iteration
    /// follows the store's key order.
    pub fn end_block(&mut self, height: u64) -> Result<()> {
        self.advance_dkg_sessions(height)?;
        self.advance_signing_sessions(height)
    }

    fn advance_dkg_sessions(&mut self, height: u64) -> Result<()> {
        let sessions = DKG_SESSIONS.scan(&self.store, "")?;
        for mut session in sessions {
            if session.state.is_terminal() {
                continue;
            }

            if height >= session.timeout_height {
                tracing::warn!(
                    session = %session.id,
                    height,
                    "dkg session timed out"
                );
                session.state = DkgState::Failed;
                DKG_SESSIONS.set(&mut self.store, &session.id, &session)?;
                self.frost.cleanup_dkg(&session.id);
                continue;
            }

            match session.state {
                DkgState::Round1 => {
                    let count = self.dkg_round1_rows(&session.id)?.len();
                    if count >= session.threshold as usize {
                        tracing::info!(
                            session = %session.id,
                            count,
                            "dkg advancing to round 2"
                        );
                        session.state = DkgState::Round2;
                        DKG_SESSIONS.set(
                            &mut self.store,
                            &session.id,
                            &session,
                        )?;
                    }
                }
                DkgState::Round2 => {
                    let count = self.dkg_round2_rows(&session.id)?.len();
                    if count < session.threshold as usize {
                        continue;
                    }
                    match self.complete_dkg(&session, height) {
                        Ok(()) => {
                            session.state = DkgState::Complete;
                            DKG_SESSIONS.set(
                                &mut self.store,
                                &session.id,
                                &session,
                            )?;
                        }
                        Err(err) if is_session_failure(&err) => {
                            tracing::error!(
                                session = %session.id,
                                %err,
                                "dkg completion failed"
                            );
                            session.state = DkgState::Failed;
                            DKG_SESSIONS.set(
                                &mut self.store,
                                &session.id,
                                &session,
                            )?;
                            let mut keyset = KEYSETS
                                .must_get(&self.store, &session.keyset_id)?;
                            keyset.status = KeySetStatus::Failed;
                            KEYSETS.set(
                                &mut self.store,
                                &session.keyset_id,
                                &keyset,
                            )?;
                            self.frost.cleanup_dkg(&session.id);
                        }
                        Err(err) => return Err(err),
                    }
                }
                DkgState::Complete | DkgState::Failed => {}
            }
        }
        Ok(())
    }

    fn advance_signing_sessions(&mut self, height: u64) -> Result<()> {
        let sessions = SIGNING_SESSIONS.scan(&self.store, "")?;
        for mut session in sessions {
            if session.state.is_terminal() {
                continue;
            }

            if height >= session.timeout_height {
                tracing::warn!(
                    request = %session.request_id,
                    height,
                    "signing session timed out"
                );
                session.state = SigningState::Failed;
                SIGNING_SESSIONS.set(
                    &mut self.store,
                    &session.request_id,
                    &session,
                )?;
                self.fail_request(&session.request_id)?;
                self.frost.cleanup_sign(&session.request_id);
                continue;
            }

            match session.state {
                SigningState::Round1 => {
                    let count = self
                        .signing_commitment_rows(&session.request_id)?
                        .len();
                    if count >= session.threshold as usize {
                        tracing::info!(
                            request = %session.request_id,
                            count,
                            "signing advancing to round 2"
                        );
                        session.state = SigningState::Round2;
                        SIGNING_SESSIONS.set(
                            &mut self.store,
                            &session.request_id,
                            &session,
                        )?;

                        let mut request = SIGNING_REQUESTS
                            .must_get(&self.store, &session.request_id)?;
                        request.status = RequestStatus::InProgress;
                        SIGNING_REQUESTS.set(
                            &mut self.store,
                            &session.request_id,
                            &request,
                        )?;
                    }
                }
                SigningState::Round2 => {
                    let count = self
                        .signature_share_rows(&session.request_id)?
                        .len();
                    if count < session.threshold as usize {
                        continue;
                    }
                    match self.complete_signing(&session, height) {
                        Ok(()) => {
                            session.state = SigningState::Complete;
                            SIGNING_SESSIONS.set(
                                &mut self.store,
                                &session.request_id,
                                &session,
                            )?;
                        }
                        Err(err) if is_session_failure(&err) => {
                            tracing::error!(
                                request = %session.request_id,
                                %err,
                                "signature aggregation failed"
                            );
                            session.state = SigningState::Failed;
                            SIGNING_SESSIONS.set(
                                &mut self.store,
                                &session.request_id,
                                &session,
                            )?;
                            self.fail_request(&session.request_id)?;
                            self.frost.cleanup_sign(&session.request_id);
                        }
                        Err(err) => return Err(err),
                    }
                }
                SigningState::Complete | SigningState::Failed => {}
            }
        }
        Ok(())
    }

    fn fail_request(&mut self, request_id: &str) -> Result<()> {
        let mut request =
            SIGNING_REQUESTS.must_get(&self.store, request_id)?;
        request.status = RequestStatus::Failed;
        SIGNING_REQUESTS.set(&mut self.store, request_id, &request)
    }
}
