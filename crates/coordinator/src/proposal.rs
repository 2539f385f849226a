//! Proposer aggregation and proposal verification.
//!
//! The proposer folds the previous block's vote extensions into an
//! [`AggregatedPayload`] and prepends it to the transaction list;
//! every validator decodes the first transaction during proposal
//! processing and stashes a recognized payload for begin-of-block.
use frostbft_protocol::{AggregatedPayload, VoteExtension};
use std::sync::{Mutex, PoisonError};

use crate::Result;

/// Commit vote observed by the proposer, from the previous block.
#[derive(Debug, Clone)]
pub struct CommitVote {
    /// Raw consensus address of the voting validator.
    pub validator: Vec<u8>,
    /// The validator's vote-extension bytes; may be empty.
    pub extension: Vec<u8>,
}

/// Single-slot mailbox for the payload stashed between proposal
/// processing and begin-of-block.
///
/// Capacity one, last-writer-wins, consumed exactly once per block on
/// the same replica, so contention is nominal.
#[derive(Default)]
pub struct PayloadSlot {
    inner: Mutex<Option<AggregatedPayload>>,
}

impl PayloadSlot {
    /// Stash a payload, replacing any previous one.
    pub fn put(&self, payload: AggregatedPayload) {
        let mut slot =
            self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(payload);
    }

    /// Atomically read and clear the stashed payload.
    pub fn take(&self) -> Option<AggregatedPayload> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Fold an ordered vote list into the canonical aggregated payload.
///
/// Malformed extensions are skipped with a warning; the proposer never
/// aborts over one bad vote. The result is a deterministic function of
/// the vote list.
pub fn aggregate_votes(votes: &[CommitVote]) -> AggregatedPayload {
    let mut payload = AggregatedPayload::default();
    for vote in votes {
        if vote.extension.is_empty() {
            continue;
        }
        let validator_addr = hex::encode(&vote.validator);

        let extension: VoteExtension =
            match serde_json::from_slice(&vote.extension) {
                Ok(extension) => extension,
                Err(err) => {
                    tracing::warn!(
                        validator = %validator_addr,
                        %err,
                        "skipping malformed vote extension"
                    );
                    continue;
                }
            };

        for (session_id, data) in extension.dkg_round1 {
            payload
                .dkg_round1
                .entry(session_id)
                .or_default()
                .insert(validator_addr.clone(), data);
        }
        for (session_id, data) in extension.dkg_round2 {
            payload
                .dkg_round2
                .entry(session_id)
                .or_default()
                .insert(validator_addr.clone(), data);
        }
        for (request_id, data) in extension.signing_commitments {
            payload
                .signing_commitments
                .entry(request_id)
                .or_default()
                .insert(validator_addr.clone(), data);
        }
        for (request_id, data) in extension.signature_shares {
            payload
                .signature_shares
                .entry(request_id)
                .or_default()
                .insert(validator_addr.clone(), data);
        }
    }
    payload
}

/// Builds and verifies the synthetic first transaction.
pub struct ProposalHandler {
    slot: std::sync::Arc<PayloadSlot>,
}

impl ProposalHandler {
    /// Create a handler sharing the keeper's payload slot.
    pub fn new(slot: std::sync::Arc<PayloadSlot>) -> Self {
        Self { slot }
    }

    /// Aggregate the previous block's vote extensions and prepend the
    /// payload to the transaction list.
    ///
    /// A block with no contributions carries no payload at all.
    pub fn prepare_proposal(
        &self,
        height: u64,
        votes: &[CommitVote],
        txs: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>> {
        let payload = aggregate_votes(votes);
        if payload.is_empty() {
            return Ok(txs);
        }

        tracing::info!(
            height,
            dkg_round1 = payload.dkg_round1.len(),
            dkg_round2 = payload.dkg_round2.len(),
            commitments = payload.signing_commitments.len(),
            shares = payload.signature_shares.len(),
            "injecting aggregated payload"
        );

        let encoded = serde_json::to_vec(&payload)?;
        let mut out = Vec::with_capacity(txs.len() + 1);
        out.push(encoded);
        out.extend(txs);
        Ok(out)
    }

    /// Inspect a proposed block; a first transaction that decodes as a
    /// payload is stashed for begin-of-block.
    ///
    /// Always accepts: a first transaction that is not a payload is an
    /// ordinary transaction validated elsewhere.
    // TODO: cross-check the payload against the consensus record of
    // the previous commit's vote extensions before accepting.
    pub fn process_proposal(&self, height: u64, txs: &[Vec<u8>]) -> bool {
        let Some(first) = txs.first() else {
            return true;
        };

        match serde_json::from_slice::<AggregatedPayload>(first) {
            Ok(payload) => {
                tracing::debug!(
                    height,
                    "stashing aggregated payload for begin-block"
                );
                self.slot.put(payload);
            }
            Err(_) => {
                tracing::debug!(
                    height,
                    "first transaction is not an aggregated payload"
                );
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frostbft_protocol::Binary;
    use std::sync::Arc;

    fn vote(addr: &[u8], extension: &VoteExtension) -> CommitVote {
        CommitVote {
            validator: addr.to_vec(),
            extension: serde_json::to_vec(extension).unwrap(),
        }
    }

    #[test]
    fn aggregation_is_keyed_by_vote_signer() {
        let mut ext_a = VoteExtension::default();
        ext_a
            .dkg_round1
            .insert("keyset-1".into(), Binary(vec![1]));
        let mut ext_b = VoteExtension::default();
        ext_b
            .dkg_round1
            .insert("keyset-1".into(), Binary(vec![2]));

        let payload = aggregate_votes(&[
            vote(&[0xaa], &ext_a),
            vote(&[0xbb], &ext_b),
        ]);
        let session = payload.dkg_round1.get("keyset-1").unwrap();
        assert_eq!(session.get("aa"), Some(&Binary(vec![1])));
        assert_eq!(session.get("bb"), Some(&Binary(vec![2])));
    }

    #[test]
    fn malformed_extensions_are_skipped() {
        let mut ext = VoteExtension::default();
        ext.dkg_round1.insert("keyset-1".into(), Binary(vec![1]));

        let payload = aggregate_votes(&[
            CommitVote {
                validator: vec![0xaa],
                extension: b"garbage".to_vec(),
            },
            vote(&[0xbb], &ext),
        ]);
        assert_eq!(payload.dkg_round1["keyset-1"].len(), 1);
    }

    #[test]
    fn empty_votes_produce_no_payload() {
        let slot = Arc::new(PayloadSlot::default());
        let handler = ProposalHandler::new(Arc::clone(&slot));

        let txs = handler
            .prepare_proposal(5, &[], vec![b"tx".to_vec()])
            .unwrap();
        assert_eq!(txs, vec![b"tx".to_vec()]);
    }

    #[test]
    fn payload_is_prepended_and_stashed() {
        let slot = Arc::new(PayloadSlot::default());
        let handler = ProposalHandler::new(Arc::clone(&slot));

        let mut ext = VoteExtension::default();
        ext.dkg_round1.insert("keyset-1".into(), Binary(vec![1]));
        let votes = [vote(&[0xaa], &ext)];

        let txs = handler
            .prepare_proposal(5, &votes, vec![b"tx".to_vec()])
            .unwrap();
        assert_eq!(txs.len(), 2);

        assert!(handler.process_proposal(5, &txs));
        let stashed = slot.take().expect("payload stashed");
        assert_eq!(stashed.dkg_round1["keyset-1"]["aa"], Binary(vec![1]));
        assert!(slot.take().is_none());
    }

    #[test]
    fn non_payload_first_transaction_is_accepted() {
        let slot = Arc::new(PayloadSlot::default());
        let handler = ProposalHandler::new(Arc::clone(&slot));

        assert!(handler.process_proposal(5, &[b"ordinary tx".to_vec()]));
        assert!(slot.take().is_none());
        assert!(handler.process_proposal(5, &[]));
    }

    #[test]
    fn slot_is_last_writer_wins() {
        let slot = PayloadSlot::default();
        let mut first = AggregatedPayload::default();
        first
            .dkg_round1
            .entry("keyset-1".into())
            .or_default()
            .insert("aa".into(), Binary(vec![1]));
        slot.put(first);
        slot.put(AggregatedPayload::default());

        let taken = slot.take().expect("payload present");
        assert!(taken.is_empty());
    }
}
