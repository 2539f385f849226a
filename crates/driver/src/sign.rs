//! Threshold signing driver and signature aggregation.
use frost_ed25519::keys::{KeyPackage, PublicKeyPackage};
use frost_ed25519::round1::{self, SigningCommitments, SigningNonces};
use frost_ed25519::round2::{self, SignatureShare};
use frost_ed25519::{aggregate, Identifier, Signature, SigningPackage};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    Error, ProtocolDriver, Result, RoundMessage, ROUND_1, ROUND_2, ROUND_3,
};

/// Packages exchanged during signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SignPackage {
    /// Broadcast nonce commitments.
    Round1(SigningCommitments),
    /// Broadcast signature share.
    Round2(SignatureShare),
}

/// Drives FROST threshold signing for one chosen signer.
///
/// `signers` holds the 1-based party numbers of the chosen subset
/// within the key set's ordered participant list, so the signing
/// identifiers match the identifiers the key shares were generated
/// under.
pub struct SignDriver {
    party_number: u16,
    id: Identifier,
    signers: Vec<u16>,
    min_signers: u16,
    key_package: KeyPackage,
    public_package: PublicKeyPackage,
    message: Vec<u8>,
    round_number: u8,

    nonces: Option<SigningNonces>,
    commitments: BTreeMap<Identifier, SigningCommitments>,
    signature_shares: BTreeMap<Identifier, SignatureShare>,
}

impl SignDriver {
    /// Create a driver for the signer with the given party number.
    pub fn new(
        party_number: u16,
        signers: Vec<u16>,
        min_signers: u16,
        key_package: KeyPackage,
        public_package: PublicKeyPackage,
        message: Vec<u8>,
    ) -> Result<Self> {
        if party_number == 0 || !signers.contains(&party_number) {
            return Err(Error::PartyNumber(party_number));
        }
        let id = Identifier::try_from(party_number)?;

        Ok(Self {
            party_number,
            id,
            signers,
            min_signers,
            key_package,
            public_package,
            message,
            round_number: ROUND_1,

            nonces: None,
            commitments: BTreeMap::new(),
            signature_shares: BTreeMap::new(),
        })
    }

    /// This signer's 1-based party number.
    pub fn party_number(&self) -> u16 {
        self.party_number
    }

    /// Round the driver will produce output for next.
    pub fn round_number(&self) -> u8 {
        self.round_number
    }

    fn signer_identifier(&self, party: u16) -> Result<Identifier> {
        if !self.signers.contains(&party) {
            return Err(Error::UnknownSender(party));
        }
        Ok(Identifier::try_from(party)?)
    }

    fn broadcast(&self, round: u8, body: &SignPackage) -> Vec<RoundMessage<SignPackage>> {
        self.signers
            .iter()
            .filter(|party| **party != self.party_number)
            .map(|party| RoundMessage {
                round,
                sender: self.party_number,
                receiver: *party,
                body: body.clone(),
            })
            .collect()
    }
}

impl ProtocolDriver for SignDriver {
    type Message = RoundMessage<SignPackage>;
    type Output = Signature;

    fn can_finalize(&self) -> bool {
        self.round_number == ROUND_3
            && self.signature_shares.len() >= self.min_signers as usize
    }

    fn proceed(&mut self) -> Result<Vec<Self::Message>> {
        match self.round_number {
            ROUND_1 => {
                let (nonces, commitments) = round1::commit(
                    self.key_package.signing_share(),
                    &mut OsRng,
                );
                self.nonces = Some(nonces);
                self.commitments.insert(self.id, commitments.clone());

                let messages =
                    self.broadcast(ROUND_1, &SignPackage::Round1(commitments));
                self.round_number = ROUND_2;
                Ok(messages)
            }
            ROUND_2 => {
                let nonces =
                    self.nonces.take().ok_or(Error::Round2TooEarly)?;

                let signing_package = SigningPackage::new(
                    self.commitments.clone(),
                    &self.message,
                );
                let share = round2::sign(
                    &signing_package,
                    &nonces,
                    &self.key_package,
                )?;
                self.signature_shares.insert(self.id, share.clone());

                let messages =
                    self.broadcast(ROUND_2, &SignPackage::Round2(share));
                self.round_number = ROUND_3;
                Ok(messages)
            }
            round => Err(Error::InvalidRound(round)),
        }
    }

    fn handle_incoming(&mut self, message: Self::Message) -> Result<()> {
        let sender = self.signer_identifier(message.sender)?;
        match (message.round, message.body) {
            (ROUND_1, SignPackage::Round1(commitments)) => {
                self.commitments.insert(sender, commitments);
                Ok(())
            }
            (ROUND_2, SignPackage::Round2(share)) => {
                self.signature_shares.insert(sender, share);
                Ok(())
            }
            (round, _) => Err(Error::RoundPayload(round)),
        }
    }

    fn try_finalize(&mut self) -> Result<Option<Self::Output>> {
        if !self.can_finalize() {
            return Ok(None);
        }
        let signature = aggregate_signature(
            &self.commitments,
            &self.signature_shares,
            &self.message,
            &self.public_package,
        )?;
        Ok(Some(signature))
    }
}

/// Aggregate a full set of commitments and signature shares into a
/// group signature.
///
/// Requires only public material, so any party holding the key set's
/// public share package can aggregate, signer or not.
pub fn aggregate_signature(
    commitments: &BTreeMap<Identifier, SigningCommitments>,
    shares: &BTreeMap<Identifier, SignatureShare>,
    message: &[u8],
    public_package: &PublicKeyPackage,
) -> Result<Signature> {
    let signing_package = SigningPackage::new(commitments.clone(), message);
    Ok(aggregate(&signing_package, shares, public_package)?)
}
