//! Distributed key generation driver.
use frost_ed25519::keys::dkg::{self, round1, round2};
use frost_ed25519::keys::{KeyPackage, PublicKeyPackage};
use frost_ed25519::Identifier;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    Error, ProtocolDriver, Result, RoundMessage, ROUND_1, ROUND_2, ROUND_3,
};

/// Output of a completed key generation: this participant's key
/// package and the group's public key package.
pub type DkgOutput = (KeyPackage, PublicKeyPackage);

/// Packages exchanged during key generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DkgPackage {
    /// Broadcast commitment package.
    Round1(round1::Package),
    /// Per-receiver share package.
    Round2(round2::Package),
}

/// Drives FROST distributed key generation for one participant.
///
/// Identifiers are derived from 1-based party numbers in the session's
/// ordered participant list, so every participant agrees on the
/// identifier of every other.
pub struct DkgDriver {
    party_number: u16,
    max_signers: u16,
    min_signers: u16,
    id: Identifier,
    identifiers: Vec<Identifier>,
    round_number: u8,

    round1_secret: Option<round1::SecretPackage>,
    received_round1: BTreeMap<Identifier, round1::Package>,

    round2_secret: Option<round2::SecretPackage>,
    received_round2: BTreeMap<Identifier, round2::Package>,
}

impl DkgDriver {
    /// Create a driver for the participant with the given 1-based
    /// party number.
    pub fn new(
        party_number: u16,
        max_signers: u16,
        min_signers: u16,
    ) -> Result<Self> {
        if party_number == 0 || party_number > max_signers {
            return Err(Error::PartyNumber(party_number));
        }

        let mut identifiers = Vec::with_capacity(max_signers as usize);
        for party in 1..=max_signers {
            identifiers.push(Identifier::try_from(party)?);
        }
        let id = identifiers[party_number as usize - 1];

        Ok(Self {
            party_number,
            max_signers,
            min_signers,
            id,
            identifiers,
            round_number: ROUND_1,

            round1_secret: None,
            received_round1: BTreeMap::new(),

            round2_secret: None,
            received_round2: BTreeMap::new(),
        })
    }

    /// This participant's 1-based party number.
    pub fn party_number(&self) -> u16 {
        self.party_number
    }

    /// Round the driver will produce output for next.
    pub fn round_number(&self) -> u8 {
        self.round_number
    }

    fn identifier_of(&self, party: u16) -> Result<Identifier> {
        if party == 0 || party > self.max_signers {
            return Err(Error::UnknownSender(party));
        }
        Ok(self.identifiers[party as usize - 1])
    }

    fn party_of(&self, id: &Identifier) -> Result<u16> {
        let index = self
            .identifiers
            .iter()
            .position(|candidate| candidate == id)
            .ok_or(Error::PartyNumber(0))?;
        Ok((index + 1) as u16)
    }
}

impl ProtocolDriver for DkgDriver {
    type Message = RoundMessage<DkgPackage>;
    type Output = DkgOutput;

    fn can_finalize(&self) -> bool {
        let needs = self.max_signers as usize - 1;
        self.round_number == ROUND_3
            && self.received_round1.len() == needs
            && self.received_round2.len() == needs
    }

    fn proceed(&mut self) -> Result<Vec<Self::Message>> {
        match self.round_number {
            // Round 1 broadcasts the same commitment package to every
            // other participant.
            ROUND_1 => {
                let (secret, package) = dkg::part1(
                    self.id,
                    self.max_signers,
                    self.min_signers,
                    &mut OsRng,
                )?;
                self.round1_secret = Some(secret);

                let mut messages =
                    Vec::with_capacity(self.max_signers as usize - 1);
                for receiver in 1..=self.max_signers {
                    if receiver == self.party_number {
                        continue;
                    }
                    messages.push(RoundMessage {
                        round: ROUND_1,
                        sender: self.party_number,
                        receiver,
                        body: DkgPackage::Round1(package.clone()),
                    });
                }

                self.round_number = ROUND_2;
                Ok(messages)
            }
            // Round 2 sends a distinct share package to each receiver.
            ROUND_2 => {
                let round1_secret = self
                    .round1_secret
                    .take()
                    .ok_or(Error::Round2TooEarly)?;

                let (round2_secret, packages) =
                    dkg::part2(round1_secret, &self.received_round1)?;
                self.round2_secret = Some(round2_secret);

                let mut messages = Vec::with_capacity(packages.len());
                for (receiver_id, package) in packages {
                    messages.push(RoundMessage {
                        round: ROUND_2,
                        sender: self.party_number,
                        receiver: self.party_of(&receiver_id)?,
                        body: DkgPackage::Round2(package),
                    });
                }

                self.round_number = ROUND_3;
                Ok(messages)
            }
            round => Err(Error::InvalidRound(round)),
        }
    }

    fn handle_incoming(&mut self, message: Self::Message) -> Result<()> {
        let sender = self.identifier_of(message.sender)?;
        match (message.round, message.body) {
            (ROUND_1, DkgPackage::Round1(package)) => {
                self.received_round1.insert(sender, package);
                Ok(())
            }
            (ROUND_2, DkgPackage::Round2(package)) => {
                self.received_round2.insert(sender, package);
                Ok(())
            }
            (round, _) => Err(Error::RoundPayload(round)),
        }
    }

    fn try_finalize(&mut self) -> Result<Option<Self::Output>> {
        if !self.can_finalize() {
            return Ok(None);
        }
        let round2_secret = self
            .round2_secret
            .as_ref()
            .ok_or(Error::FinalizeTooEarly)?;

        let output = dkg::part3(
            round2_secret,
            &self.received_round1,
            &self.received_round2,
        )?;
        Ok(Some(output))
    }
}
