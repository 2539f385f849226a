//! Round message plumbing shared by the drivers.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Round message with routing metadata.
///
/// `sender` and `receiver` are 1-based party numbers within the
/// session's ordered participant list. Round 1 of both protocols is a
/// broadcast round, so the same body is addressed to every other
/// party; DKG round 2 carries a distinct body per receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMessage<B> {
    /// Round the body belongs to.
    pub round: u8,
    /// Party number of the producer.
    pub sender: u16,
    /// Party number of the addressee.
    pub receiver: u16,
    /// Protocol payload.
    pub body: B,
}

impl<B> RoundMessage<B>
where
    B: Serialize + DeserializeOwned,
{
    /// Encode to the opaque wire bytes carried inside envelopes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from opaque wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
