//! FROST Ed25519 protocol drivers for the coordination core.
//!
//! Wraps the `frost-ed25519` primitives behind small single-step
//! drivers: [`DkgDriver`] for distributed key generation and
//! [`SignDriver`] for threshold signing. A driver consumes inbound
//! round messages and emits the outbound messages of the current
//! round; the host decides when a round has gathered enough input to
//! proceed or finalize.
//!
//! Randomness is drawn only when a round's output is first produced,
//! so a driver fed an identical message history emits identical bytes.
#![deny(missing_docs)]

mod dkg;
mod error;
mod round;
mod sign;

pub use dkg::{DkgDriver, DkgOutput, DkgPackage};
pub use error::Error;
pub use round::RoundMessage;
pub use sign::{aggregate_signature, SignDriver, SignPackage};

pub use frost_ed25519;

use frost_ed25519::keys::PublicKeyPackage;
use frost_ed25519::{Signature, VerifyingKey};

/// Result type for the driver crate.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) const ROUND_1: u8 = 1;
pub(crate) const ROUND_2: u8 = 2;
pub(crate) const ROUND_3: u8 = 3;

/// Trait for implementations that drive a protocol to completion.
pub trait ProtocolDriver {
    /// Message consumed and produced per round.
    type Message;
    /// Output when the protocol completes.
    type Output;

    /// Whether the final round has gathered enough input to finalize.
    fn can_finalize(&self) -> bool;

    /// Produce the current round's outbound messages and advance.
    fn proceed(&mut self) -> Result<Vec<Self::Message>>;

    /// Ingest a message addressed to this party.
    fn handle_incoming(&mut self, message: Self::Message) -> Result<()>;

    /// Finalize the protocol once the last round's inputs are present.
    ///
    /// Returns `Ok(None)` while input is still missing.
    fn try_finalize(&mut self) -> Result<Option<Self::Output>>;
}

/// Serialize a group signature to its 64-byte Ed25519 form.
pub fn signature_to_bytes(signature: &Signature) -> Result<[u8; 64]> {
    let bytes = signature.serialize()?;
    bytes.try_into().map_err(|_| Error::Encoding("signature"))
}

/// Serialize a group public key to its 32-byte Ed25519 form.
pub fn group_key_to_bytes(public: &PublicKeyPackage) -> Result<[u8; 32]> {
    let bytes = public.verifying_key().serialize()?;
    bytes
        .try_into()
        .map_err(|_| Error::Encoding("group public key"))
}

/// Verify a 64-byte signature over `message` under a 32-byte group key.
pub fn verify_signature(
    group_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let key = VerifyingKey::deserialize(group_key)?;
    let signature = Signature::deserialize(signature)?;
    Ok(key.verify(message, &signature)?)
}
