use thiserror::Error;

/// Errors produced by the protocol drivers.
#[derive(Debug, Error)]
pub enum Error {
    /// Party number is zero or exceeds the participant count.
    #[error("party number {0} is out of range")]
    PartyNumber(u16),

    /// The driver cannot produce output in its current round.
    #[error("round {0} cannot be driven")]
    InvalidRound(u8),

    /// The message body does not belong to the claimed round.
    #[error("unexpected payload for round {0}")]
    RoundPayload(u8),

    /// The message sender is not a registered participant.
    #[error("unknown sender {0}")]
    UnknownSender(u16),

    /// Round 2 was driven before round 1 produced its output.
    #[error("round 2 driven before round 1 completed")]
    Round2TooEarly,

    /// Finalize was attempted before round 2 produced its output.
    #[error("finalize attempted before round 2 completed")]
    FinalizeTooEarly,

    /// A serialized value had an unexpected length.
    #[error("unexpected encoding length for {0}")]
    Encoding(&'static str),

    /// Error from the FROST primitives.
    #[error(transparent)]
    Frost(#[from] frost_ed25519::Error),

    /// Error encoding or decoding a round message.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
