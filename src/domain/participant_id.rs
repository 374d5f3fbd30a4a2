//! Participant identity.

// Minted by ActionSource and carried as Event::source.

crate::id::uuid_id! {
    /// Identity of a participant, fixed for its lifetime.
    pub struct ParticipantId;
}
