//! Connection identity.

crate::id::uuid_id! {
    /// Unique identity of one peer connection.
    ///
    /// Assigned when the connection object is created, before any I/O, so
    /// even a failed dial can be reported by ID.
    pub struct ConnectionId;
}
