use shopledger_core::UserId;

/// Acting user for a request.
///
/// Set by an upstream auth layer through the `x-actor-id` header and required
/// on every domain route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor_id: UserId,
}

impl ActorContext {
    pub fn new(actor_id: UserId) -> Self {
        Self { actor_id }
    }

    pub fn actor_id(&self) -> UserId {
        self.actor_id
    }
}
