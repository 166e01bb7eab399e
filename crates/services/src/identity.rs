use async_trait::async_trait;

use exam_core::model::UserId;

/// Decides whether `caller` may act on a session owned by `owner`.
///
/// Identity itself is established upstream; the engine only asks this seam.
#[async_trait]
pub trait OwnershipVerifier: Send + Sync {
    async fn verify_owner(&self, owner: UserId, caller: UserId) -> bool;
}

/// Only the user who started a session may touch it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameUserVerifier;

#[async_trait]
impl OwnershipVerifier for SameUserVerifier {
    async fn verify_owner(&self, owner: UserId, caller: UserId) -> bool {
        owner == caller
    }
}
