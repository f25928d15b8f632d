use crate::nostr::event::{EventTemplate, NostrEvent};
use async_trait::async_trait;

/// Signing capability tied to a logged-in account.
///
/// Implementations live outside this crate (browser extensions, hardware
/// signers, in-memory keys); the core only consumes the seam. Cryptographic
/// signing itself is deliberately not implemented here.
#[async_trait]
pub trait NostrSigner: Send + Sync {
    /// Hex public key of the signing identity.
    async fn public_key(&self) -> Result<String, String>;

    /// Signs a template, producing a complete event with `id` and `sig`.
    async fn sign_event(&self, template: EventTemplate) -> Result<NostrEvent, String>;
}
