//! Account state and the signer provider consumed by the session manager.

pub mod keyring;

pub use keyring::{AccountKeyStore, KeyringAccessError};

use crate::nostr::signer::NostrSigner;
use std::sync::{Arc, RwLock};

/// A logged-in identity. The signer is optional: an account can be known
/// (pubkey recalled from config) without a usable signing capability.
#[derive(Clone)]
pub struct Account {
    pub pubkey: String,
    pub signer: Option<Arc<dyn NostrSigner>>,
}

impl Account {
    pub fn new(pubkey: impl Into<String>, signer: Arc<dyn NostrSigner>) -> Self {
        Self {
            pubkey: pubkey.into(),
            signer: Some(signer),
        }
    }

    pub fn without_signer(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            signer: None,
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("pubkey", &self.pubkey)
            .field("signer", &self.signer.is_some())
            .finish()
    }
}

/// The active-account provider: one instance per application context.
#[derive(Default)]
pub struct ActiveAccount {
    current: RwLock<Option<Account>>,
}

impl ActiveAccount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, account: Account) {
        *self.current.write().expect("account lock poisoned") = Some(account);
    }

    pub fn logout(&self) {
        *self.current.write().expect("account lock poisoned") = None;
    }

    pub fn get_value(&self) -> Option<Account> {
        self.current.read().expect("account lock poisoned").clone()
    }

    pub fn pubkey(&self) -> Option<String> {
        self.get_value().map(|account| account.pubkey)
    }

    pub fn signer(&self) -> Option<Arc<dyn NostrSigner>> {
        self.get_value().and_then(|account| account.signer)
    }
}
