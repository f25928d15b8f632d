use keyring::Entry;
use std::error::Error;
use std::fmt;

const KEYRING_SERVICE: &str = "remora-accounts";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was temporarily
/// unavailable (for example when the keychain service is locked or
/// inaccessible). Permanent errors surface the underlying cause directly so
/// callers can report them to the user.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    /// Returns true when the error represents a temporary outage of the
    /// platform keyring backend.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Keyring-backed storage for account secrets, keyed by pubkey.
///
/// Storage only: this type never interprets a secret or derives keys from
/// it. Signer construction is the embedding application's concern.
#[derive(Debug, Clone, Copy)]
pub struct AccountKeyStore {
    use_keyring: bool,
}

impl Default for AccountKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountKeyStore {
    pub fn new() -> Self {
        Self { use_keyring: true }
    }

    /// Tests pass `false` to bypass the platform keyring entirely.
    pub fn new_with_keyring(use_keyring: bool) -> Self {
        Self { use_keyring }
    }

    pub fn get_secret(&self, pubkey: &str) -> Result<Option<String>, Box<dyn Error>> {
        if !self.use_keyring {
            return Ok(None);
        }

        let entry = Entry::new(KEYRING_SERVICE, pubkey)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(Box::new(KeyringAccessError::from(err))),
        }
    }

    pub fn set_secret(&self, pubkey: &str, secret: &str) -> Result<(), Box<dyn Error>> {
        if !self.use_keyring {
            return Ok(());
        }

        let entry = Entry::new(KEYRING_SERVICE, pubkey)?;
        entry
            .set_password(secret)
            .map_err(|err| Box::new(KeyringAccessError::from(err)) as Box<dyn Error>)
    }

    pub fn remove_secret(&self, pubkey: &str) -> Result<bool, Box<dyn Error>> {
        if !self.use_keyring {
            return Ok(false);
        }

        let entry = Entry::new(KEYRING_SERVICE, pubkey)?;
        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(Box::new(KeyringAccessError::from(err))),
        }
    }
}
