use parley_common::base58;
use parley_common::types::MAX_CLIENT_ID_LEN;
use parley_common::ClientId;
use thiserror::Error;

/// Why an `authenticate` frame was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No identifier was supplied.
    #[error("missing walletAddress")]
    Missing,
    /// The identifier exceeds [`MAX_CLIENT_ID_LEN`].
    #[error("identifier longer than {MAX_CLIENT_ID_LEN} bytes")]
    TooLong,
    /// The identifier is not a valid wallet address.
    #[error("invalid wallet address: {0}")]
    InvalidAddress(#[from] base58::AddressDecodeError),
}

/// Turns the identifier claimed in an `authenticate` frame into a
/// [`ClientId`]. How strongly the claim is checked is up to the
/// implementation.
pub trait Authenticator: Send + Sync {
    /// Validate the claimed identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the claim is refused.
    fn authenticate(&self, wallet_address: Option<&str>) -> Result<ClientId, AuthError>;
}

/// Which [`Authenticator`] the server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum IdentityPolicy {
    /// Any non-empty identifier.
    #[default]
    Opaque,
    /// Base58 text decoding to a 32-byte public key.
    Wallet,
}

impl IdentityPolicy {
    /// Build the authenticator for this policy.
    #[must_use]
    pub fn authenticator(self) -> Box<dyn Authenticator> {
        match self {
            Self::Opaque => Box::new(OpaqueIdentity),
            Self::Wallet => Box::new(WalletIdentity),
        }
    }
}

/// Accepts any non-empty identifier up to [`MAX_CLIENT_ID_LEN`] bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueIdentity;

impl Authenticator for OpaqueIdentity {
    fn authenticate(&self, wallet_address: Option<&str>) -> Result<ClientId, AuthError> {
        let id = trimmed(wallet_address)?;
        Ok(ClientId::from(id))
    }
}

/// Accepts only identifiers shaped like a wallet public key.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalletIdentity;

impl Authenticator for WalletIdentity {
    fn authenticate(&self, wallet_address: Option<&str>) -> Result<ClientId, AuthError> {
        let id = trimmed(wallet_address)?;
        base58::decode_address(id)?;
        Ok(ClientId::from(id))
    }
}

fn trimmed(wallet_address: Option<&str>) -> Result<&str, AuthError> {
    let id = wallet_address.map(str::trim).unwrap_or_default();
    if id.is_empty() {
        return Err(AuthError::Missing);
    }
    if id.len() > MAX_CLIENT_ID_LEN {
        return Err(AuthError::TooLong);
    }
    Ok(id)
}
