//! Bridge credential encoding
//!
//! Transports read per-connection arguments (e.g. an obfs4 `cert=...` string)
//! from the SOCKS5 username and password fields. Arguments that fit in the
//! username are followed by a single NUL password; longer ones spill into the
//! password field.

use crate::error::ConnectError;
use async_socks5::Auth;

/// Maximum length of a SOCKS5 username or password
pub const SOCKS5_FIELD_MAX: usize = 255;

/// Password sent when the whole credential fits in the username
pub const NUL_PASSWORD: &str = "\0";

/// Opaque transport credential
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credential(String);

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({} bytes)", self.0.len())
    }
}

impl Credential {
    /// Wrap a credential string
    pub fn new(value: impl Into<String>) -> Self {
        Credential(value.into())
    }

    /// Whether no credential was supplied
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into SOCKS5 username and password
    pub fn to_fields(&self) -> Result<(String, String), ConnectError> {
        let value = self.0.as_str();
        if value.len() <= SOCKS5_FIELD_MAX {
            return Ok((value.to_string(), NUL_PASSWORD.to_string()));
        }

        let mut split = SOCKS5_FIELD_MAX;
        while !value.is_char_boundary(split) {
            split -= 1;
        }
        let (username, password) = value.split_at(split);
        if password.len() > SOCKS5_FIELD_MAX {
            return Err(ConnectError::CredentialTooLong(value.len()));
        }
        Ok((username.to_string(), password.to_string()))
    }

    /// SOCKS5 authentication for this credential, None when empty
    pub fn socks_auth(&self) -> Result<Option<Auth>, ConnectError> {
        if self.is_empty() {
            return Ok(None);
        }
        let (username, password) = self.to_fields()?;
        Ok(Some(Auth::new(username, password)))
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Credential::new(value)
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Credential(value)
    }
}
