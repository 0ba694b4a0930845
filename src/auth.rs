//! Credential check against the configured admin/user lists, matched in
//! constant time to avoid timing side channels.

use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::error::Error;
use secrecy::ExposeSecret;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

pub struct Authenticator {
    header_name: String,
    admin_credentials: Vec<String>,
    user_credentials: Vec<String>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            header_name: config.credential_header_name.clone(),
            admin_credentials: config.admin_credentials.iter().map(|c| c.expose_secret().to_string()).collect(),
            user_credentials: config.user_credentials.iter().map(|c| c.expose_secret().to_string()).collect(),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// `None` presented credential, or one matching no configured value,
    /// both fail with [`Error::Unauthenticated`]; every comparison runs
    /// against the full candidate list so presence/absence of a match
    /// doesn't leak through timing.
    pub fn authenticate(&self, presented: Option<&str>) -> Result<Role, Error> {
        let Some(presented) = presented else {
            return Err(Error::Unauthenticated);
        };
        let presented = presented.as_bytes();

        let admin_match = self.admin_credentials.iter().fold(0u8, |acc, c| acc | u8::from(bool::from(presented.ct_eq(c.as_bytes()))));
        if admin_match == 1 {
            return Ok(Role::Admin);
        }

        let user_match = self.user_credentials.iter().fold(0u8, |acc, c| acc | u8::from(bool::from(presented.ct_eq(c.as_bytes()))));
        if user_match == 1 {
            return Ok(Role::User);
        }

        Err(Error::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig {
            credential_header_name: "x-api-key".to_string(),
            admin_credentials: vec![SecretString::from("admin-secret".to_string())],
            user_credentials: vec![SecretString::from("user-secret".to_string())],
        }
    }

    #[test]
    fn missing_credential_is_unauthenticated() {
        let auth = Authenticator::new(&config());
        assert!(matches!(auth.authenticate(None), Err(Error::Unauthenticated)));
    }

    #[test]
    fn unknown_credential_is_unauthenticated() {
        let auth = Authenticator::new(&config());
        assert!(matches!(auth.authenticate(Some("wrong")), Err(Error::Unauthenticated)));
    }

    #[test]
    fn admin_credential_maps_to_admin_role() {
        let auth = Authenticator::new(&config());
        assert_eq!(auth.authenticate(Some("admin-secret")).unwrap(), Role::Admin);
    }

    #[test]
    fn user_credential_maps_to_user_role() {
        let auth = Authenticator::new(&config());
        assert_eq!(auth.authenticate(Some("user-secret")).unwrap(), Role::User);
    }
}
