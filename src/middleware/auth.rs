use std::sync::Arc;

use crate::errors::GatewayError;
use crate::models::token::TokenRecord;
use crate::store::TokenStore;

/// Picks the credential the transport saw: Basic-Auth username first, then the
/// `access_token` query parameter. Empty values count as absent; anything else
/// is compared byte for byte.
pub fn select_credential<'a>(
    basic_auth_user: Option<&'a str>,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    basic_auth_user
        .filter(|s| !s.is_empty())
        .or_else(|| query_token.filter(|s| !s.is_empty()))
}

/// Never log a full token.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    } else {
        "****".to_string()
    }
}

/// Resolves a raw credential to an active token record.
#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn TokenStore>,
}

impl AuthGate {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, credential: Option<&str>) -> Result<TokenRecord, GatewayError> {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            tracing::debug!("auth: no credential supplied");
            return Err(GatewayError::Unauthenticated);
        };

        match self.store.find_active_by_access_token(credential).await? {
            Some(token) => Ok(token),
            None => {
                tracing::warn!(token = %mask_token(credential), "auth: unknown or inactive token");
                Err(GatewayError::Unauthenticated)
            }
        }
    }
}
