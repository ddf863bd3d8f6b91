use chrono::Utc;
use uuid::Uuid;

use crate::crypto::keys::{generate_key_pair, KeyPairOptions};
use crate::middleware::auth::mask_token;
use crate::models::token::{NewToken, TokenRecord, TokenStatus, MAX_WINDOW_SECONDS};
use crate::store::TokenStore;

/// Creates a token: generates its key pair, assigns an access token and stores it.
///
/// The key pair is never regenerated afterwards; rotating keys means
/// provisioning a new token and deactivating the old one.
pub async fn provision(
    store: &dyn TokenStore,
    new: NewToken,
    key_opts: KeyPairOptions,
) -> anyhow::Result<TokenRecord> {
    if new.api_limit < 0 {
        anyhow::bail!("api limit must not be negative, got {}", new.api_limit);
    }
    if new.window_seconds <= 0 || new.window_seconds > MAX_WINDOW_SECONDS {
        anyhow::bail!(
            "window must be between 1s and {}s, got {}s",
            MAX_WINDOW_SECONDS,
            new.window_seconds
        );
    }
    if key_opts.bits < 2048 {
        tracing::warn!(
            bits = key_opts.bits,
            "provisioning with a key size below 2048 bits; raise KEYGATE_KEY_BITS for production"
        );
    }

    let pair = tokio::task::spawn_blocking(move || generate_key_pair(&key_opts)).await??;

    let access_token = new
        .access_token
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let record = TokenRecord {
        id: Uuid::new_v4(),
        user_id: new.user_id,
        status: TokenStatus::Active,
        token_type: new.token_type,
        access_token,
        public_key: pair.public_key,
        private_key: pair.private_key,
        api_limit: new.api_limit,
        api_count: 0,
        window_start: 0,
        window_seconds: new.window_seconds,
        digest: key_opts.digest,
        created_at: Utc::now(),
    };

    store.insert(&record).await?;
    tracing::info!(
        token_id = %record.id,
        user_id = %record.user_id,
        token = %mask_token(&record.access_token),
        token_type = record.token_type.as_str(),
        digest = %record.digest,
        "token provisioned"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{seal, verify, CryptoChannel, DigestAlgorithm};
    use crate::models::token::TokenType;
    use crate::store::memory::MemoryTokenStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_provision_limited() {
        let store = MemoryTokenStore::new();
        let record = provision(&store, NewToken::limited("user-7"), KeyPairOptions::default())
            .await
            .unwrap();

        assert_eq!(record.token_type, TokenType::Limited);
        assert_eq!(record.api_limit, 500);
        assert_eq!(record.window_seconds, 86_400);
        assert_eq!((record.api_count, record.window_start), (0, 0));
        assert!(Uuid::parse_str(&record.access_token).is_ok());

        let found = store
            .find_active_by_access_token(&record.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);

        // the stored key pair actually belongs together
        let envelope = seal(&record.public_key, &json!({"ping": 1})).unwrap();
        let channel = CryptoChannel::for_token(&found);
        assert_eq!(channel.decrypt(&envelope).unwrap(), json!({"ping": 1}));
    }

    #[tokio::test]
    async fn test_provision_unlimited_with_fixed_token() {
        let store = MemoryTokenStore::new();
        let mut new = NewToken::unlimited("user-8");
        new.access_token = Some("chosen-token".into());
        let record = provision(&store, new.clone(), KeyPairOptions::default())
            .await
            .unwrap();
        assert_eq!(record.token_type, TokenType::Unlimited);
        assert_eq!(record.access_token, "chosen-token");

        // access tokens are never reused
        assert!(provision(&store, new, KeyPairOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_provision_rejects_bad_window() {
        let store = MemoryTokenStore::new();
        let mut new = NewToken::limited("u");
        new.window_seconds = 0;
        assert!(provision(&store, new.clone(), KeyPairOptions::default()).await.is_err());

        new.window_seconds = i64::MAX;
        assert!(provision(&store, new, KeyPairOptions::default()).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_provisioned_digest_drives_signing() {
        let store = MemoryTokenStore::new();
        let opts = KeyPairOptions {
            digest: DigestAlgorithm::Sha256,
            ..KeyPairOptions::default()
        };
        let record = provision(&store, NewToken::limited("user-9"), opts).await.unwrap();
        assert_eq!(record.digest, DigestAlgorithm::Sha256);

        let found = store
            .find_active_by_access_token(&record.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.digest, DigestAlgorithm::Sha256);

        let signed = CryptoChannel::for_token(&found).sign(&json!({"k": 1})).unwrap();
        assert!(verify(&record.public_key, &signed, DigestAlgorithm::Sha256).unwrap());
        assert!(!verify(&record.public_key, &signed, DigestAlgorithm::Sha512).unwrap());
    }
}
