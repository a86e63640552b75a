use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::{CacheScope, CacheService};

/// Name of the token configuration that must always exist.
pub const DEFAULT_TOKEN_CONFIG: &str = "Default";

/// One named credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenOptions {
    #[serde(default = "default_config_name")]
    pub name: String,
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    /// Credential lifetime in minutes.
    #[serde(default = "default_expires_in_minutes")]
    pub expires_in_minutes: u64,
    /// When set, issuing a credential supersedes any earlier session for the
    /// same subject.
    #[serde(default)]
    pub single_session: bool,
}

fn default_config_name() -> String {
    DEFAULT_TOKEN_CONFIG.to_string()
}

fn default_expires_in_minutes() -> u64 {
    1440
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("a token configuration named 'Default' is required")]
    MissingDefault,
    #[error("no token configuration named '{0}'")]
    UnknownConfig(String),
    #[error("failed to sign credential: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sso: Option<String>,
}

/// Claims read during revocation. Signature and expiry are deliberately not
/// re-verified there; an expired credential is already invalid.
#[derive(Debug, Deserialize)]
struct RevokeClaims {
    #[serde(default)]
    sub: Option<String>,
    exp: i64,
}

struct TokenConfig {
    options: TokenOptions,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenConfig {
    fn new(options: TokenOptions) -> Self {
        let encoding = EncodingKey::from_secret(options.secret.as_bytes());
        let decoding = DecodingKey::from_secret(options.secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&options.issuer]);
        validation.set_audience(&[&options.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        Self {
            options,
            encoding,
            decoding,
            validation,
        }
    }
}

/// Issues, verifies, and revokes bearer credentials. Revocation and
/// single-session enforcement are cache entries with self-expiring TTLs, so
/// the cache only ever holds "still valid but blocked" credentials and no
/// cleanup job is needed. Both record kinds live in the Shared tier only;
/// revocation must be visible across processes immediately.
pub struct TokenService {
    configs: HashMap<String, TokenConfig>,
    cache: Arc<CacheService>,
}

fn session_key(subject_id: u64) -> String {
    format!("token:session:{subject_id}")
}

fn revocation_key(credential: &str) -> String {
    let digest = Sha256::digest(credential.as_bytes());
    format!("token:revoked:{}", hex::encode(digest))
}

impl TokenService {
    pub fn new(options: Vec<TokenOptions>, cache: Arc<CacheService>) -> Result<Self, TokenError> {
        let configs: HashMap<String, TokenConfig> = options
            .into_iter()
            .map(|opt| (opt.name.clone(), TokenConfig::new(opt)))
            .collect();

        if !configs.contains_key(DEFAULT_TOKEN_CONFIG) {
            return Err(TokenError::MissingDefault);
        }

        Ok(Self { configs, cache })
    }

    /// Issue a signed credential for `subject_id` under the named
    /// configuration. With single-session enabled the stored session nonce is
    /// overwritten, implicitly invalidating every earlier credential for the
    /// same subject.
    pub async fn issue(&self, subject_id: u64, config_name: &str) -> Result<String, TokenError> {
        let config = self
            .configs
            .get(config_name)
            .ok_or_else(|| TokenError::UnknownConfig(config_name.to_string()))?;

        let now = Utc::now();
        let lifetime = chrono::Duration::minutes(config.options.expires_in_minutes as i64);
        let mut claims = Claims {
            sub: subject_id.to_string(),
            iss: config.options.issuer.clone(),
            aud: config.options.audience.clone(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            sso: None,
        };

        if config.options.single_session {
            let nonce = Uuid::new_v4().simple().to_string();
            claims.sso = Some(nonce.clone());
            self.cache
                .set(
                    &session_key(subject_id),
                    &nonce,
                    Some(Duration::from_secs(config.options.expires_in_minutes * 60)),
                    CacheScope::Shared,
                )
                .await;
        }

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &config.encoding,
        )?)
    }

    /// Verify a credential and return its subject id, or 0 when invalid.
    /// Fails closed: malformed token, bad signature, wrong issuer/audience,
    /// expired (zero clock-skew tolerance), missing subject, revoked, or a
    /// superseded session all yield 0 and never an error.
    pub async fn verify(&self, credential: &str, config_name: &str) -> u64 {
        let Some(config) = self.configs.get(config_name) else {
            return 0;
        };

        let data = match decode::<Claims>(credential, &config.decoding, &config.validation) {
            Ok(data) => data,
            Err(_) => return 0,
        };

        let subject_id: u64 = match data.claims.sub.parse() {
            Ok(id) if id > 0 => id,
            _ => return 0,
        };

        if self
            .cache
            .exists(&revocation_key(credential), CacheScope::Shared)
            .await
        {
            return 0;
        }

        if config.options.single_session {
            let Some(nonce) = data.claims.sso else {
                return 0;
            };
            match self
                .cache
                .get::<String>(&session_key(subject_id), CacheScope::Shared)
                .await
            {
                Some(current) if current == nonce => {}
                _ => return 0,
            }
        }

        subject_id
    }

    /// Revoke a credential by writing a revocation record that lives exactly
    /// as long as the credential would have. Returns false when the
    /// credential cannot be decoded or carries no expiry claim; revoking an
    /// already-expired credential is a successful no-op.
    pub async fn revoke(&self, credential: &str) -> bool {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = match decode::<RevokeClaims>(
            credential,
            &DecodingKey::from_secret(&[]),
            &validation,
        ) {
            Ok(data) => data,
            Err(_) => return false,
        };

        let remaining = data.claims.exp - Utc::now().timestamp();
        if remaining <= 0 {
            return true;
        }

        let subject_id: u64 = data
            .claims
            .sub
            .and_then(|sub| sub.parse().ok())
            .unwrap_or(0);

        self.cache
            .set(
                &revocation_key(credential),
                &subject_id,
                Some(Duration::from_secs(remaining as u64)),
                CacheScope::Shared,
            )
            .await;

        true
    }
}
