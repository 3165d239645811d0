//! Signed action tokens embedded in emailed approval links.
//!
//! A token names the sanction kind, the sanction id, the action it authorizes
//! and the user it was minted for. Tokens are HS256 JWTs, so any tampering
//! fails signature validation and decoding never yields a partial result.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::{SanctionError, TokenCodecError};
use crate::types::{Action, SanctionKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub kind: SanctionKind,
    pub sanction_id: String,
    pub action: Action,
    pub user_id: String,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("encoding_key", &"[hidden]")
            .field("decoding_key", &"[hidden]")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }

    pub fn encode(
        &self,
        kind: SanctionKind,
        sanction_id: &str,
        action: Action,
        user_id: &str,
    ) -> Result<String, TokenCodecError> {
        let claims = TokenClaims {
            kind,
            sanction_id: sanction_id.to_string(),
            action,
            user_id: user_id.to_string(),
            exp: (Utc::now() + self.lifetime).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| TokenCodecError::Encoding(e.to_string()))
    }

    /// Fails with `InvalidToken` on a bad signature, garbled input or an
    /// expired token.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, SanctionError> {
        decode::<TokenClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| SanctionError::InvalidToken(e.to_string()))
    }
}
