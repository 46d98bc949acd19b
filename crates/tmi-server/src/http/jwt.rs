//! Principal extraction from an externally-issued JWT. Grounded on the
//! teacher's `Jwt`/`Claims`/`Mode` pattern; OAuth/SAML issuance itself is
//! out of scope, this module only validates and extracts claims.

use std::collections::HashMap;
use std::str::FromStr;

use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet, KeyAlgorithm};
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TokenError {
    #[error("the token is invalid or malformed: {0:?}")]
    Invalid(jsonwebtoken::errors::ErrorKind),
    #[error("the token header is malformed")]
    InvalidHeader,
    #[error("no bearer token found")]
    Missing,
    #[error("the token header does not specify a `kid`")]
    MissingKeyId,
    #[error("token uses the unknown key {0:?}")]
    UnknownKeyId(String),
}

#[derive(thiserror::Error, Debug)]
pub enum JwkError {
    #[error("the key is missing the `kid` attribute")]
    MissingKeyId,
    #[error("could not construct a decoding key for {key_id:?}: {error:?}")]
    DecodingError { key_id: String, error: jsonwebtoken::errors::ErrorKind },
    #[error("the key {key_id:?} uses a non-RSA, non-EC algorithm")]
    UnexpectedAlgorithm { key_id: String },
}

#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub enum Mode {
    /// A valid token, issued by a configured issuer, must be present.
    Strict,
    /// If a token exists, validate it; requests without one still pass.
    #[default]
    Optional,
    /// Requests are never rejected; useful for logging-only contexts.
    Permissive,
}

struct Jwk {
    decoding: DecodingKey,
    validation: Validation,
}

#[derive(Clone)]
pub struct Jwt {
    mode: Mode,
    keys: std::sync::Arc<HashMap<String, std::sync::Arc<Jwk>>>,
    issuer: String,
}

impl std::fmt::Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwt").field("mode", &self.mode).field("issuer", &self.issuer).finish()
    }
}

#[derive(Debug, Clone)]
pub struct Claims {
    pub inner: Map<String, Value>,
}

impl Claims {
    pub fn sub(&self) -> Option<&str> {
        self.inner.get("sub").and_then(Value::as_str)
    }
    pub fn user_id(&self) -> Option<Uuid> {
        self.sub().and_then(|s| Uuid::parse_str(s).ok())
    }
    pub fn email(&self) -> Option<&str> {
        self.inner.get("email").and_then(Value::as_str)
    }
    pub fn groups(&self) -> Vec<String> {
        self.inner
            .get("groups")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
    pub fn tenant_id(&self) -> Option<&str> {
        self.inner.get("tenant_id").and_then(Value::as_str)
    }
}

impl Jwt {
    pub fn from_jwks(jwks: JwkSet, issuer: String, audiences: Vec<String>, mode: Mode) -> Result<Self, JwkError> {
        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            let Some(key_alg) = jwk.common.key_algorithm.and_then(to_supported_alg) else { continue };
            let kid = jwk.common.key_id.clone().ok_or(JwkError::MissingKeyId)?;
            let decoding_key = match &jwk.algorithm {
                AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                    .map_err(|e| JwkError::DecodingError { key_id: kid.clone(), error: e.kind().clone() })?,
                AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)
                    .map_err(|e| JwkError::DecodingError { key_id: kid.clone(), error: e.kind().clone() })?,
                _ => return Err(JwkError::UnexpectedAlgorithm { key_id: kid }),
            };
            let mut validation = Validation::new(key_alg);
            validation.set_audience(&audiences);
            validation.set_issuer(std::slice::from_ref(&issuer));
            keys.insert(kid, std::sync::Arc::new(Jwk { decoding: decoding_key, validation }));
        }
        Ok(Jwt { mode, keys: std::sync::Arc::new(keys), issuer })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Extracts and validates the bearer token from the request, per `mode`.
    pub async fn authenticate(
        &self,
        header: Option<TypedHeader<Authorization<Bearer>>>,
    ) -> Result<Option<Claims>, TokenError> {
        let Some(TypedHeader(Authorization(bearer))) = header else {
            if self.mode == Mode::Strict {
                return Err(TokenError::Missing);
            }
            return Ok(None);
        };
        match self.validate_claims(bearer.token()) {
            Ok(claims) => Ok(Some(claims)),
            Err(e) if self.mode != Mode::Strict => {
                tracing::debug!(error = ?e, "token verification failed, continuing per mode");
                if self.mode == Mode::Optional {
                    Err(e)
                } else {
                    Ok(None)
                }
            },
            Err(e) => Err(e),
        }
    }

    pub fn validate_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::InvalidHeader)?;
        let kid = header.kid.as_ref().ok_or(TokenError::MissingKeyId)?;
        let key = self.keys.get(kid).ok_or_else(|| TokenError::UnknownKeyId(kid.clone()))?;
        let decoded = decode::<Map<String, Value>>(token, &key.decoding, &key.validation)
            .map_err(|e| TokenError::Invalid(e.kind().clone()))?;
        Ok(Claims { inner: decoded.claims })
    }
}

fn to_supported_alg(key_algorithm: KeyAlgorithm) -> Option<jsonwebtoken::Algorithm> {
    jsonwebtoken::Algorithm::from_str(key_algorithm.to_string().as_str()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_mode_is_default() {
        assert_eq!(Mode::default(), Mode::Optional);
    }

    #[test]
    fn claims_extract_groups_and_user_id() {
        let id = Uuid::new_v4();
        let mut inner = Map::new();
        inner.insert("sub".into(), Value::String(id.to_string()));
        inner.insert("groups".into(), Value::Array(vec![Value::String("g1".into())]));
        let claims = Claims { inner };
        assert_eq!(claims.user_id(), Some(id));
        assert_eq!(claims.groups(), vec!["g1".to_string()]);
    }
}
