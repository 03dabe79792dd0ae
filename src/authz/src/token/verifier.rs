use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::warn;

use sentra_scope::{set_is_superset, Scope};

use crate::error::{AuthzError, Result};

/// Configuration for local verification of signed bearer tokens.
#[derive(Debug, Clone)]
pub struct BearerConfig {
    /// Prefix stripped from the credential before decoding.
    pub prefix: String,
    /// Signature algorithm every key in the list uses.
    pub algorithm: Algorithm,
    /// PEM-encoded public keys, newest first. Several keys may be live
    /// at once while a rotation rolls out.
    pub keys: Vec<String>,
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            prefix: "Bearer ".to_string(),
            algorithm: Algorithm::ES256,
            keys: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    scopes: Vec<String>,
    #[allow(dead_code)]
    exp: i64,
}

/// Verifies self-contained signed tokens against a rotating key list.
pub struct BearerVerifier {
    prefix: String,
    keys: Vec<DecodingKey>,
    validation: Validation,
}

impl BearerVerifier {
    pub fn new(config: &BearerConfig) -> Result<Self> {
        if config.keys.is_empty() {
            return Err(AuthzError::Validation(
                "at least one verification key is required".to_string(),
            ));
        }
        let keys = config
            .keys
            .iter()
            .map(|pem| Self::decoding_key(config.algorithm, pem))
            .collect::<Result<Vec<_>>>()?;
        let mut validation = Validation::new(config.algorithm);
        validation.set_required_spec_claims(&["exp"]);
        Ok(Self {
            prefix: config.prefix.clone(),
            keys,
            validation,
        })
    }

    fn decoding_key(algorithm: Algorithm, pem: &str) -> Result<DecodingKey> {
        let key = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem.as_bytes()),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem.as_bytes()),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                return Err(AuthzError::Validation(
                    "symmetric algorithms are not supported for bearer verification".to_string(),
                ))
            }
        };
        key.map_err(|e| AuthzError::Validation(format!("invalid verification key: {e}")))
    }

    /// Verifies a credential and returns the scopes it grants.
    ///
    /// Each configured key is tried in order; an expired token fails
    /// immediately since every key agrees on the embedded expiry.
    pub fn verify(&self, credential: &str) -> Result<Vec<Scope>> {
        let token = credential
            .strip_prefix(&self.prefix)
            .ok_or(AuthzError::Authentication)?;

        for key in &self.keys {
            match jsonwebtoken::decode::<TokenClaims>(token, key, &self.validation) {
                Ok(data) => {
                    let mut scopes = Vec::with_capacity(data.claims.scopes.len());
                    for raw in &data.claims.scopes {
                        match raw.parse::<Scope>() {
                            Ok(scope) => scopes.push(scope),
                            Err(e) => {
                                // A correctly signed token carrying a
                                // malformed scope means a signer bug,
                                // not a bad client.
                                warn!(error = %e, "signed token carried an invalid scope");
                                return Err(AuthzError::Authentication);
                            }
                        }
                    }
                    return Ok(scopes);
                }
                Err(e) => match e.kind() {
                    ErrorKind::ExpiredSignature => return Err(AuthzError::Authentication),
                    ErrorKind::Json(_) => {
                        warn!(error = %e, "signed token carried malformed claims");
                        return Err(AuthzError::Authentication);
                    }
                    _ => continue,
                },
            }
        }
        Err(AuthzError::Authentication)
    }
}

/// How the caller reached the resource server, which decides the
/// failure shape: interactive flows get redirected to re-authenticate,
/// programmatic ones get a bare status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFlow {
    Browser,
    Api,
}

/// Outcome of guarding a request with a verified credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenDecision {
    /// Credential valid and sufficient; proceed with these scopes.
    Pass { scopes: Vec<Scope> },
    /// Send the caller back through the authorization flow.
    DenyRedirect,
    /// Reject with this HTTP status.
    DenyStatus(u16),
}

/// Maps a verification outcome and a required scope set onto a decision.
pub fn decide(
    outcome: Result<Vec<Scope>>,
    required: &[Scope],
    flow: RequestFlow,
) -> TokenDecision {
    match outcome {
        Err(_) => match flow {
            RequestFlow::Browser => TokenDecision::DenyRedirect,
            RequestFlow::Api => TokenDecision::DenyStatus(401),
        },
        Ok(scopes) => {
            if set_is_superset(&scopes, required) {
                TokenDecision::Pass { scopes }
            } else {
                match flow {
                    RequestFlow::Browser => TokenDecision::DenyRedirect,
                    RequestFlow::Api => TokenDecision::DenyStatus(403),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Scope {
        text.parse().unwrap()
    }

    #[test]
    fn test_empty_key_list_rejected() {
        let config = BearerConfig::default();
        assert!(matches!(
            BearerVerifier::new(&config),
            Err(AuthzError::Validation(_))
        ));
    }

    #[test]
    fn test_symmetric_algorithm_rejected() {
        let config = BearerConfig {
            algorithm: Algorithm::HS256,
            keys: vec!["secret".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            BearerVerifier::new(&config),
            Err(AuthzError::Validation(_))
        ));
    }

    #[test]
    fn test_decide_maps_failures_by_flow() {
        let required = vec![s("authx:user.abc:r")];

        assert_eq!(
            decide(Err(AuthzError::Authentication), &required, RequestFlow::Api),
            TokenDecision::DenyStatus(401)
        );
        assert_eq!(
            decide(
                Err(AuthzError::Authentication),
                &required,
                RequestFlow::Browser
            ),
            TokenDecision::DenyRedirect
        );
        assert_eq!(
            decide(Ok(vec![s("other:thing:r")]), &required, RequestFlow::Api),
            TokenDecision::DenyStatus(403)
        );
        assert_eq!(
            decide(
                Ok(vec![s("other:thing:r")]),
                &required,
                RequestFlow::Browser
            ),
            TokenDecision::DenyRedirect
        );
    }

    #[test]
    fn test_decide_passes_superset() {
        let required = vec![s("authx:user.abc:r")];
        let granted = vec![s("authx:user.*:**")];
        assert_eq!(
            decide(Ok(granted.clone()), &required, RequestFlow::Api),
            TokenDecision::Pass { scopes: granted }
        );
    }
}
