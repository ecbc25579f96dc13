//! Auth header presence checks: the ingress asserts
//! only that a well-formed token is present; credential validation is
//! delegated upstream.

use std::collections::HashMap;

use crate::types::AuthType;

/// A challenge to send back on a missing/malformed credential.
pub struct AuthChallenge {
    pub header_name: &'static str,
    pub header_value: String,
}

/// `Ok(())` if the request carries a well-formed credential for
/// `auth_type`; `Err(challenge)` otherwise (caller responds 401 with
/// the challenge header).
pub fn check_auth(auth_type: AuthType, headers: &HashMap<String, String>) -> Result<(), AuthChallenge> {
    match auth_type {
        AuthType::None => Ok(()),
        AuthType::Basic => require_authorization_prefix(headers, "Basic ", "Basic realm=\"dws\""),
        AuthType::Bearer => require_authorization_prefix(headers, "Bearer ", "Bearer"),
        AuthType::Jwt => require_authorization_prefix(headers, "Bearer ", "Bearer"),
        AuthType::X402 => {
            if headers.contains_key("x-402-payment") {
                Ok(())
            } else {
                Err(AuthChallenge {
                    header_name: "X-402-Payment-Required",
                    header_value: "true".to_string(),
                })
            }
        }
    }
}

fn require_authorization_prefix(
    headers: &HashMap<String, String>,
    prefix: &str,
    challenge_value: &str,
) -> Result<(), AuthChallenge> {
    match headers.get("authorization") {
        Some(value) if value.starts_with(prefix) => Ok(()),
        _ => Err(AuthChallenge {
            header_name: "WWW-Authenticate",
            header_value: challenge_value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_always_passes() {
        assert!(check_auth(AuthType::None, &HashMap::new()).is_ok());
    }

    #[test]
    fn bearer_requires_authorization_header() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer abc.def.ghi".to_string());
        assert!(check_auth(AuthType::Bearer, &headers).is_ok());
        assert!(check_auth(AuthType::Bearer, &HashMap::new()).is_err());
    }

    #[test]
    fn basic_rejects_bearer_token() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer abc".to_string());
        let result = check_auth(AuthType::Basic, &headers);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().header_name, "WWW-Authenticate");
    }

    #[test]
    fn x402_requires_payment_header() {
        let mut headers = HashMap::new();
        headers.insert("x-402-payment".to_string(), "token".to_string());
        assert!(check_auth(AuthType::X402, &headers).is_ok());
        assert!(check_auth(AuthType::X402, &HashMap::new()).is_err());
    }
}
