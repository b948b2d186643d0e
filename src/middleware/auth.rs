use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::BasicAuthConfig;
use crate::error::{ClientError, ClientErrorKind};

/// Realm advertised in `WWW-Authenticate`.
pub const REALM: &str = "mediagate";

/// HTTP Basic access gate in front of every route.
#[derive(Debug, Clone)]
pub struct BasicAuthGate {
    user: String,
    password: String,
}

impl BasicAuthGate {
    #[must_use]
    pub fn new(config: &BasicAuthConfig) -> Self {
        Self {
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }

    /// `WWW-Authenticate` header line sent with a rejection.
    #[must_use]
    pub fn challenge() -> &'static str {
        "WWW-Authenticate: Basic realm=\"mediagate\""
    }

    /// Check the raw `Authorization` header value.
    pub fn check(&self, authorization: Option<&str>) -> Result<(), ClientError> {
        let unauthorized = || ClientError::new(ClientErrorKind::Unauthorized, "authentication required");
        let header = authorization.ok_or_else(unauthorized)?;
        let (scheme, encoded) = header.trim().split_once(' ').ok_or_else(unauthorized)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(unauthorized());
        }
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| unauthorized())?;
        let decoded = String::from_utf8(decoded).map_err(|_| unauthorized())?;
        let (user, password) = decoded.split_once(':').ok_or_else(unauthorized)?;

        // evaluate both so timing does not reveal which one differed
        let user_ok = constant_time_eq(user.as_bytes(), self.user.as_bytes());
        let password_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        if user_ok & password_ok {
            Ok(())
        } else {
            Err(ClientError::new(ClientErrorKind::Unauthorized, "invalid credentials"))
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> BasicAuthGate {
        BasicAuthGate::new(&BasicAuthConfig {
            user: "admin".into(),
            password: "s3cret".into(),
        })
    }

    fn basic(creds: &str) -> String {
        format!("Basic {}", STANDARD.encode(creds))
    }

    #[test]
    fn test_accepts_valid_credentials() {
        assert!(gate().check(Some(&basic("admin:s3cret"))).is_ok());
        assert!(gate().check(Some(&format!("basic  {}", STANDARD.encode("admin:s3cret")))).is_ok());
    }

    #[test]
    fn test_rejects_missing_and_wrong() {
        let g = gate();
        assert_eq!(g.check(None).unwrap_err().status(), 401);
        assert!(g.check(Some(&basic("admin:nope"))).is_err());
        assert!(g.check(Some(&basic("root:s3cret"))).is_err());
        assert!(g.check(Some("Bearer abc")).is_err());
        assert!(g.check(Some("Basic !!!")).is_err());
    }

    #[test]
    fn test_challenge_names_realm() {
        assert!(BasicAuthGate::challenge().contains(REALM));
    }
}
