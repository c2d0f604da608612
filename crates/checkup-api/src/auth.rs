//! HTTP basic authentication middleware.

use std::fmt;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use argon2::password_hash::{self, SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose};
use tracing::{debug, warn};

pub const REALM: &str = "checkup";

/// Expected credentials: a username and the argon2 PHC hash of the password.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password_hash: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

impl BasicAuth {
    /// Fails unless `password_hash` is a well-formed PHC string.
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Result<Self, password_hash::Error> {
        let password_hash = password_hash.into();
        PasswordHash::new(&password_hash)?;
        Ok(Self {
            username: username.into(),
            password_hash,
        })
    }

    /// Whether an `Authorization` header value carries these credentials.
    ///
    /// Runs a full argon2 verification; call it off the async runtime.
    pub fn accepts(&self, authorization: &str) -> bool {
        let Some((user, pass)) = decode(authorization) else {
            return false;
        };
        let user_ok = constant_time_eq(user.as_bytes(), self.username.as_bytes());
        user_ok & self.verify(&pass)
    }

    fn verify(&self, password: &str) -> bool {
        let parsed = match PasswordHash::new(&self.password_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "stored password hash is unreadable");
                return false;
            }
        };
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => true,
            Err(password_hash::Error::Password) => false,
            Err(e) => {
                warn!(error = %e, "password verification failed");
                false
            }
        }
    }
}

/// Hash a password into the PHC string `BasicAuth` expects.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// The `Authorization` header value a client sends for these credentials.
pub fn authorization_header(username: &str, password: &str) -> String {
    let encoded = general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

/// Split `Basic <base64(user:pass)>` into its parts.
fn decode(authorization: &str) -> Option<(String, String)> {
    let (scheme, encoded) = authorization.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let bytes = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, format!("Basic realm=\"{REALM}\""))],
        "Unauthorized\n",
    )
        .into_response()
}

/// Argon2 verification blocks, so it runs on the blocking pool.
async fn verify_off_runtime(expected: Arc<BasicAuth>, authorization: String) -> bool {
    tokio::task::spawn_blocking(move || expected.accepts(&authorization))
        .await
        .unwrap_or(false)
}

/// Reject requests without matching basic-auth credentials.
pub async fn basic_auth(
    State(expected): State<Arc<BasicAuth>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match provided {
        Some(value) => {
            if verify_off_runtime(expected, value).await {
                return next.run(request).await;
            }
            warn!(path = %request.uri().path(), "invalid basic auth credentials");
            unauthorized()
        }
        None => {
            debug!(path = %request.uri().path(), "no basic auth credentials provided");
            unauthorized()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(password: &str) -> BasicAuth {
        BasicAuth::new("admin", hash_password(password).unwrap()).unwrap()
    }

    #[test]
    fn hash_is_argon2_phc() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(!hash.contains("s3cret"));
        assert_ne!(hash, hash_password("s3cret").unwrap());
    }

    #[test]
    fn accepts_plaintext_matching_the_hash() {
        let auth = admin("s3cret:with:colons");
        let header = authorization_header("admin", "s3cret:with:colons");
        assert!(auth.accepts(&header));
        assert!(auth.accepts(&header.replace("Basic", "basic")));
    }

    #[test]
    fn rejects_everything_else() {
        let auth = admin("s3cret");
        assert!(!auth.accepts(&authorization_header("admin", "wrong")));
        assert!(!auth.accepts(&authorization_header("root", "s3cret")));
        assert!(!auth.accepts(&authorization_header("admin", &auth.password_hash)));
        assert!(!auth.accepts("Bearer abc"));
        assert!(!auth.accepts("Basic !!!not-base64"));
        assert!(!auth.accepts(""));
    }

    #[test]
    fn new_rejects_malformed_hash() {
        assert!(BasicAuth::new("admin", "s3cret").is_err());
        assert!(BasicAuth::new("admin", "").is_err());
    }

    #[test]
    fn debug_redacts_hash() {
        let auth = admin("s3cret");
        let text = format!("{auth:?}");
        assert!(!text.contains(&auth.password_hash));
    }
}
