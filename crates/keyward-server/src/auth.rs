use std::fmt;

use anyhow::{bail, Context};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keygen::generate_key;
use crate::store::Store;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const HASH_SCHEME: &str = "hmac-sha256";

pub const MIN_SECRET_LENGTH: usize = 8;
pub const MAX_SECRET_LENGTH: usize = 256;
pub const DEFAULT_GENERATED_LENGTH: usize = 32;

// ── SecretHash ───────────────────────────────────────────────────────────────

/// Salted hash of the admin secret: HMAC-SHA256 of the secret keyed by a
/// random 16-byte salt. The plaintext is never stored.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretHash {
    salt: [u8; 16],
    mac: [u8; 32],
}

impl SecretHash {
    /// Hash `secret` under a fresh random salt.
    pub fn derive(secret: &str) -> Self {
        let salt: [u8; 16] = rand::thread_rng().gen();
        Self {
            salt,
            mac: compute_mac(&salt, secret),
        }
    }

    /// Constant-time check of `candidate` against this hash.
    pub fn verify(&self, candidate: &str) -> bool {
        constant_time_eq(&compute_mac(&self.salt, candidate), &self.mac)
    }

    /// `hmac-sha256$<salt hex>$<mac hex>`
    pub fn encoded(&self) -> String {
        format!(
            "{HASH_SCHEME}${}${}",
            hex::encode(self.salt),
            hex::encode(self.mac)
        )
    }

    pub fn from_encoded(s: &str) -> anyhow::Result<Self> {
        let mut parts = s.split('$');
        let (Some(scheme), Some(salt), Some(mac), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("malformed admin secret hash");
        };
        if scheme != HASH_SCHEME {
            bail!("unsupported admin secret hash scheme {scheme:?}");
        }
        let salt = hex::decode(salt).context("decode salt")?;
        let mac = hex::decode(mac).context("decode mac")?;
        Ok(Self {
            salt: salt
                .try_into()
                .map_err(|_| anyhow::anyhow!("admin secret salt must be 16 bytes"))?,
            mac: mac
                .try_into()
                .map_err(|_| anyhow::anyhow!("admin secret mac must be 32 bytes"))?,
        })
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHash(..)")
    }
}

fn compute_mac(salt: &[u8], secret: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC accepts any key length");
    mac.update(secret.as_bytes());
    mac.finalize().into_bytes().into()
}

fn check_secret_length(len: usize, what: &str) -> Result<()> {
    if !(MIN_SECRET_LENGTH..=MAX_SECRET_LENGTH).contains(&len) {
        return Err(Error::invalid(format!(
            "{what} must be between {MIN_SECRET_LENGTH} and {MAX_SECRET_LENGTH} characters"
        )));
    }
    Ok(())
}

// ── AdminGate ────────────────────────────────────────────────────────────────

/// Verifies and rotates the admin secret. The hash itself lives in the store.
#[derive(Clone)]
pub struct AdminGate {
    store: Store,
}

impl AdminGate {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// True only for the exact current secret.
    pub fn verify(&self, candidate: &str) -> Result<bool> {
        Ok(self
            .store
            .admin_secret_hash()?
            .is_some_and(|hash| hash.verify(candidate)))
    }

    /// Replace the secret after checking `old_secret`.
    pub fn rotate(&self, old_secret: &str, new_secret: &str) -> Result<()> {
        self.store.update_admin_secret(|current| {
            if !current.is_some_and(|hash| hash.verify(old_secret)) {
                return Err(Error::Forbidden);
            }
            check_secret_length(new_secret.chars().count(), "new secret")?;
            Ok(SecretHash::derive(new_secret))
        })?;
        info!("audit: admin_secret.rotate");
        Ok(())
    }

    /// Replace the secret with a fresh random one and hand back the plaintext.
    /// Performs no verification: whoever can reach this owns the service.
    pub fn generate_and_rotate(&self, length: usize) -> Result<Zeroizing<String>> {
        check_secret_length(length, "generated secret length")?;
        let secret = Zeroizing::new(generate_key(length));
        let hash = SecretHash::derive(&secret);
        self.store.update_admin_secret(|_| Ok(hash))?;
        warn!(length, "audit: admin_secret.generate");
        Ok(secret)
    }

    /// Seed the admin secret on first startup. Uses `initial` when given,
    /// otherwise generates one and returns it so the caller can show it once.
    /// Does nothing when a secret is already stored.
    pub fn bootstrap(&self, initial: Option<&str>) -> Result<Option<Zeroizing<String>>> {
        if self.store.admin_secret_hash()?.is_some() {
            return Ok(None);
        }
        match initial {
            Some(secret) => {
                check_secret_length(secret.chars().count(), "initial admin secret")?;
                self.store.seed_admin_secret(&SecretHash::derive(secret))?;
                info!("seeded admin secret from configuration");
                Ok(None)
            }
            None => {
                let secret = Zeroizing::new(generate_key(DEFAULT_GENERATED_LENGTH));
                let seeded = self.store.seed_admin_secret(&SecretHash::derive(&secret))?;
                Ok(seeded.then_some(secret))
            }
        }
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Axum middleware that requires `Authorization: Bearer <admin secret>`.
/// A missing credential is 401, a wrong one 403.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(Error::Unauthorized)?;

    if !state.gate.verify(token)? {
        warn!(path = %request.uri().path(), "admin secret rejected");
        return Err(Error::Forbidden);
    }

    Ok(next.run(request).await)
}
