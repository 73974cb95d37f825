//! Apache `htpasswd` file parsing and password checks.
//!
//! Supported schemes: bcrypt (`$2a$`/`$2b$`/`$2y$`), Apache MD5 (`$apr1$`),
//! SHA-1 (`{SHA}`) and plaintext.  SHA-crypt (`$5$`, `$6$`) and traditional
//! DES crypt entries are recognised so the file still loads, but they never
//! verify.

use std::collections::HashMap;

use anyhow::{bail, Result};
use base64::Engine as _;
use md5::{Digest as _, Md5};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::warn;

const APR1_PREFIX: &str = "$apr1$";
const SHA1_PREFIX: &str = "{SHA}";

/// Alphabet used by crypt(3)-style base64.
const CRYPT_ALPHABET: &[u8; 64] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

// ---------------------------------------------------------------------------
// Hash representation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordHash {
    Bcrypt(String),
    Apr1 { salt: String, checksum: String },
    Sha1(Vec<u8>),
    Plain(String),
    Unsupported { scheme: &'static str },
}

impl PasswordHash {
    /// Classify a raw hash field from the file.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("$2a$") || raw.starts_with("$2b$") || raw.starts_with("$2y$") {
            return Self::Bcrypt(raw.to_string());
        }
        if let Some(rest) = raw.strip_prefix(APR1_PREFIX) {
            return match rest.split_once('$') {
                Some((salt, checksum)) => Self::Apr1 {
                    salt: salt.to_string(),
                    checksum: checksum.to_string(),
                },
                None => Self::Unsupported { scheme: "apr1" },
            };
        }
        if let Some(encoded) = raw.strip_prefix(SHA1_PREFIX) {
            return match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(digest) => Self::Sha1(digest),
                Err(_) => Self::Unsupported { scheme: "sha1" },
            };
        }
        if raw.starts_with("$5$") {
            return Self::Unsupported { scheme: "sha256-crypt" };
        }
        if raw.starts_with("$6$") {
            return Self::Unsupported { scheme: "sha512-crypt" };
        }
        if is_des_crypt(raw) {
            return Self::Unsupported { scheme: "des-crypt" };
        }
        Self::Plain(raw.to_string())
    }

    /// Check `password` against this hash.
    pub fn verify(&self, password: &str) -> bool {
        match self {
            Self::Bcrypt(hash) => bcrypt::verify(password, hash).unwrap_or_else(|e| {
                warn!(error = %e, "malformed bcrypt hash");
                false
            }),
            Self::Apr1 { salt, checksum } => {
                let computed = apr1_checksum(password.as_bytes(), salt.as_bytes());
                computed.as_bytes().ct_eq(checksum.as_bytes()).into()
            }
            Self::Sha1(expected) => {
                let digest = Sha1::digest(password.as_bytes());
                digest.as_slice().ct_eq(expected.as_slice()).into()
            }
            Self::Plain(expected) => expected.as_bytes().ct_eq(password.as_bytes()).into(),
            Self::Unsupported { scheme } => {
                warn!(scheme, "credential uses a hash scheme this proxy cannot check");
                false
            }
        }
    }
}

/// Traditional DES crypt: exactly 13 characters from the crypt alphabet.
fn is_des_crypt(raw: &str) -> bool {
    raw.len() == 13 && raw.bytes().all(|b| CRYPT_ALPHABET.contains(&b))
}

// ---------------------------------------------------------------------------
// File parsing
// ---------------------------------------------------------------------------

/// Parse the contents of an htpasswd file into a principal → hash map.
///
/// Blank lines and `#` comments are skipped.  Any other line must be
/// `user:hash` with a non-empty user, otherwise the whole file is rejected.
/// A user listed twice keeps its last entry.
pub fn parse_htpasswd(contents: &str) -> Result<HashMap<String, PasswordHash>> {
    let mut entries = HashMap::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some((user, hash)) = line.split_once(':') else {
            bail!("line {}: missing ':' separator", idx + 1);
        };
        if user.is_empty() {
            bail!("line {}: empty user name", idx + 1);
        }
        entries.insert(user.to_string(), PasswordHash::parse(hash));
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Apache MD5
// ---------------------------------------------------------------------------

/// Compute the crypt-base64 checksum part of an `$apr1$` hash.
fn apr1_checksum(password: &[u8], salt: &[u8]) -> String {
    let salt = &salt[..salt.len().min(8)];

    let mut alternate = Md5::new();
    alternate.update(password);
    alternate.update(salt);
    alternate.update(password);
    let alternate = alternate.finalize();

    let mut ctx = Md5::new();
    ctx.update(password);
    ctx.update(APR1_PREFIX.as_bytes());
    ctx.update(salt);

    let mut remaining = password.len();
    while remaining > 0 {
        let n = remaining.min(16);
        ctx.update(&alternate[..n]);
        remaining -= n;
    }

    let mut bits = password.len();
    while bits > 0 {
        if bits & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&password[..1]);
        }
        bits >>= 1;
    }

    let mut digest = ctx.finalize();
    for round in 0..1000 {
        let mut ctx = Md5::new();
        if round & 1 == 1 {
            ctx.update(password);
        } else {
            ctx.update(&digest);
        }
        if round % 3 != 0 {
            ctx.update(salt);
        }
        if round % 7 != 0 {
            ctx.update(password);
        }
        if round & 1 == 1 {
            ctx.update(&digest);
        } else {
            ctx.update(password);
        }
        digest = ctx.finalize();
    }

    let d = digest;
    let mut out = String::with_capacity(22);
    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let v = (u32::from(d[a]) << 16) | (u32::from(d[b]) << 8) | u32::from(d[c]);
        push_crypt64(&mut out, v, 4);
    }
    push_crypt64(&mut out, u32::from(d[11]), 2);
    out
}

fn push_crypt64(out: &mut String, mut v: u32, n: usize) {
    for _ in 0..n {
        out.push(CRYPT_ALPHABET[(v & 0x3f) as usize] as char);
        v >>= 6;
    }
}
