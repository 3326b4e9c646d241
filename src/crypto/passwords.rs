use crate::DirectoryError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::str::FromStr;

const SHA1_LEN: usize = 20;

/// Storage schemes understood in `userPassword` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordScheme {
    Plain,
    Sha,
    Ssha,
    Sha256,
    Bcrypt,
}

impl FromStr for PasswordScheme {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(PasswordScheme::Plain),
            "sha" => Ok(PasswordScheme::Sha),
            "ssha" => Ok(PasswordScheme::Ssha),
            "sha256" => Ok(PasswordScheme::Sha256),
            "bcrypt" => Ok(PasswordScheme::Bcrypt),
            other => Err(DirectoryError::Auth(format!(
                "Unknown password hash method: {}",
                other
            ))),
        }
    }
}

pub fn verify_password(password: &str, stored: &str) -> crate::Result<bool> {
    if let Some(encoded) = stored.strip_prefix("{SSHA}") {
        verify_ssha(password, encoded)
    } else if let Some(encoded) = stored.strip_prefix("{SHA}") {
        verify_digest::<Sha1>(password, encoded, "SHA")
    } else if let Some(encoded) = stored.strip_prefix("{SHA256}") {
        verify_digest::<Sha256>(password, encoded, "SHA256")
    } else if let Some(hash) = stored.strip_prefix("{BCRYPT}") {
        verify_bcrypt(password, hash)
    } else if stored.starts_with("$2") {
        verify_bcrypt(password, stored)
    } else {
        Ok(password == stored)
    }
}

fn verify_ssha(password: &str, encoded: &str) -> crate::Result<bool> {
    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| DirectoryError::Auth(format!("Invalid SSHA encoding: {}", e)))?;

    if decoded.len() < SHA1_LEN {
        return Err(DirectoryError::Auth("Invalid SSHA hash length".to_string()));
    }

    let (hash, salt) = decoded.split_at(SHA1_LEN);

    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    Ok(hasher.finalize().as_slice() == hash)
}

fn verify_digest<D: Digest>(password: &str, encoded: &str, scheme: &str) -> crate::Result<bool> {
    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| DirectoryError::Auth(format!("Invalid {} encoding: {}", scheme, e)))?;

    Ok(D::digest(password.as_bytes()).as_slice() == decoded.as_slice())
}

fn verify_bcrypt(password: &str, hash: &str) -> crate::Result<bool> {
    bcrypt::verify(password, hash)
        .map_err(|e| DirectoryError::Auth(format!("Bcrypt verification failed: {}", e)))
}

/// Produces a `userPassword` value for seed data.
pub fn hash_password(password: &str, scheme: PasswordScheme) -> crate::Result<String> {
    match scheme {
        PasswordScheme::Plain => Ok(password.to_string()),
        PasswordScheme::Sha => Ok(format!(
            "{{SHA}}{}",
            BASE64.encode(Sha1::digest(password.as_bytes()))
        )),
        PasswordScheme::Sha256 => Ok(format!(
            "{{SHA256}}{}",
            BASE64.encode(Sha256::digest(password.as_bytes()))
        )),
        PasswordScheme::Ssha => {
            let salt: [u8; 8] = rand::thread_rng().gen();

            let mut hasher = Sha1::new();
            hasher.update(password.as_bytes());
            hasher.update(salt);

            let mut result = hasher.finalize().to_vec();
            result.extend_from_slice(&salt);
            Ok(format!("{{SSHA}}{}", BASE64.encode(result)))
        }
        PasswordScheme::Bcrypt => {
            let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
                .map_err(|e| DirectoryError::Auth(format!("Bcrypt hashing failed: {}", e)))?;
            Ok(format!("{{BCRYPT}}{}", hash))
        }
    }
}
