// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Password to authentication key derivation.

use openssl::hash::MessageDigest;
use std::fmt;
use thiserror::Error;

/// Length of derived authentication keys.
pub const KEY_LEN: usize = 32;

/// Key derivation failures.
#[derive(Debug, Error)]
#[expect(missing_docs)]
pub enum CredentialError {
    #[error("PBKDF2 derivation failed")]
    Derivation(#[source] openssl::error::ErrorStack),
    #[error("PBKDF2-HMAC-{digest} known-answer test {index} produced the wrong key")]
    SelfTest { digest: &'static str, index: usize },
}

/// A PBKDF2 parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfRegime {
    /// HMAC-SHA1, 75000 iterations.
    Sha1,
    /// HMAC-SHA256, 100000 iterations.
    Sha256,
}

impl KdfRegime {
    /// The iteration count of this regime.
    pub fn iterations(self) -> usize {
        match self {
            KdfRegime::Sha1 => 75000,
            KdfRegime::Sha256 => 100000,
        }
    }

    fn digest(self) -> MessageDigest {
        match self {
            KdfRegime::Sha1 => MessageDigest::sha1(),
            KdfRegime::Sha256 => MessageDigest::sha256(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            KdfRegime::Sha1 => "SHA1",
            KdfRegime::Sha256 => "SHA256",
        }
    }
}

/// How passwords are turned into authentication keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordHashing {
    /// Derive a [`KEY_LEN`] byte key with PBKDF2, salted with the drive
    /// serial number.
    Pbkdf2(KdfRegime),
    /// Send the password bytes verbatim.
    NoHash,
}

impl Default for PasswordHashing {
    fn default() -> Self {
        PasswordHashing::Pbkdf2(KdfRegime::Sha1)
    }
}

/// Derives `out_len` bytes from `passphrase` with PBKDF2-HMAC.
pub fn derive(
    regime: KdfRegime,
    passphrase: &[u8],
    salt: &[u8],
    iterations: usize,
    out_len: usize,
) -> Result<Vec<u8>, CredentialError> {
    let mut key = vec![0; out_len];
    openssl::pkcs5::pbkdf2_hmac(passphrase, salt, iterations, regime.digest(), &mut key)
        .map_err(CredentialError::Derivation)?;
    Ok(key)
}

/// An authentication key ready to be presented to the device.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Vec<u8>);

impl Credential {
    /// Hashes `password` according to `hashing`.
    pub fn from_password(
        password: &str,
        salt: &[u8],
        hashing: PasswordHashing,
    ) -> Result<Self, CredentialError> {
        match hashing {
            PasswordHashing::Pbkdf2(regime) => Ok(Self(derive(
                regime,
                password.as_bytes(),
                salt,
                regime.iterations(),
                KEY_LEN,
            )?)),
            PasswordHashing::NoHash => Ok(Self(password.as_bytes().to_vec())),
        }
    }

    /// A device-assigned PIN (MSID, PSID) presented verbatim.
    pub fn plain(pin: impl Into<Vec<u8>>) -> Self {
        Self(pin.into())
    }

    /// The bytes sent as the host challenge.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

struct KnownAnswer {
    iterations: usize,
    expected: &'static str,
}

// RFC 6070 and the matching SHA256 vectors, P = "password", S = "salt".
const SHA1_VECTORS: &[KnownAnswer] = &[
    KnownAnswer {
        iterations: 1,
        expected: "0c60c80f961f0e71f3a9b524af6012062fe037a6",
    },
    KnownAnswer {
        iterations: 2,
        expected: "ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957",
    },
    KnownAnswer {
        iterations: 4096,
        expected: "4b007901b765489abead49d926f721d065a429c1",
    },
];

const SHA256_VECTORS: &[KnownAnswer] = &[
    KnownAnswer {
        iterations: 1,
        expected: "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b",
    },
    KnownAnswer {
        iterations: 2,
        expected: "ae4d0c95af6b46d32d0adff928f06dd02a303f8ef3c251dfd6e2d85a95474c43",
    },
    KnownAnswer {
        iterations: 4096,
        expected: "c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a",
    },
];

/// Checks both derivation regimes against fixed known-answer vectors.
pub fn self_test() -> Result<(), CredentialError> {
    for (regime, vectors) in [
        (KdfRegime::Sha1, SHA1_VECTORS),
        (KdfRegime::Sha256, SHA256_VECTORS),
    ] {
        for (index, v) in vectors.iter().enumerate() {
            let key = derive(
                regime,
                b"password",
                b"salt",
                v.iterations,
                v.expected.len() / 2,
            )?;
            if hex::encode(&key) != v.expected {
                return Err(CredentialError::SelfTest {
                    digest: regime.name(),
                    index,
                });
            }
        }
    }
    tracing::debug!("PBKDF2 self test passed");
    Ok(())
}
