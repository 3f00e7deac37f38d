//! Key derivation, sealing and opening of [`Envelope`]s.

use aes_gcm::{
  Aes256Gcm, KeyInit, Nonce,
  aead::{Aead, Payload},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
  Error, IV_LEN, ITERATIONS, MIN_ITERATIONS, MIN_PASSPHRASE_CHARS, Result,
  SALT_LEN,
  envelope::{
    ALG_AES_GCM, Envelope, KDF_PBKDF2_SHA256, MAC_HMAC_SHA256, Scheme,
    VERSION_MAC,
  },
};

type HmacSha256 = Hmac<Sha256>;

const KEY_LEN: usize = 32;

/// Associated data sealed into every version 2 ciphertext, so the ciphertext
/// cannot be replayed as a version 1 envelope once the MAC is stripped.
const AAD_V2: &[u8] = b"lumina-backup-v2";

fn aad(scheme: Scheme) -> &'static [u8] {
  match scheme {
    Scheme::Authenticated => AAD_V2,
    Scheme::AeadOnly => b"",
  }
}

/// The two independent keys stretched from one passphrase.
#[derive(Zeroize, ZeroizeOnDrop)]
struct DerivedKeys {
  enc: [u8; KEY_LEN],
  mac: [u8; KEY_LEN],
}

impl DerivedKeys {
  fn derive(passphrase: &str, salt: &[u8], iterations: u32) -> Self {
    let mut material = Zeroizing::new([0u8; 2 * KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(
      passphrase.as_bytes(),
      salt,
      iterations,
      material.as_mut_slice(),
    );
    let mut keys = Self { enc: [0; KEY_LEN], mac: [0; KEY_LEN] };
    keys.enc.copy_from_slice(&material[..KEY_LEN]);
    keys.mac.copy_from_slice(&material[KEY_LEN..]);
    keys
  }

  fn cipher(&self) -> Result<Aes256Gcm> {
    <Aes256Gcm as KeyInit>::new_from_slice(&self.enc)
      .map_err(|_| Error::AuthenticationFailed)
  }

  fn mac(&self, input: &str) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac)
      .map_err(|_| Error::AuthenticationFailed)?;
    mac.update(input.as_bytes());
    Ok(mac)
  }
}

/// Seals values into [`Envelope`]s and opens them again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionEngine {
  iterations: u32,
}

impl Default for EncryptionEngine {
  fn default() -> Self { Self { iterations: ITERATIONS } }
}

impl EncryptionEngine {
  /// An engine writing envelopes with a custom iteration count, clamped to
  /// [`MIN_ITERATIONS`]. Meant for tests; exports use [`ITERATIONS`].
  pub fn with_iterations(iterations: u32) -> Self {
    Self { iterations: iterations.max(MIN_ITERATIONS) }
  }

  pub fn iterations(&self) -> u32 { self.iterations }

  /// Serialise `value` to JSON and seal it under `passphrase` with a fresh
  /// salt and IV.
  pub fn encrypt<T: Serialize + ?Sized>(
    &self,
    passphrase: &str,
    value: &T,
  ) -> Result<Envelope> {
    if passphrase.trim().chars().count() < MIN_PASSPHRASE_CHARS {
      return Err(Error::WeakPassphrase);
    }
    let plaintext = Zeroizing::new(serde_json::to_vec(value)?);

    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let keys = DerivedKeys::derive(passphrase, &salt, self.iterations);
    let ct = keys
      .cipher()?
      .encrypt(Nonce::from_slice(&iv), Payload {
        msg: plaintext.as_slice(),
        aad: aad(Scheme::Authenticated),
      })
      .map_err(|_| Error::AuthenticationFailed)?;

    let mut envelope = Envelope {
      v:       VERSION_MAC,
      alg:     ALG_AES_GCM.to_owned(),
      kdf:     KDF_PBKDF2_SHA256.to_owned(),
      iter:    u64::from(self.iterations),
      salt:    B64.encode(salt),
      iv:      B64.encode(iv),
      ct:      B64.encode(ct),
      mac_alg: Some(MAC_HMAC_SHA256.to_owned()),
      mac:     None,
    };
    let tag = keys.mac(&envelope.mac_input())?.finalize().into_bytes();
    envelope.mac = Some(B64.encode(tag));

    tracing::debug!("sealed backup ({} iterations)", self.iterations);
    Ok(envelope)
  }

  /// Open `envelope` and return the raw plaintext.
  ///
  /// Header problems are [`Error::UnsupportedEnvelope`]; anything that goes
  /// wrong after that is [`Error::AuthenticationFailed`]. For version 2
  /// envelopes the MAC is verified before decryption is attempted, and the
  /// ciphertext must open under the version 2 associated data.
  pub fn decrypt_bytes(
    &self,
    passphrase: &str,
    envelope: &Envelope,
  ) -> Result<Zeroizing<Vec<u8>>> {
    let scheme = envelope.scheme()?;
    // `scheme()` bounds the count below `u32::MAX`.
    let iterations =
      u32::try_from(envelope.iter).map_err(|_| Error::AuthenticationFailed)?;

    let salt = decode(&envelope.salt)?;
    let keys = DerivedKeys::derive(passphrase, &salt, iterations);

    if scheme == Scheme::Authenticated {
      let expected = decode(envelope.mac.as_deref().unwrap_or_default())?;
      keys
        .mac(&envelope.mac_input())?
        .verify_slice(&expected)
        .map_err(|_| Error::AuthenticationFailed)?;
    }

    let iv = decode(&envelope.iv)?;
    if iv.len() != IV_LEN {
      return Err(Error::AuthenticationFailed);
    }
    let ct = decode(&envelope.ct)?;
    let plaintext = keys
      .cipher()?
      .decrypt(Nonce::from_slice(&iv), Payload {
        msg: ct.as_slice(),
        aad: aad(scheme),
      })
      .map_err(|_| Error::AuthenticationFailed)?;
    Ok(Zeroizing::new(plaintext))
  }

  /// Open `envelope` and parse the plaintext as JSON.
  pub fn decrypt(&self, passphrase: &str, envelope: &Envelope) -> Result<Value> {
    self.decrypt_as(passphrase, envelope)
  }

  pub fn decrypt_as<T: DeserializeOwned>(
    &self,
    passphrase: &str,
    envelope: &Envelope,
  ) -> Result<T> {
    let plaintext = self.decrypt_bytes(passphrase, envelope)?;
    serde_json::from_slice(&plaintext).map_err(|_| Error::AuthenticationFailed)
  }
}

fn decode(b64: &str) -> Result<Vec<u8>> {
  B64.decode(b64).map_err(|_| Error::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::envelope::{ALG_AES_256_GCM, VERSION_AEAD_ONLY};

  fn engine() -> EncryptionEngine { EncryptionEngine::with_iterations(1_000) }

  /// Replace one base64 character with a different valid one.
  fn flip(b64: &str) -> String {
    let mut chars: Vec<char> = b64.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
  }

  #[test]
  fn round_trip() {
    let value = json!({"notes": [{"id": "n1", "title": "ñandú"}], "n": 3});
    let env = engine().encrypt("correct-horse", &value).unwrap();
    assert_eq!(env.v, 2);
    assert_eq!(env.iter, 1_000);
    assert_eq!(B64.decode(&env.salt).unwrap().len(), SALT_LEN);
    assert_eq!(B64.decode(&env.iv).unwrap().len(), IV_LEN);
    assert_eq!(engine().decrypt("correct-horse", &env).unwrap(), value);
  }

  #[test]
  fn wrong_passphrase_fails_authentication() {
    let env = engine().encrypt("correct-horse", &json!({"foo": 1})).unwrap();
    let err = engine().decrypt("wrong-horse", &env).unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed));
  }

  #[test]
  fn tampering_any_field_fails_authentication() {
    let env = engine().encrypt("correct-horse", &json!({"foo": 1})).unwrap();

    let mut tampered = Vec::new();
    let mut e = env.clone();
    e.ct = flip(&e.ct);
    tampered.push(e);
    let mut e = env.clone();
    e.iv = flip(&e.iv);
    tampered.push(e);
    let mut e = env.clone();
    e.salt = flip(&e.salt);
    tampered.push(e);
    let mut e = env.clone();
    e.mac = e.mac.as_deref().map(flip);
    tampered.push(e);
    let mut e = env.clone();
    e.iter += 1;
    tampered.push(e);
    let mut e = env.clone();
    e.ct = "not base64!".into();
    tampered.push(e);

    for e in tampered {
      let err = engine().decrypt("correct-horse", &e).unwrap_err();
      assert!(matches!(err, Error::AuthenticationFailed), "{e:?}");
    }
  }

  #[test]
  fn fresh_salt_and_iv_every_time() {
    let a = engine().encrypt("correct-horse", &1).unwrap();
    let b = engine().encrypt("correct-horse", &1).unwrap();
    assert_ne!(a.salt, b.salt);
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.ct, b.ct);
  }

  #[test]
  fn weak_passphrases_are_rejected() {
    for pass in ["", "12345", "  abc  ", "     \t     "] {
      let err = engine().encrypt(pass, &json!({})).unwrap_err();
      assert!(matches!(err, Error::WeakPassphrase), "{pass:?}");
    }
    // Counted in characters, not bytes.
    assert!(engine().encrypt("ñññññ", &json!({})).is_err());
    assert!(engine().encrypt("ññññññ", &json!({})).is_ok());
  }

  #[test]
  fn default_engine_uses_production_iterations() {
    assert_eq!(EncryptionEngine::default().iterations(), ITERATIONS);
    assert_eq!(EncryptionEngine::with_iterations(1).iterations(), MIN_ITERATIONS);
  }

  /// Build an envelope the way version 1 writers did: AES-GCM over the JSON
  /// with the first 32 bytes of PBKDF2 output, no MAC.
  fn seal_v1(passphrase: &str, value: &Value, alg: &str) -> Envelope {
    let salt = [7u8; SALT_LEN];
    let iv = [9u8; IV_LEN];
    let keys = DerivedKeys::derive(passphrase, &salt, 1_000);
    let ct = keys
      .cipher()
      .unwrap()
      .encrypt(Nonce::from_slice(&iv), serde_json::to_vec(value).unwrap().as_slice())
      .unwrap();
    Envelope {
      v:       VERSION_AEAD_ONLY,
      alg:     alg.into(),
      kdf:     KDF_PBKDF2_SHA256.into(),
      iter:    1_000,
      salt:    B64.encode(salt),
      iv:      B64.encode(iv),
      ct:      B64.encode(ct),
      mac_alg: None,
      mac:     None,
    }
  }

  #[test]
  fn reads_version_one_archives() {
    let value = json!({"schema": 1, "notes": []});
    let env = seal_v1("old-secret", &value, ALG_AES_256_GCM);
    assert_eq!(engine().decrypt("old-secret", &env).unwrap(), value);
    assert!(matches!(
      engine().decrypt("other-secret", &env),
      Err(Error::AuthenticationFailed)
    ));

    let env = seal_v1("old-secret", &value, ALG_AES_GCM);
    assert!(matches!(
      engine().decrypt("old-secret", &env),
      Err(Error::UnsupportedEnvelope(_))
    ));
  }

  #[test]
  fn stripping_the_mac_does_not_bypass_it() {
    let env = engine().encrypt("correct-horse", &json!({"foo": 1})).unwrap();

    let mut stripped = env.clone();
    stripped.v = VERSION_AEAD_ONLY;
    stripped.mac_alg = None;
    stripped.mac = None;
    assert!(engine().decrypt("correct-horse", &stripped).is_err());

    stripped.alg = ALG_AES_256_GCM.into();
    assert!(matches!(
      engine().decrypt("correct-horse", &stripped),
      Err(Error::AuthenticationFailed)
    ));

    let mut relabelled = env;
    relabelled.v = VERSION_AEAD_ONLY;
    relabelled.alg = ALG_AES_256_GCM.into();
    assert!(matches!(
      engine().decrypt("correct-horse", &relabelled),
      Err(Error::UnsupportedEnvelope(_))
    ));
  }

  #[test]
  fn unsupported_header_is_reported_before_kdf() {
    let mut env = engine().encrypt("correct-horse", &1).unwrap();
    env.kdf = "scrypt".into();
    assert!(matches!(
      engine().decrypt("correct-horse", &env),
      Err(Error::UnsupportedEnvelope(_))
    ));
  }
}
