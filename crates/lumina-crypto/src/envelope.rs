//! The encrypted backup envelope and its wire format.

use serde::{Deserialize, Serialize};

use crate::{Error, MAX_ITERATIONS, MIN_ITERATIONS, Result};

pub const ALG_AES_GCM: &str = "AES-GCM";
/// The only algorithm tag version 1 archives carry.
pub const ALG_AES_256_GCM: &str = "AES-256-GCM";
pub const KDF_PBKDF2_SHA256: &str = "PBKDF2-SHA256";
pub const MAC_HMAC_SHA256: &str = "HMAC-SHA256";

/// Current format: AES-GCM plus an HMAC over every field.
pub const VERSION_MAC: u32 = 2;
/// Earlier format: AES-GCM only. Read, never written.
pub const VERSION_AEAD_ONLY: u32 = 1;

/// A sealed backup. Binary fields are standard base64.
///
/// Serialises with the long field names (`saltB64`, `ivB64`, ...); the short
/// names used by older archives (`salt`, `iv`, `ct`, `mac`) are accepted
/// when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
  pub v:       u32,
  pub alg:     String,
  pub kdf:     String,
  pub iter:    u64,
  #[serde(rename = "saltB64", alias = "salt")]
  pub salt:    String,
  #[serde(rename = "ivB64", alias = "iv")]
  pub iv:      String,
  #[serde(rename = "ctB64", alias = "ct")]
  pub ct:      String,
  #[serde(
    rename = "macAlg",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub mac_alg: Option<String>,
  #[serde(
    rename = "macB64",
    alias = "mac",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub mac:     Option<String>,
}

/// Which checks an envelope's header calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scheme {
  /// Verify the HMAC, then decrypt.
  Authenticated,
  /// Decrypt only.
  AeadOnly,
}

impl Envelope {
  /// Validate the algorithm identifiers and iteration count.
  pub(crate) fn scheme(&self) -> Result<Scheme> {
    let unsupported = |what: String| Err(Error::UnsupportedEnvelope(what));

    if self.kdf != KDF_PBKDF2_SHA256 {
      return unsupported(format!("kdf {:?}", self.kdf));
    }
    if !(MIN_ITERATIONS as u64..=MAX_ITERATIONS as u64).contains(&self.iter) {
      return unsupported(format!("iteration count {}", self.iter));
    }

    match self.v {
      VERSION_MAC => {
        if self.alg != ALG_AES_GCM {
          return unsupported(format!("alg {:?}", self.alg));
        }
        match self.mac_alg.as_deref() {
          Some(MAC_HMAC_SHA256) => {}
          other => return unsupported(format!("macAlg {other:?}")),
        }
        if self.mac.is_none() {
          return unsupported("missing mac".to_owned());
        }
        Ok(Scheme::Authenticated)
      }
      VERSION_AEAD_ONLY => {
        if self.alg != ALG_AES_256_GCM {
          return unsupported(format!("alg {:?}", self.alg));
        }
        // Version 1 never carried a MAC; one present means a stripped v2.
        if self.mac_alg.is_some() || self.mac.is_some() {
          return unsupported("mac on a version 1 envelope".to_owned());
        }
        Ok(Scheme::AeadOnly)
      }
      v => unsupported(format!("version {v}")),
    }
  }

  /// The byte string covered by the MAC: one `key=value` line per field, in
  /// a fixed order, joined with `\n`.
  pub(crate) fn mac_input(&self) -> String {
    [
      format!("v={}", self.v),
      format!("alg={}", self.alg),
      format!("kdf={}", self.kdf),
      format!("iter={}", self.iter),
      format!("macAlg={}", self.mac_alg.as_deref().unwrap_or_default()),
      format!("saltB64={}", self.salt),
      format!("ivB64={}", self.iv),
      format!("ctB64={}", self.ct),
    ]
    .join("\n")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v2() -> Envelope {
    Envelope {
      v:       VERSION_MAC,
      alg:     ALG_AES_GCM.into(),
      kdf:     KDF_PBKDF2_SHA256.into(),
      iter:    210_000,
      salt:    "c2FsdA==".into(),
      iv:      "aXY=".into(),
      ct:      "Y3Q=".into(),
      mac_alg: Some(MAC_HMAC_SHA256.into()),
      mac:     Some("bWFj".into()),
    }
  }

  #[test]
  fn serialises_long_field_names() {
    let json = serde_json::to_value(v2()).unwrap();
    for key in [
      "v", "alg", "kdf", "iter", "saltB64", "ivB64", "ctB64", "macAlg",
      "macB64",
    ] {
      assert!(json.get(key).is_some(), "missing {key}");
    }
    assert!(json.get("salt").is_none());
  }

  #[test]
  fn reads_short_field_names() {
    let env: Envelope = serde_json::from_str(
      r#"{"v":1,"kdf":"PBKDF2-SHA256","iter":210000,"salt":"AA==",
          "alg":"AES-256-GCM","iv":"AA==","ct":"AA=="}"#,
    )
    .unwrap();
    assert_eq!(env.salt, "AA==");
    assert_eq!(env.mac, None);
    assert_eq!(env.scheme().unwrap(), Scheme::AeadOnly);
  }

  #[test]
  fn mac_input_is_line_per_field() {
    let input = v2().mac_input();
    assert_eq!(
      input,
      "v=2\nalg=AES-GCM\nkdf=PBKDF2-SHA256\niter=210000\nmacAlg=HMAC-SHA256\n\
       saltB64=c2FsdA==\nivB64=aXY=\nctB64=Y3Q="
    );
  }

  #[test]
  fn rejects_unknown_headers() {
    let mut env = v2();
    env.v = 3;
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));

    let mut env = v2();
    env.iter = 1;
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));

    let mut env = v2();
    env.mac_alg = Some("HMAC-MD5".into());
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));

    let mut env = v2();
    env.mac = None;
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));

    let mut env = v2();
    env.alg = ALG_AES_256_GCM.into();
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));
  }

  #[test]
  fn version_one_takes_no_mac_and_one_alg() {
    let mut env = v2();
    env.v = VERSION_AEAD_ONLY;
    env.alg = ALG_AES_256_GCM.into();
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));

    env.mac_alg = None;
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));

    env.mac = None;
    assert_eq!(env.scheme().unwrap(), Scheme::AeadOnly);

    env.alg = ALG_AES_GCM.into();
    assert!(matches!(env.scheme(), Err(Error::UnsupportedEnvelope(_))));
  }
}
