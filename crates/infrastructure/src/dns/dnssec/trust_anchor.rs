use super::crypto::SignatureVerifier;
use super::types::{DnskeyRecord, DsRecord};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hickory_proto::rr::Name;
use std::path::Path;
use tracing::{info, warn};

/// A trust anchor in DS form: the digest of a root KSK together with its
/// publication window (IANA `root-anchors.xml` schema).
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub zone: Name,
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl TrustAnchor {
    pub fn is_valid_at(&self, when: DateTime<Utc>) -> bool {
        if let Some(from) = self.valid_from {
            if when < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if when > until {
                return false;
            }
        }
        true
    }

    pub fn as_ds(&self) -> DsRecord {
        DsRecord {
            key_tag: self.key_tag,
            algorithm: self.algorithm,
            digest_type: self.digest_type,
            digest: self.digest.clone(),
        }
    }
}

/// Store of configured trust anchors, defaulting to the IANA root KSKs.
#[derive(Debug, Clone)]
pub struct TrustAnchorStore {
    anchors: Vec<TrustAnchor>,
}

/// Root KSK-2017 (key tag 20326) and KSK-2024 (key tag 38696) DS digests,
/// per https://data.iana.org/root-anchors/root-anchors.xml.
const BUILTIN_ANCHORS: &[(u16, u8, u8, &str)] = &[
    (
        20326,
        8,
        2,
        "E06D44B80B8F1D39A95C0B0D7C65D08458E880409BBC683457104237C7F8EC8D",
    ),
    (
        38696,
        8,
        2,
        "683D2D0ACB8C9B712A1948B27F741219298D0A450D612C483AF444A4C0FB2B16",
    ),
];

impl TrustAnchorStore {
    /// Built-in root anchors.
    pub fn builtin() -> Self {
        let anchors = BUILTIN_ANCHORS
            .iter()
            .filter_map(|(tag, alg, dt, hex)| {
                Some(TrustAnchor {
                    zone: Name::root(),
                    key_tag: *tag,
                    algorithm: *alg,
                    digest_type: *dt,
                    digest: decode_hex(hex)?,
                    valid_from: None,
                    valid_until: None,
                })
            })
            .collect();
        Self { anchors }
    }

    pub fn empty() -> Self {
        Self { anchors: Vec::new() }
    }

    /// Load from an IANA `root-anchors.xml` file, falling back to built-in
    /// anchors on any read or parse failure.
    pub fn load(path: Option<&str>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };
        match std::fs::read_to_string(Path::new(path)) {
            Ok(raw) => match Self::parse_xml(&raw) {
                Ok(store) => {
                    info!(file = path, anchors = store.anchors.len(), "Trust anchors loaded");
                    store
                }
                Err(e) => {
                    warn!(file = path, error = %e, "Trust anchor file invalid, using built-in");
                    Self::builtin()
                }
            },
            Err(e) => {
                warn!(file = path, error = %e, "Trust anchor file unreadable, using built-in");
                Self::builtin()
            }
        }
    }

    /// Parse the `root-anchors.xml` schema: `<KeyDigest>` elements with
    /// `validFrom`/`validUntil` attributes and `<KeyTag>`, `<Algorithm>`,
    /// `<DigestType>`, `<Digest>` children. A forgiving scan, not a full
    /// XML parser; the document is machine-generated and tiny.
    pub fn parse_xml(content: &str) -> Result<Self, String> {
        let mut anchors = Vec::new();
        let mut rest = content;

        while let Some(start) = rest.find("<KeyDigest") {
            let Some(end_rel) = rest[start..].find("</KeyDigest>") else {
                break;
            };
            let block = &rest[start..start + end_rel];

            let key_tag: u16 = element_text(block, "KeyTag")
                .ok_or("KeyDigest without KeyTag")?
                .parse()
                .map_err(|_| "Bad KeyTag")?;
            let algorithm: u8 = element_text(block, "Algorithm")
                .ok_or("KeyDigest without Algorithm")?
                .parse()
                .map_err(|_| "Bad Algorithm")?;
            let digest_type: u8 = element_text(block, "DigestType")
                .ok_or("KeyDigest without DigestType")?
                .parse()
                .map_err(|_| "Bad DigestType")?;
            let digest = decode_hex(element_text(block, "Digest").ok_or("KeyDigest without Digest")?)
                .ok_or("Bad Digest hex")?;

            anchors.push(TrustAnchor {
                zone: Name::root(),
                key_tag,
                algorithm,
                digest_type,
                digest,
                valid_from: attribute_text(block, "validFrom")
                    .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                valid_until: attribute_text(block, "validUntil")
                    .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
            });

            rest = &rest[start + end_rel..];
        }

        if anchors.is_empty() {
            return Err("no KeyDigest elements found".to_string());
        }
        Ok(Self { anchors })
    }

    /// The DS set trusted for the root zone right now.
    pub fn root_ds_set(&self) -> Vec<DsRecord> {
        let now = Utc::now();
        self.anchors
            .iter()
            .filter(|a| a.zone.is_root() && a.is_valid_at(now))
            .map(TrustAnchor::as_ds)
            .collect()
    }

    /// Whether a DNSKEY matches any currently-valid anchor for its zone.
    pub fn is_trusted(&self, dnskey: &DnskeyRecord, zone: &Name) -> bool {
        let verifier = SignatureVerifier;
        let now = Utc::now();
        self.anchors
            .iter()
            .filter(|a| a.zone == zone.to_lowercase() && a.is_valid_at(now))
            .any(|a| {
                verifier
                    .verify_ds(&a.as_ds(), dnskey, zone)
                    .unwrap_or(false)
            })
    }

    pub fn anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }
}

impl Default for TrustAnchorStore {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The root KSK-2017 public key (key tag 20326), as published by IANA.
/// Kept alongside the DS-form anchors so a priming DNSKEY response can be
/// checked directly against known key material.
pub fn root_ksk_2017() -> DnskeyRecord {
    let public_key_b64 = concat!(
        "AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3",
        "+/4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kv",
        "ArMtNROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF",
        "0jLHwVN8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+e",
        "oZG+SrDK6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfd",
        "RUfhHdY6+cn8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwN",
        "R1AkUTV74bU="
    );

    DnskeyRecord {
        flags: 257, // KSK with SEP flag
        protocol: 3,
        algorithm: 8, // RSA/SHA-256
        public_key: STANDARD
            .decode(public_key_b64)
            .expect("IANA root KSK decodes"),
    }
}

fn element_text<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(block[start..end].trim())
}

fn attribute_text<'a>(block: &'a str, attr: &str) -> Option<&'a str> {
    let marker = format!("{attr}=\"");
    let start = block.find(&marker)? + marker.len();
    let end = block[start..].find('"')? + start;
    Some(&block[start..end])
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrustAnchor id="380DC50D-484E-40D0-A3AE-68F2B18F61C7" source="http://data.iana.org/root-anchors/root-anchors.xml">
  <Zone>.</Zone>
  <KeyDigest id="Klajeyz" validFrom="2017-02-02T00:00:00+00:00">
    <KeyTag>20326</KeyTag>
    <Algorithm>8</Algorithm>
    <DigestType>2</DigestType>
    <Digest>E06D44B80B8F1D39A95C0B0D7C65D08458E880409BBC683457104237C7F8EC8D</Digest>
  </KeyDigest>
  <KeyDigest id="Kmyv6jo" validFrom="2024-07-18T00:00:00+00:00">
    <KeyTag>38696</KeyTag>
    <Algorithm>8</Algorithm>
    <DigestType>2</DigestType>
    <Digest>683D2D0ACB8C9B712A1948B27F741219298D0A450D612C483AF444A4C0FB2B16</Digest>
  </KeyDigest>
</TrustAnchor>
"#;

    #[test]
    fn parses_iana_schema() {
        let store = TrustAnchorStore::parse_xml(SAMPLE_XML).unwrap();
        assert_eq!(store.anchors().len(), 2);

        let first = &store.anchors()[0];
        assert_eq!(first.key_tag, 20326);
        assert_eq!(first.algorithm, 8);
        assert_eq!(first.digest_type, 2);
        assert_eq!(first.digest.len(), 32);
        assert!(first.valid_from.is_some());
        assert!(first.valid_until.is_none());
    }

    #[test]
    fn validity_window_is_honored() {
        let store = TrustAnchorStore::parse_xml(SAMPLE_XML).unwrap();
        let anchor = &store.anchors()[0];

        let before = DateTime::parse_from_rfc3339("2016-01-01T00:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let after = DateTime::parse_from_rfc3339("2020-01-01T00:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!anchor.is_valid_at(before));
        assert!(anchor.is_valid_at(after));
    }

    #[test]
    fn builtin_matches_iana_digests() {
        let store = TrustAnchorStore::builtin();
        let ds = store.root_ds_set();
        assert_eq!(ds.len(), 2);
        assert!(ds.iter().any(|d| d.key_tag == 20326));
        assert!(ds.iter().any(|d| d.key_tag == 38696));
    }

    #[test]
    fn garbage_xml_is_an_error() {
        assert!(TrustAnchorStore::parse_xml("<xml></xml>").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let store = TrustAnchorStore::load(Some("/nonexistent/root-anchors.xml"));
        assert_eq!(store.anchors().len(), 2);
    }

    #[test]
    fn ksk_2017_matches_its_published_anchor() {
        let key = root_ksk_2017();
        assert_eq!(key.key_tag(), 20326);
        assert!(key.is_ksk());
        assert!(TrustAnchorStore::builtin().is_trusted(&key, &Name::root()));
    }
}
