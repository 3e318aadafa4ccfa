use super::types::{name_to_canonical_wire, DnskeyRecord, DsRecord, RrsigRecord};
use boreal_dns_domain::DomainError;
use hickory_proto::rr::{DNSClass, Name, Record};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use ring::signature;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};
use std::time::{SystemTime, UNIX_EPOCH};

/// Cryptographic verifier for DNSSEC: RRSIG signatures against DNSKEY
/// public keys, and DS digests against DNSKEY RDATA.
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Verify an RRSIG over an RRset.
    ///
    /// Builds the signed data per RFC 4034 §3.1.8.1: the RRSIG RDATA
    /// without the signature, followed by every record of the set in
    /// canonical form (lowercased owner, original TTL, canonically-encoded
    /// RDATA, sorted by RDATA).
    ///
    /// `Ok(false)` means the signature is present but does not verify;
    /// `Err` means verification could not be attempted at all.
    pub fn verify_rrsig(
        &self,
        rrsig: &RrsigRecord,
        dnskey: &DnskeyRecord,
        rrset: &[Record],
    ) -> Result<bool, DomainError> {
        if !self.is_time_valid(rrsig) {
            return Ok(false);
        }
        if dnskey.key_tag() != rrsig.key_tag || dnskey.algorithm != rrsig.algorithm {
            return Ok(false);
        }
        if rrset.is_empty() {
            return Ok(false);
        }

        let data = self.build_signed_data(rrsig, rrset)?;

        match rrsig.algorithm {
            8 => self.verify_rsa(&data, &rrsig.signature, dnskey, &signature::RSA_PKCS1_2048_8192_SHA256),
            10 => self.verify_rsa(&data, &rrsig.signature, dnskey, &signature::RSA_PKCS1_2048_8192_SHA512),
            13 => self.verify_ecdsa(&data, &rrsig.signature, dnskey, &signature::ECDSA_P256_SHA256_FIXED, 64),
            14 => self.verify_ecdsa(&data, &rrsig.signature, dnskey, &signature::ECDSA_P384_SHA384_FIXED, 96),
            15 => self.verify_ed25519(&data, &rrsig.signature, dnskey),
            other => Err(DomainError::InvalidDnsResponse(format!(
                "Unsupported DNSSEC algorithm: {other}"
            ))),
        }
    }

    /// Verify that a DS digest matches a DNSKEY: digest over owner name in
    /// canonical wire form followed by the DNSKEY RDATA (RFC 4034 §5.1.4).
    pub fn verify_ds(
        &self,
        ds: &DsRecord,
        dnskey: &DnskeyRecord,
        owner: &Name,
    ) -> Result<bool, DomainError> {
        if dnskey.key_tag() != ds.key_tag || dnskey.algorithm != ds.algorithm {
            return Ok(false);
        }

        let mut data = name_to_canonical_wire(owner);
        data.extend_from_slice(&dnskey.wire());

        let computed = match ds.digest_type {
            1 => {
                let mut hasher = Sha1::new();
                hasher.update(&data);
                hasher.finalize().to_vec()
            }
            2 => {
                let mut hasher = Sha256::new();
                hasher.update(&data);
                hasher.finalize().to_vec()
            }
            4 => {
                let mut hasher = Sha384::new();
                hasher.update(&data);
                hasher.finalize().to_vec()
            }
            other => {
                return Err(DomainError::InvalidDnsResponse(format!(
                    "Unsupported DS digest type: {other}"
                )))
            }
        };

        Ok(computed == ds.digest)
    }

    /// RRSIG RDATA prefix plus the canonical RRset.
    fn build_signed_data(
        &self,
        rrsig: &RrsigRecord,
        rrset: &[Record],
    ) -> Result<Vec<u8>, DomainError> {
        let mut data = rrsig.signed_prefix();

        // Owner name entering the signed data: for a wildcard expansion the
        // RRSIG labels count is smaller than the owner's; the signed name
        // is then `*.` plus the rightmost `labels` labels.
        let owner = rrset[0].name();
        let owner_labels = owner.num_labels();
        let signed_owner = if rrsig.labels < owner_labels {
            let trimmed = owner.trim_to(rrsig.labels as usize);
            let mut wire = vec![1u8, b'*'];
            wire.extend_from_slice(&name_to_canonical_wire(&trimmed));
            wire
        } else {
            name_to_canonical_wire(owner)
        };

        let mut rdatas: Vec<Vec<u8>> = rrset
            .iter()
            .map(|r| self.canonical_rdata(r))
            .collect::<Result<_, _>>()?;
        rdatas.sort();

        for rdata in rdatas {
            data.extend_from_slice(&signed_owner);
            data.extend_from_slice(&u16::from(rrsig.type_covered).to_be_bytes());
            data.extend_from_slice(&u16::from(DNSClass::IN).to_be_bytes());
            data.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
            data.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&rdata);
        }

        Ok(data)
    }

    /// RDATA in canonical form: embedded names lowercased, no compression.
    fn canonical_rdata(&self, record: &Record) -> Result<Vec<u8>, DomainError> {
        let mut buf = Vec::with_capacity(64);
        let mut encoder = BinEncoder::new(&mut buf);
        encoder.set_canonical_form(true);
        record
            .data()
            .emit(&mut encoder)
            .map_err(|e| DomainError::InvalidDnsResponse(format!("RDATA encode failed: {e}")))?;
        Ok(buf)
    }

    fn verify_rsa(
        &self,
        data: &[u8],
        sig: &[u8],
        dnskey: &DnskeyRecord,
        params: &'static signature::RsaParameters,
    ) -> Result<bool, DomainError> {
        let (exponent, modulus) = self.parse_rsa_key(&dnskey.public_key)?;
        let public_key = signature::RsaPublicKeyComponents {
            n: &modulus,
            e: &exponent,
        };
        Ok(public_key.verify(params, data, sig).is_ok())
    }

    fn verify_ecdsa(
        &self,
        data: &[u8],
        sig: &[u8],
        dnskey: &DnskeyRecord,
        params: &'static signature::EcdsaVerificationAlgorithm,
        key_len: usize,
    ) -> Result<bool, DomainError> {
        // DNSKEY carries the raw X||Y point; ring wants the uncompressed
        // SEC1 form with the 0x04 prefix.
        if dnskey.public_key.len() != key_len {
            return Err(DomainError::InvalidDnsResponse(
                "Invalid ECDSA public key length".into(),
            ));
        }
        if sig.len() != key_len {
            return Ok(false);
        }
        let mut uncompressed = Vec::with_capacity(key_len + 1);
        uncompressed.push(0x04);
        uncompressed.extend_from_slice(&dnskey.public_key);

        let public_key = signature::UnparsedPublicKey::new(params, uncompressed);
        Ok(public_key.verify(data, sig).is_ok())
    }

    fn verify_ed25519(
        &self,
        data: &[u8],
        sig: &[u8],
        dnskey: &DnskeyRecord,
    ) -> Result<bool, DomainError> {
        if dnskey.public_key.len() != 32 {
            return Err(DomainError::InvalidDnsResponse(
                "Invalid Ed25519 public key length".into(),
            ));
        }
        if sig.len() != 64 {
            return Ok(false);
        }
        let public_key =
            signature::UnparsedPublicKey::new(&signature::ED25519, &dnskey.public_key);
        Ok(public_key.verify(data, sig).is_ok())
    }

    /// RSA public key in DNSKEY format: exponent length (1 or 3 bytes),
    /// exponent, modulus.
    fn parse_rsa_key(&self, key_data: &[u8]) -> Result<(Vec<u8>, Vec<u8>), DomainError> {
        if key_data.is_empty() {
            return Err(DomainError::InvalidDnsResponse(
                "Empty RSA public key".into(),
            ));
        }

        let first = key_data[0];
        let (exp_len, exp_start) = if first == 0 {
            if key_data.len() < 3 {
                return Err(DomainError::InvalidDnsResponse(
                    "RSA key too short for long form".into(),
                ));
            }
            (
                u16::from_be_bytes([key_data[1], key_data[2]]) as usize,
                3usize,
            )
        } else {
            (first as usize, 1usize)
        };

        let exp_end = exp_start + exp_len;
        if exp_end >= key_data.len() {
            return Err(DomainError::InvalidDnsResponse(
                "RSA exponent extends beyond key data".into(),
            ));
        }

        Ok((
            key_data[exp_start..exp_end].to_vec(),
            key_data[exp_end..].to_vec(),
        ))
    }

    fn is_time_valid(&self, rrsig: &RrsigRecord) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        // Serial-number arithmetic is overkill here; the window is short
        // relative to the u32 wrap.
        now >= rrsig.signature_inception && now <= rrsig.signature_expiration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{RData, RecordType};
    use std::str::FromStr;

    fn test_rrsig(labels: u8, key_tag: u16, algorithm: u8) -> RrsigRecord {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        RrsigRecord {
            type_covered: RecordType::A,
            algorithm,
            labels,
            original_ttl: 300,
            signature_expiration: now + 3600,
            signature_inception: now - 3600,
            key_tag,
            signer_name: Name::from_str("example.com.").unwrap(),
            signature: vec![0u8; 64],
        }
    }

    fn test_key() -> DnskeyRecord {
        DnskeyRecord {
            flags: 256,
            protocol: 3,
            algorithm: 13,
            public_key: vec![0x11; 64],
        }
    }

    #[test]
    fn mismatched_key_tag_fails_fast() {
        let verifier = SignatureVerifier;
        let key = test_key();
        let rrsig = test_rrsig(2, key.key_tag().wrapping_add(1), 13);
        let rrset = vec![Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::A(A::new(192, 0, 2, 1)),
        )];
        assert_eq!(verifier.verify_rrsig(&rrsig, &key, &rrset).unwrap(), false);
    }

    #[test]
    fn expired_signature_fails() {
        let verifier = SignatureVerifier;
        let key = test_key();
        let mut rrsig = test_rrsig(2, key.key_tag(), 13);
        rrsig.signature_expiration = rrsig.signature_inception;
        let rrset = vec![Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::A(A::new(192, 0, 2, 1)),
        )];
        assert_eq!(verifier.verify_rrsig(&rrsig, &key, &rrset).unwrap(), false);
    }

    #[test]
    fn unsupported_algorithm_is_an_error() {
        let verifier = SignatureVerifier;
        let mut key = test_key();
        key.algorithm = 3;
        let rrsig = test_rrsig(2, key.key_tag(), 3);
        let rrset = vec![Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::A(A::new(192, 0, 2, 1)),
        )];
        assert!(verifier.verify_rrsig(&rrsig, &key, &rrset).is_err());
    }

    #[test]
    fn garbage_ecdsa_signature_does_not_verify() {
        let verifier = SignatureVerifier;
        let key = test_key();
        let rrsig = test_rrsig(2, key.key_tag(), 13);
        let rrset = vec![Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::A(A::new(192, 0, 2, 1)),
        )];
        assert_eq!(verifier.verify_rrsig(&rrsig, &key, &rrset).unwrap(), false);
    }

    #[test]
    fn ds_digest_sha256_round_trip() {
        let verifier = SignatureVerifier;
        let key = test_key();
        let owner = Name::from_str("example.com.").unwrap();

        let mut data = name_to_canonical_wire(&owner);
        data.extend_from_slice(&key.wire());
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let digest = hasher.finalize().to_vec();

        let ds = DsRecord {
            key_tag: key.key_tag(),
            algorithm: key.algorithm,
            digest_type: 2,
            digest,
        };
        assert!(verifier.verify_ds(&ds, &key, &owner).unwrap());

        let mut wrong = ds.clone();
        wrong.digest[0] ^= 0xFF;
        assert!(!verifier.verify_ds(&wrong, &key, &owner).unwrap());
    }
}
