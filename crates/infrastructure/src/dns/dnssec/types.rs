use crate::dns::cache::record::rdata_wire;
use boreal_dns_domain::DomainError;
use hickory_proto::rr::{Name, Record, RecordType};
use std::fmt;
use std::str::FromStr;

/// DNSSEC validation status attached to records and resolutions.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DnssecStatus {
    #[default]
    Unknown = 0,
    /// Validation was not requested.
    Disabled = 1,
    /// Chain of trust verified down to this data.
    Secure = 2,
    /// Provenly unsigned delegation.
    Insecure = 3,
    /// Signature or proof present but invalid.
    Bogus = 4,
    /// Could not be determined (missing signatures outside fatal sections).
    Indeterminate = 5,
}

impl DnssecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Disabled => "Disabled",
            Self::Secure => "Secure",
            Self::Insecure => "Insecure",
            Self::Bogus => "Bogus",
            Self::Indeterminate => "Indeterminate",
        }
    }
}

impl fmt::Display for DnssecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DNSKEY RDATA view parsed from wire bytes.
///
/// Flags bit 7 is the Zone Key flag (required); bit 15 is the Secure Entry
/// Point flag distinguishing KSKs from ZSKs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnskeyRecord {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

impl DnskeyRecord {
    /// Parse from RDATA wire form: flags(2) protocol(1) algorithm(1) key.
    pub fn parse(data: &[u8]) -> Result<Self, DomainError> {
        if data.len() < 4 {
            return Err(DomainError::InvalidDnsResponse(
                "DNSKEY record too short".into(),
            ));
        }

        let flags = u16::from_be_bytes([data[0], data[1]]);
        let protocol = data[2];
        let algorithm = data[3];

        if protocol != 3 {
            return Err(DomainError::InvalidDnsResponse(format!(
                "Invalid DNSKEY protocol: {protocol} (expected 3)"
            )));
        }
        if flags & 0x0100 == 0 {
            return Err(DomainError::InvalidDnsResponse(
                "DNSKEY Zone Key flag not set".into(),
            ));
        }

        Ok(Self {
            flags,
            protocol,
            algorithm,
            public_key: data[4..].to_vec(),
        })
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        if record.record_type() != RecordType::DNSKEY {
            return None;
        }
        Self::parse(&rdata_wire(record)?).ok()
    }

    pub fn is_ksk(&self) -> bool {
        self.flags & 0x0001 != 0 // SEP flag
    }

    /// RDATA wire form, rebuilt for key-tag and DS digest computation.
    pub fn wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(4 + self.public_key.len());
        wire.extend_from_slice(&self.flags.to_be_bytes());
        wire.push(self.protocol);
        wire.push(self.algorithm);
        wire.extend_from_slice(&self.public_key);
        wire
    }

    /// Key tag per RFC 4034 Appendix B: 16-bit ones-complement-style sum
    /// over the RDATA wire form.
    pub fn key_tag(&self) -> u16 {
        let wire = self.wire();
        let mut accumulator: u32 = 0;
        for chunk in wire.chunks(2) {
            if chunk.len() == 2 {
                accumulator += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
            } else {
                accumulator += u32::from(chunk[0]) << 8;
            }
        }
        accumulator += accumulator >> 16;
        (accumulator & 0xFFFF) as u16
    }
}

/// DS RDATA view: the delegation-side digest of a child DNSKEY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

impl DsRecord {
    pub fn parse(data: &[u8]) -> Result<Self, DomainError> {
        if data.len() < 5 {
            return Err(DomainError::InvalidDnsResponse("DS record too short".into()));
        }
        Ok(Self {
            key_tag: u16::from_be_bytes([data[0], data[1]]),
            algorithm: data[2],
            digest_type: data[3],
            digest: data[4..].to_vec(),
        })
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        if record.record_type() != RecordType::DS {
            return None;
        }
        Self::parse(&rdata_wire(record)?).ok()
    }
}

/// RRSIG RDATA view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrsigRecord {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub signature_expiration: u32,
    pub signature_inception: u32,
    pub key_tag: u16,
    pub signer_name: Name,
    pub signature: Vec<u8>,
}

impl RrsigRecord {
    pub fn parse(data: &[u8]) -> Result<Self, DomainError> {
        if data.len() < 18 {
            return Err(DomainError::InvalidDnsResponse(
                "RRSIG record too short".into(),
            ));
        }

        let (signer_name, name_len) = read_uncompressed_name(&data[18..])?;
        Ok(Self {
            type_covered: RecordType::from(u16::from_be_bytes([data[0], data[1]])),
            algorithm: data[2],
            labels: data[3],
            original_ttl: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            signature_expiration: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            signature_inception: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            key_tag: u16::from_be_bytes([data[16], data[17]]),
            signer_name,
            signature: data[18 + name_len..].to_vec(),
        })
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        if record.record_type() != RecordType::RRSIG {
            return None;
        }
        Self::parse(&rdata_wire(record)?).ok()
    }

    /// RDATA wire prefix (everything before the signature), as it enters
    /// the signed data.
    pub fn signed_prefix(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(18 + 64);
        data.extend_from_slice(&u16::from(self.type_covered).to_be_bytes());
        data.push(self.algorithm);
        data.push(self.labels);
        data.extend_from_slice(&self.original_ttl.to_be_bytes());
        data.extend_from_slice(&self.signature_expiration.to_be_bytes());
        data.extend_from_slice(&self.signature_inception.to_be_bytes());
        data.extend_from_slice(&self.key_tag.to_be_bytes());
        data.extend_from_slice(&name_to_canonical_wire(&self.signer_name));
        data
    }
}

/// NSEC RDATA view: next owner name plus the type bitmap.
#[derive(Debug, Clone)]
pub struct NsecRecord {
    pub next_domain: Name,
    pub types: Vec<RecordType>,
}

impl NsecRecord {
    pub fn parse(data: &[u8]) -> Result<Self, DomainError> {
        let (next_domain, name_len) = read_uncompressed_name(data)?;
        let types = parse_type_bitmap(&data[name_len..]);
        Ok(Self { next_domain, types })
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        if record.record_type() != RecordType::NSEC {
            return None;
        }
        Self::parse(&rdata_wire(record)?).ok()
    }
}

/// NSEC3 RDATA view.
#[derive(Debug, Clone)]
pub struct Nsec3Record {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed: Vec<u8>,
    pub types: Vec<RecordType>,
}

impl Nsec3Record {
    pub fn parse(data: &[u8]) -> Result<Self, DomainError> {
        if data.len() < 5 {
            return Err(DomainError::InvalidDnsResponse(
                "NSEC3 record too short".into(),
            ));
        }
        let salt_len = data[4] as usize;
        let hash_off = 5 + salt_len;
        if data.len() < hash_off + 1 {
            return Err(DomainError::InvalidDnsResponse(
                "NSEC3 salt extends beyond record".into(),
            ));
        }
        let hash_len = data[hash_off] as usize;
        let types_off = hash_off + 1 + hash_len;
        if data.len() < types_off {
            return Err(DomainError::InvalidDnsResponse(
                "NSEC3 hash extends beyond record".into(),
            ));
        }

        Ok(Self {
            hash_algorithm: data[0],
            flags: data[1],
            iterations: u16::from_be_bytes([data[2], data[3]]),
            salt: data[5..hash_off].to_vec(),
            next_hashed: data[hash_off + 1..types_off].to_vec(),
            types: parse_type_bitmap(&data[types_off..]),
        })
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        if record.record_type() != RecordType::NSEC3 {
            return None;
        }
        Self::parse(&rdata_wire(record)?).ok()
    }
}

/// Read an uncompressed domain name from RDATA (compression pointers are
/// not legal inside DNSSEC RDATA). Returns the name and consumed length.
fn read_uncompressed_name(data: &[u8]) -> Result<(Name, usize), DomainError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = 0usize;

    loop {
        let Some(&len) = data.get(pos) else {
            return Err(DomainError::InvalidDnsResponse(
                "Name extends beyond record".into(),
            ));
        };
        if len & 0xC0 != 0 {
            return Err(DomainError::InvalidDnsResponse(
                "Compressed name inside RDATA".into(),
            ));
        }
        pos += 1;
        if len == 0 {
            break;
        }
        let end = pos + len as usize;
        if end > data.len() {
            return Err(DomainError::InvalidDnsResponse(
                "Label extends beyond record".into(),
            ));
        }
        labels.push(String::from_utf8_lossy(&data[pos..end]).into_owned());
        pos = end;
    }

    let mut text = labels.join(".");
    text.push('.');
    let name = Name::from_str(&text)
        .map_err(|e| DomainError::InvalidDnsResponse(format!("Bad name in RDATA: {e}")))?;
    Ok((name, pos))
}

/// Canonical (lowercase, uncompressed) wire form of a name.
pub fn name_to_canonical_wire(name: &Name) -> Vec<u8> {
    let mut wire = Vec::with_capacity(name.len() + 1);
    for label in name.iter() {
        wire.push(label.len() as u8);
        wire.extend(label.iter().map(u8::to_ascii_lowercase));
    }
    wire.push(0);
    wire
}

/// Parse an NSEC/NSEC3 type bitmap into record types.
fn parse_type_bitmap(mut data: &[u8]) -> Vec<RecordType> {
    let mut types = Vec::new();
    while data.len() >= 2 {
        let window = data[0] as u16;
        let len = data[1] as usize;
        if data.len() < 2 + len {
            break;
        }
        for (i, byte) in data[2..2 + len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    let value = window * 256 + (i as u16) * 8 + bit as u16;
                    types.push(RecordType::from(value));
                }
            }
        }
        data = &data[2 + len..];
    }
    types
}
