// DNSSEC validation glue: trust anchors, chain-of-trust key validation,
// per-RRset signature checking and NSEC/NSEC3 denial proofs. The resolver
// drives key acquisition; everything here is synchronous crypto.

pub mod crypto;
pub mod nsec;
pub mod trust_anchor;
pub mod types;
pub mod validator;

pub use crypto::SignatureVerifier;
pub use trust_anchor::{TrustAnchor, TrustAnchorStore};
pub use types::{DnskeyRecord, DnssecStatus, DsRecord, RrsigRecord};
pub use validator::{KeyRing, ResponseValidator, ValidationOutcome};
