//! 32-byte ledger identifiers and derived addresses

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::VerifyingKey;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";
const MAX_SEED_LEN: usize = 32;

/// Base58-rendered 32-byte public identifier.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey(pub [u8; 32]);

impl Pubkey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The system program (all zero bytes).
    pub const fn system_program() -> Self {
        Self([0u8; 32])
    }

    pub fn is_on_curve(&self) -> bool {
        VerifyingKey::from_bytes(&self.0).is_ok()
    }

    pub fn create_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Option<Pubkey> {
        if seeds.iter().any(|seed| seed.len() > MAX_SEED_LEN) {
            return None;
        }

        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update(program_id.as_bytes());
        hasher.update(PDA_MARKER);
        let candidate = Pubkey(hasher.finalize().into());

        if candidate.is_on_curve() {
            None
        } else {
            Some(candidate)
        }
    }

    /// Searches bumps from 255 down for the first off-curve address.
    pub fn find_program_address(seeds: &[&[u8]], program_id: &Pubkey) -> Option<(Pubkey, u8)> {
        (0..=u8::MAX).rev().find_map(|bump| {
            let bump_seed = [bump];
            let mut with_bump: Vec<&[u8]> = seeds.to_vec();
            with_bump.push(&bump_seed);
            Self::create_program_address(&with_bump, program_id).map(|address| (address, bump))
        })
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsePubkeyError {
    #[error("invalid base58: {0}")]
    Encoding(String),
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Pubkey {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|err| ParsePubkeyError::Encoding(err.to_string()))?;
        let len = bytes.len();
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParsePubkeyError::Length(len))?;
        Ok(Self(array))
    }
}

impl From<[u8; 32]> for Pubkey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
