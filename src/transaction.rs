//! Legacy-format ledger transactions, built and signed by hand
//!
//! Layout: compact-u16 signature count, 64-byte signatures, then the message:
//! a three-byte header, compact-u16 counted account keys, the 32-byte recent
//! blockhash and compact-u16 counted instructions. Account keys are ordered
//! writable signers (fee payer first), readonly signers, writable non-signers,
//! readonly non-signers.

use ed25519_dalek::{Signer, SigningKey};

use crate::error::{OracleError, Result};
use crate::models::Pubkey;

pub type Blockhash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    pub fn compile(payer: &Pubkey, instructions: &[Instruction], recent_blockhash: Blockhash) -> Result<Self> {
        let mut metas: Vec<AccountMeta> = vec![AccountMeta::writable(*payer, true)];
        let mut merge = |meta: AccountMeta| match metas.iter_mut().find(|m| m.pubkey == meta.pubkey) {
            Some(existing) => {
                existing.is_signer |= meta.is_signer;
                existing.is_writable |= meta.is_writable;
            }
            None => metas.push(meta),
        };
        for ix in instructions {
            for meta in &ix.accounts {
                merge(*meta);
            }
            merge(AccountMeta::readonly(ix.program_id, false));
        }

        let group = |signer: bool, writable: bool| {
            metas
                .iter()
                .filter(move |m| m.is_signer == signer && m.is_writable == writable)
                .map(|m| m.pubkey)
        };
        let account_keys: Vec<Pubkey> = group(true, true)
            .chain(group(true, false))
            .chain(group(false, true))
            .chain(group(false, false))
            .collect();

        if account_keys.len() > usize::from(u8::MAX) + 1 {
            return Err(OracleError::rejected(format!(
                "{} accounts exceed the per-transaction limit",
                account_keys.len()
            )));
        }

        let count = |signer: bool, writable: bool| {
            let count = group(signer, writable).count();
            u8::try_from(count)
                .map_err(|_| OracleError::rejected(format!("{count} accounts in one header group")))
        };
        let num_readonly_signed = count(true, false)?;
        let num_required_signatures = count(true, true)?
            .checked_add(num_readonly_signed)
            .ok_or_else(|| OracleError::rejected("too many signers for one transaction"))?;
        let num_readonly_unsigned = count(false, false)?;

        let index_of = |key: &Pubkey| -> u8 {
            // Every key was inserted above and the count is bounded by 256.
            account_keys.iter().position(|k| k == key).unwrap_or_default() as u8
        };
        let compiled = instructions
            .iter()
            .map(|ix| CompiledInstruction {
                program_id_index: index_of(&ix.program_id),
                accounts: ix.accounts.iter().map(|m| index_of(&m.pubkey)).collect(),
                data: ix.data.clone(),
            })
            .collect();

        Ok(Self {
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = vec![
            self.num_required_signatures,
            self.num_readonly_signed,
            self.num_readonly_unsigned,
        ];
        write_compact_len(&mut out, self.account_keys.len())?;
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(&self.recent_blockhash);
        write_compact_len(&mut out, self.instructions.len())?;
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            write_compact_len(&mut out, ix.accounts.len())?;
            out.extend_from_slice(&ix.accounts);
            write_compact_len(&mut out, ix.data.len())?;
            out.extend_from_slice(&ix.data);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub signatures: Vec<[u8; 64]>,
    pub message: Message,
}

impl Transaction {
    /// Signs `message` with every required signer, in key order.
    pub fn sign(message: Message, signers: &[&SigningKey]) -> Result<Self> {
        let payload = message.serialize()?;
        let required = usize::from(message.num_required_signatures);
        let signatures = message.account_keys[..required]
            .iter()
            .map(|key| {
                signers
                    .iter()
                    .find(|signer| signer.verifying_key().to_bytes() == key.to_bytes())
                    .map(|signer| signer.sign(&payload).to_bytes())
                    .ok_or_else(|| OracleError::rejected(format!("missing signer for {key}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { signatures, message })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_compact_len(&mut out, self.signatures.len())?;
        for signature in &self.signatures {
            out.extend_from_slice(signature);
        }
        out.extend_from_slice(&self.message.serialize()?);
        Ok(out)
    }

    /// Base58 of the fee payer's signature, the transaction's identifier.
    pub fn id(&self) -> String {
        self.signatures
            .first()
            .map(|signature| bs58::encode(signature).into_string())
            .unwrap_or_default()
    }
}

fn write_compact_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let mut value = u16::try_from(len)
        .map_err(|_| OracleError::rejected(format!("length {len} does not fit compact-u16")))?;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return Ok(());
        }
        out.push(byte | 0x80);
    }
}
