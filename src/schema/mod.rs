//! Program interface descriptions
//!
//! A schema document is the JSON interface description published for an
//! on-chain program. Documents are loaded as-is, repaired by the
//! [`resolver`], and compiled into a [`Schema`] that the codec and the
//! dispatcher consume.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::codec::{Decoder, Record};
use crate::error::{OracleError, Result};
use crate::models::Pubkey;

pub mod resolver;
mod types;

pub use resolver::{resolve, ResolveReport};
pub use types::{Field, FieldType};

pub type Discriminator = [u8; 8];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub instructions: Vec<InstructionDecl>,
    #[serde(default)]
    pub accounts: Vec<RecordDecl>,
    #[serde(default)]
    pub events: Vec<RecordDecl>,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
}

/// A named event or account declaration. The field list may be absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordDecl {
    pub name: String,
    #[serde(default)]
    pub discriminator: Option<Discriminator>,
    #[serde(default)]
    pub fields: Option<Vec<Field>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstructionDecl {
    pub name: String,
    #[serde(default)]
    pub discriminator: Option<Discriminator>,
    #[serde(default)]
    pub args: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub body: TypeBody,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeBody {
    Struct {
        #[serde(default)]
        fields: Vec<Field>,
    },
    Enum {
        variants: Vec<VariantDecl>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariantDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Option<serde_json::Value>,
}

impl SchemaDocument {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| OracleError::Schema(err.to_string()))
    }
}

/// Named type available to `defined` field references.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Struct(Vec<Field>),
    /// Unit-only enum; the wire tag indexes the variant list.
    Enum(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
}

impl TypeRegistry {
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, def: TypeDef) {
        self.types.insert(name.into(), def);
    }
}

#[derive(Debug, Clone)]
pub struct RecordDef {
    pub name: String,
    pub discriminator: Discriminator,
    pub fields: Option<Vec<Field>>,
}

impl RecordDef {
    pub fn fields(&self) -> Result<&[Field]> {
        self.fields
            .as_deref()
            .ok_or_else(|| OracleError::SchemaMissing(self.name.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct InstructionDef {
    pub name: String,
    pub discriminator: Discriminator,
    pub args: Vec<Field>,
}

/// A resolved schema for one program
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub address: Option<Pubkey>,
    events: Vec<RecordDef>,
    accounts: HashMap<String, RecordDef>,
    instructions: HashMap<String, InstructionDef>,
    types: TypeRegistry,
}

impl Schema {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| OracleError::Schema(format!("{}: {err}", path.display())))?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("program")
            .to_string();
        Self::compile(name, SchemaDocument::from_json(&raw)?)
    }

    pub fn from_json(name: impl Into<String>, raw: &str) -> Result<Self> {
        Self::compile(name.into(), SchemaDocument::from_json(raw)?)
    }

    /// Repairs the document and builds the lookup tables.
    pub fn compile(name: String, mut doc: SchemaDocument) -> Result<Self> {
        let report = resolve(&mut doc);
        for missing in &report.unresolved {
            warn!(schema = %name, record = %missing, "no field list available; decoding will fail");
        }

        let address = match doc.address.as_deref() {
            Some(raw) => Some(
                raw.parse::<Pubkey>()
                    .map_err(|err| OracleError::Schema(format!("address `{raw}`: {err}")))?,
            ),
            None => None,
        };

        let mut types = TypeRegistry::default();
        for decl in &doc.types {
            match &decl.body {
                TypeBody::Struct { fields } => types.insert(&decl.name, TypeDef::Struct(fields.clone())),
                TypeBody::Enum { variants } => {
                    if variants.iter().any(|variant| variant.fields.is_some()) {
                        warn!(schema = %name, type_name = %decl.name, "enum variants with data are not decodable");
                        continue;
                    }
                    types.insert(
                        &decl.name,
                        TypeDef::Enum(variants.iter().map(|v| v.name.clone()).collect()),
                    );
                }
                TypeBody::Unsupported => {
                    warn!(schema = %name, type_name = %decl.name, "skipping unsupported type kind");
                }
            }
        }

        let events = doc
            .events
            .into_iter()
            .map(|decl| RecordDef {
                discriminator: decl
                    .discriminator
                    .unwrap_or_else(|| sighash("event", &decl.name)),
                name: decl.name,
                fields: decl.fields,
            })
            .collect();

        let accounts = doc
            .accounts
            .into_iter()
            .map(|decl| {
                let def = RecordDef {
                    discriminator: decl
                        .discriminator
                        .unwrap_or_else(|| sighash("account", &decl.name)),
                    name: decl.name.clone(),
                    fields: decl.fields,
                };
                (decl.name, def)
            })
            .collect();

        let instructions = doc
            .instructions
            .into_iter()
            .map(|decl| {
                let snake = to_snake_case(&decl.name);
                let def = InstructionDef {
                    discriminator: decl
                        .discriminator
                        .unwrap_or_else(|| sighash("global", &snake)),
                    name: snake.clone(),
                    args: decl.args,
                };
                (snake, def)
            })
            .collect();

        Ok(Self {
            name,
            address,
            events,
            accounts,
            instructions,
            types,
        })
    }

    pub fn events(&self) -> &[RecordDef] {
        &self.events
    }

    pub fn event(&self, name: &str) -> Option<&RecordDef> {
        self.events.iter().find(|event| event.name == name)
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn instruction(&self, name: &str) -> Result<&InstructionDef> {
        self.instructions
            .get(&to_snake_case(name))
            .ok_or_else(|| OracleError::SchemaMissing(name.to_string()))
    }

    /// Decodes an event body (discriminator already stripped).
    pub fn decode_event(&self, event: &RecordDef, body: &[u8]) -> Result<Record> {
        let fields = event.fields()?;
        Decoder::new(body).read_record(fields, &self.types)
    }

    /// Decodes raw account data, verifying its leading discriminator.
    pub fn decode_account(&self, name: &str, data: &[u8]) -> Result<Record> {
        let account = self
            .accounts
            .get(name)
            .ok_or_else(|| OracleError::SchemaMissing(name.to_string()))?;
        let fields = account.fields()?;

        let mut decoder = Decoder::new(data);
        let tag = decoder.read_fixed::<8>()?;
        if tag != account.discriminator {
            return Err(OracleError::Decode(format!(
                "account data is not a `{name}` (discriminator {})",
                hex::encode(tag)
            )));
        }
        decoder.read_record(fields, &self.types)
    }

    pub fn account_discriminator(&self, name: &str) -> Option<Discriminator> {
        self.accounts.get(name).map(|account| account.discriminator)
    }
}

/// First eight bytes of `sha256("<namespace>:<name>")`.
pub fn sighash(namespace: &str, name: &str) -> Discriminator {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
