use std::sync::Arc;

use crate::codec::{Encoder, Value};
use crate::error::{OracleError, Result};
use crate::models::{Digest32, Pubkey, RequestAccount};
use crate::schema::{Field, FieldType, InstructionDef, Schema};
use crate::transaction::{AccountMeta, Instruction};

pub const SUBMIT_VOTE: &str = "submit_vote";
pub const FULFILL_REQUEST: &str = "fulfill_request";

/// Builds router instructions from the router's schema.
///
/// Argument bytes follow the schema's declared order; each argument is matched
/// to a value by name and type, never by position.
#[derive(Debug, Clone)]
pub struct InstructionBuilder {
    router: Pubkey,
    oracle: Pubkey,
    schema: Arc<Schema>,
}

impl InstructionBuilder {
    pub fn new(router: Pubkey, oracle: Pubkey, schema: Arc<Schema>) -> Self {
        Self {
            router,
            oracle,
            schema,
        }
    }

    pub fn router(&self) -> &Pubkey {
        &self.router
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn request_address(&self, request_id: &str) -> Result<Pubkey> {
        RequestAccount::address(request_id, &self.router).ok_or_else(|| {
            OracleError::rejected(format!("no derivable request address for `{request_id}`"))
        })
    }

    /// `submit_vote(request_id, response_hash)` with accounts
    /// `[request (w), oracle (w, s), system program]`.
    pub fn vote(&self, request_id: &str, digest: &Digest32) -> Result<Instruction> {
        let def = self.schema.instruction(SUBMIT_VOTE)?;
        let data = self.encode(def, |field| match &field.ty {
            FieldType::String if is_request_id(field) => Ok(Value::String(request_id.to_string())),
            FieldType::Array(inner, 32) if **inner == FieldType::U8 => Ok(Value::Bytes(digest.to_vec())),
            FieldType::Bytes => Ok(Value::Bytes(digest.to_vec())),
            other => Err(unsupported(def, field, other)),
        })?;

        Ok(Instruction {
            program_id: self.router,
            accounts: vec![
                AccountMeta::writable(self.request_address(request_id)?, false),
                AccountMeta::writable(self.oracle, true),
                AccountMeta::readonly(Pubkey::system_program(), false),
            ],
            data,
        })
    }

    /// `fulfill_request(response)` with accounts `[request (w), oracle (w, s),
    /// caller program]` followed by the request's callback accounts in
    /// recorded order.
    pub fn fulfill(&self, request: &RequestAccount, answer: &str) -> Result<Instruction> {
        let def = self.schema.instruction(FULFILL_REQUEST)?;
        let data = self.encode(def, |field| match &field.ty {
            FieldType::String if is_request_id(field) => Ok(Value::String(request.id.clone())),
            FieldType::String => Ok(Value::String(answer.to_string())),
            FieldType::Bytes => Ok(Value::Bytes(answer.as_bytes().to_vec())),
            other => Err(unsupported(def, field, other)),
        })?;

        let mut accounts = vec![
            AccountMeta::writable(self.request_address(&request.id)?, false),
            AccountMeta::writable(self.oracle, true),
            AccountMeta::readonly(request.caller_program, false),
        ];
        accounts.extend(request.callbacks.iter().map(|callback| {
            if callback.writable {
                AccountMeta::writable(callback.pubkey, false)
            } else {
                AccountMeta::readonly(callback.pubkey, false)
            }
        }));

        Ok(Instruction {
            program_id: self.router,
            accounts,
            data,
        })
    }

    fn encode(
        &self,
        def: &InstructionDef,
        mut value_for: impl FnMut(&Field) -> Result<Value>,
    ) -> Result<Vec<u8>> {
        let mut encoder = Encoder::new();
        encoder.write_raw(&def.discriminator);
        for field in &def.args {
            let value = value_for(field)?;
            encoder.write_value(&field.ty, &value, self.schema.types())?;
        }
        Ok(encoder.into_inner())
    }
}

fn is_request_id(field: &Field) -> bool {
    field.name.replace('_', "").eq_ignore_ascii_case("requestid")
}

fn unsupported(def: &InstructionDef, field: &Field, ty: &FieldType) -> OracleError {
    OracleError::Schema(format!(
        "`{}` argument `{}` has unsupported type {ty}",
        def.name, field.name
    ))
}
