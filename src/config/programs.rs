use std::path::PathBuf;

use super::{ConfigError, Lookup};
use crate::models::Pubkey;

const DEFAULT_ROUTER_IDL_PATH: &str = "target/idl/coolrouter.json";

/// A monitored program and the schema document describing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramEntry {
    pub program_id: Pubkey,
    pub idl_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramsConfig {
    pub router: ProgramEntry,
    pub consumer: Option<ProgramEntry>,
}

impl ProgramsConfig {
    pub(super) fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let router = ProgramEntry {
            program_id: parse_program(lookup, "ROUTER_PROGRAM_ID")?
                .ok_or(ConfigError::Missing("ROUTER_PROGRAM_ID"))?,
            idl_path: lookup("ROUTER_IDL_PATH")
                .unwrap_or_else(|| DEFAULT_ROUTER_IDL_PATH.to_string())
                .into(),
        };

        let consumer = match parse_program(lookup, "CONSUMER_PROGRAM_ID")? {
            Some(program_id) => Some(ProgramEntry {
                program_id,
                idl_path: lookup("CONSUMER_IDL_PATH")
                    .ok_or(ConfigError::Missing("CONSUMER_IDL_PATH"))?
                    .into(),
            }),
            None => None,
        };

        Ok(Self { router, consumer })
    }

    pub fn monitored_programs(&self) -> Vec<&ProgramEntry> {
        let mut programs = vec![&self.router];
        if let Some(consumer) = &self.consumer {
            if consumer.program_id != self.router.program_id {
                programs.push(consumer);
            }
        }
        programs
    }
}

fn parse_program(lookup: &Lookup<'_>, key: &'static str) -> Result<Option<Pubkey>, ConfigError> {
    match lookup(key).filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| ConfigError::Invalid {
                key,
                reason: format!("{err}"),
            }),
        None => Ok(None),
    }
}
