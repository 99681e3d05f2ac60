//! Field-list repair for schema documents
//!
//! Published interface descriptions can list events and accounts by name and
//! discriminator only, with the actual layout living in the `types` section.
//! [`resolve`] copies each matching struct's field list onto the declaration.
//! Declarations with no matching struct are left untouched so that decoding
//! them fails with `SchemaMissing` instead of guessing a layout.

use std::collections::HashMap;

use super::{Field, RecordDecl, SchemaDocument, TypeBody};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolveReport {
    /// Declarations whose field list was (re)filled from `types`.
    pub patched: Vec<String>,
    /// Declarations that still have no field list.
    pub unresolved: Vec<String>,
}

/// Idempotent: a second pass produces the same document.
pub fn resolve(doc: &mut SchemaDocument) -> ResolveReport {
    let structs: HashMap<&str, &Vec<Field>> = doc
        .types
        .iter()
        .filter_map(|decl| match &decl.body {
            TypeBody::Struct { fields } => Some((decl.name.as_str(), fields)),
            _ => None,
        })
        .collect();

    let mut report = ResolveReport::default();
    for decl in doc.events.iter_mut().chain(doc.accounts.iter_mut()) {
        patch(decl, &structs, &mut report);
    }
    report
}

fn patch(decl: &mut RecordDecl, structs: &HashMap<&str, &Vec<Field>>, report: &mut ResolveReport) {
    match structs.get(decl.name.as_str()) {
        Some(fields) => {
            decl.fields = Some((*fields).clone());
            report.patched.push(decl.name.clone());
        }
        None if decl.fields.is_none() => report.unresolved.push(decl.name.clone()),
        None => {}
    }
}
