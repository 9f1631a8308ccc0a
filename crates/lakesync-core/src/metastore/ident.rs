//! Identifier validation.
//!
//! External metastores fold identifiers to lower case, so an upper-case
//! database, table, or field name would silently collide after the fold.
//! Validation rejects them up front, before any metastore call.

use crate::error::CatalogError;

fn has_upper_case(name: &str) -> bool {
    name.chars().any(char::is_uppercase)
}

pub fn validate_database_name(name: &str) -> Result<(), CatalogError> {
    if has_upper_case(name) {
        return Err(CatalogError::InvalidIdentifier {
            kind: "Database",
            name: name.to_string(),
        });
    }
    Ok(())
}

pub fn validate_table_name(name: &str) -> Result<(), CatalogError> {
    if has_upper_case(name) {
        return Err(CatalogError::InvalidIdentifier {
            kind: "Table",
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Validate a set of field names, reporting all offenders at once.
pub fn validate_field_names<'a, I>(names: I) -> Result<(), CatalogError>
where
    I: IntoIterator<Item = &'a str>,
{
    let offenders: Vec<&str> = names.into_iter().filter(|n| has_upper_case(n)).collect();
    if offenders.is_empty() {
        return Ok(());
    }
    Err(CatalogError::InvalidIdentifier {
        kind: "Field",
        name: offenders.join(", "),
    })
}
