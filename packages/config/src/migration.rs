//! Versioned migrations over raw config tables.
//!
//! Each step is a pure function from one layout version to the next and is
//! registered in [`MIGRATIONS`] under its `(from, to)` pair. A document
//! without a `version` key is treated as version 1.

use toml::{Table, Value};

use crate::{CURRENT_VERSION, ConfigError};

/// A single migration step.
pub type Step = fn(Table) -> Result<Table, ConfigError>;

/// Registered steps keyed by `(from, to)`.
pub const MIGRATIONS: &[((i64, i64), Step)] = &[((1, 2), v1_to_v2)];

const VERSION_KEY: &str = "version";
const LEGACY_SITE_KEY: &str = "siteID";
const SITES_KEY: &str = "sites";

/// Layout version of `table`.
///
/// # Errors
///
/// Returns [`ConfigError::Migration`] if `version` is not an integer.
pub fn version_of(table: &Table) -> Result<i64, ConfigError> {
    match table.get(VERSION_KEY) {
        None => Ok(1),
        Some(Value::Integer(version)) => Ok(*version),
        Some(other) => Err(ConfigError::Migration(format!(
            "version must be an integer, got {}",
            other.type_str()
        ))),
    }
}

/// Brings `table` up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns [`ConfigError::Migration`] if the document is newer than this
/// build, no step is registered for an intermediate version, or a step
/// fails.
pub fn migrate(mut table: Table) -> Result<Table, ConfigError> {
    let mut version = version_of(&table)?;

    if version > CURRENT_VERSION {
        return Err(ConfigError::Migration(format!(
            "config version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    while version < CURRENT_VERSION {
        let Some(&((from, to), step)) = MIGRATIONS.iter().find(|((from, _), _)| *from == version)
        else {
            return Err(ConfigError::Migration(format!(
                "no migration registered from version {version}"
            )));
        };

        table = step(table)?;
        log::info!("Migrated config from version {from} to {to}");
        version = to;
    }

    Ok(table)
}

/// Folds the legacy `siteID` key (one id, or a list of ids) into `sites`.
fn v1_to_v2(mut table: Table) -> Result<Table, ConfigError> {
    let legacy: Vec<String> = match table.remove(LEGACY_SITE_KEY) {
        None => Vec::new(),
        Some(Value::String(id)) => vec![id],
        Some(Value::Array(ids)) => ids
            .into_iter()
            .map(|id| match id {
                Value::String(id) => Ok(id),
                other => Err(ConfigError::Migration(format!(
                    "{LEGACY_SITE_KEY} entries must be strings, got {}",
                    other.type_str()
                ))),
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(ConfigError::Migration(format!(
                "{LEGACY_SITE_KEY} must be a string, got {}",
                other.type_str()
            )));
        }
    };

    let mut sites = match table.remove(SITES_KEY) {
        None => Vec::new(),
        Some(Value::Array(sites)) => sites,
        Some(other) => {
            return Err(ConfigError::Migration(format!(
                "{SITES_KEY} must be a list, got {}",
                other.type_str()
            )));
        }
    };

    for id in legacy {
        let id = id.trim().to_owned();
        if !id.is_empty() && !sites.iter().any(|s| s.as_str() == Some(id.as_str())) {
            sites.push(Value::String(id));
        }
    }

    table.insert(SITES_KEY.to_owned(), Value::Array(sites));
    table.insert(VERSION_KEY.to_owned(), Value::Integer(2));
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> Table {
        text.parse().unwrap()
    }

    #[test]
    fn unversioned_site_id_becomes_sites_list() {
        let migrated = migrate(table("api_key = \"k\"\nsiteID = \"32\"")).unwrap();
        assert_eq!(migrated, table("api_key = \"k\"\nsites = [\"32\"]\nversion = 2"));
    }

    #[test]
    fn legacy_list_merges_without_duplicates() {
        let migrated =
            migrate(table("version = 1\nsites = [\"1\"]\nsiteID = [\"1\", \"12\", \" \"]")).unwrap();
        assert_eq!(migrated["sites"], table("s = [\"1\", \"12\"]")["s"]);
    }

    #[test]
    fn current_version_is_untouched() {
        let input = table("version = 2\nsites = [\"5\"]\nsiteID = \"ignored\"");
        assert_eq!(migrate(input.clone()).unwrap(), input);
    }

    #[test]
    fn newer_version_is_rejected() {
        assert!(matches!(
            migrate(table("version = 3")),
            Err(ConfigError::Migration(_))
        ));
    }

    #[test]
    fn unknown_old_version_is_rejected() {
        assert!(matches!(
            migrate(table("version = 0")),
            Err(ConfigError::Migration(_))
        ));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(version_of(&table("version = \"2\"")).is_err());
        assert!(v1_to_v2(table("siteID = 32")).is_err());
        assert!(v1_to_v2(table("siteID = [32]")).is_err());
        assert!(v1_to_v2(table("sites = \"1\"")).is_err());
    }

    #[test]
    fn every_step_advances_one_version() {
        for ((from, to), _) in MIGRATIONS {
            assert_eq!(*to, from + 1);
        }
        assert_eq!(MIGRATIONS.last().map(|((_, to), _)| *to), Some(CURRENT_VERSION));
    }
}
