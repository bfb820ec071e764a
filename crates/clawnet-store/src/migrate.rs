//! Idempotent schema migrations for the events database.
//!
//! A `schemaVersion` key gates each up-migration: running the set twice is a
//! no-op, and a crash between steps re-runs only the missing ones.

use tracing::info;

use clawnet_core::error::ClawError;

use crate::kv::Kv;

const SCHEMA_VERSION_KEY: &[u8] = b"schemaVersion";

/// Schema version this build writes and expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

type Migration = fn(&dyn Kv) -> Result<(), ClawError>;

/// Ordered list of up-migrations; index i migrates version i → i+1.
const MIGRATIONS: [Migration; 1] = [migrate_v0_to_v1];

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`]. Returns the version
/// after migration.
pub fn run_migrations(kv: &dyn Kv) -> Result<u32, ClawError> {
    let mut version = schema_version(kv)?;
    while (version as usize) < MIGRATIONS.len() {
        MIGRATIONS[version as usize](kv)?;
        version += 1;
        kv.put(SCHEMA_VERSION_KEY, &version.to_be_bytes())?;
        info!(version, "schema migrated");
    }
    Ok(version)
}

/// Current schema version, 0 for a fresh database.
pub fn schema_version(kv: &dyn Kv) -> Result<u32, ClawError> {
    match kv.get(SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let arr: [u8; 4] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| ClawError::Serialization("schemaVersion has wrong length".into()))?;
            Ok(u32::from_be_bytes(arr))
        }
        None => Ok(0),
    }
}

/// v1: seed the log-length counter so a fresh database scans cleanly.
fn migrate_v0_to_v1(kv: &dyn Kv) -> Result<(), ClawError> {
    if kv.get(b"meta/logLength")?.is_none() {
        kv.put(b"meta/logLength", &0u64.to_be_bytes())?;
    }
    Ok(())
}
