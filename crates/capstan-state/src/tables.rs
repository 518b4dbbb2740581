//! redb table definitions for the Capstan state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Deployment records keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Local scheduler instances keyed by `{app_id}:{version}:{index:06}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
