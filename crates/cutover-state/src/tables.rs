//! redb table definitions for the deployment record store.

use redb::TableDefinition;

/// Deployment records keyed by `{service}/{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Deployment id → composite key in [`DEPLOYMENTS`].
pub const DEPLOYMENT_INDEX: TableDefinition<&str, &str> = TableDefinition::new("deployment_index");
