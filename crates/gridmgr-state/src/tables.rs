//! redb table definitions for the GridMgr state store.
//!
//! Hosts and regions use `&str` keys (host address, region UUID in
//! string form); jobs use their monotonic `u64` id. All values are
//! JSON-serialized domain types.

use redb::TableDefinition;

/// Host records keyed by network address.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Region records keyed by UUID string.
pub const REGIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("regions");

/// Job records keyed by monotonic id.
pub const JOBS: TableDefinition<u64, &[u8]> = TableDefinition::new("jobs");
