//! redb table definitions.
//!
//! All tables use `&str` keys and `&[u8]` values (JSON-serialized
//! entities). `RELEASE_INDEX` maps `{app}:{lane}` to the release UUID and
//! backs the composite unique constraint.

use redb::TableDefinition;

/// Apps keyed by name.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// Image repos keyed by name.
pub const IMAGE_REPOS: TableDefinition<&str, &[u8]> = TableDefinition::new("image_repos");

/// Lanes keyed by name.
pub const LANES: TableDefinition<&str, &[u8]> = TableDefinition::new("lanes");

/// Builds keyed by UUID.
pub const BUILDS: TableDefinition<&str, &[u8]> = TableDefinition::new("builds");

/// Releases keyed by UUID.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Release UUID keyed by `{app}:{lane}`.
pub const RELEASE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("release_index");
