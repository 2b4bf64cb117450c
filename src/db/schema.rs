//! Database schema and migrations for feedvault.
//!
//! Migrations are applied in order; the schema_version table records
//! which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: source registry and per-source item logs
    r#"
-- Registered feed sources (a set keyed by retrieval address)
CREATE TABLE sources (
    id          TEXT PRIMARY KEY,
    added_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Serialized items per source. Index 0 of a log is the row with the highest seq.
CREATE TABLE item_logs (
    source_id   TEXT NOT NULL,
    seq         INTEGER NOT NULL,
    payload     BLOB NOT NULL,
    PRIMARY KEY (source_id, seq)
);
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_not_empty() {
        assert!(!MIGRATIONS.is_empty());
    }

    #[test]
    fn test_first_migration_contains_tables() {
        let first = MIGRATIONS[0];
        assert!(first.contains("CREATE TABLE sources"));
        assert!(first.contains("CREATE TABLE item_logs"));
        assert!(first.contains("PRIMARY KEY (source_id, seq)"));
    }
}
