//! Migration files on disk.
//!
//! A migration is a `<digits>_<slug>.sql` file. Files are applied in file-name
//! order, so the numeric prefix is normally a `YYYYMMDDHHMMSS` timestamp.

use crate::error::{DbError, DbResult};
use crate::models::MigrationFile;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

pub const MIGRATION_EXTENSION: &str = ".sql";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Return the numeric prefix if `file_name` is a migration file name.
pub fn parse_migration_name(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_suffix(MIGRATION_EXTENSION)?;
    let (timestamp, slug) = stem.split_once('_')?;
    if timestamp.is_empty() || slug.is_empty() {
        return None;
    }
    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(timestamp)
}

/// List migration files in `dir`, sorted by file name.
///
/// Non-matching files are skipped with a warning. The caller handles a
/// missing directory.
pub async fn discover(dir: &Path) -> DbResult<Vec<MigrationFile>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| DbError::io(format!("reading {}", dir.display()), e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DbError::io(format!("reading {}", dir.display()), e))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| DbError::io(format!("inspecting {}", path.display()), e))?;
        if !file_type.is_file() {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Skipping migration file with non UTF-8 name");
            continue;
        };
        match parse_migration_name(file_name) {
            Some(timestamp) => files.push(MigrationFile {
                version: file_name.to_string(),
                timestamp: timestamp.to_string(),
                path: path.clone(),
            }),
            None => warn!(
                file = file_name,
                "Skipping file that is not named <digits>_<name>.sql"
            ),
        }
    }

    files.sort_by(|a, b| a.version.cmp(&b.version));
    debug!(count = files.len(), dir = %dir.display(), "Discovered migration files");
    Ok(files)
}

/// Lowercase `name`, collapsing every run of non-alphanumerics into one `_`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// `<YYYYMMDDHHMMSS>_<slug>.sql` for a migration created at `now`.
pub fn migration_file_name(now: DateTime<Utc>, name: &str) -> DbResult<String> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(DbError::config(format!(
            "Migration name '{}' has no letters or digits",
            name
        )));
    }
    Ok(format!(
        "{}_{}{}",
        now.format(TIMESTAMP_FORMAT),
        slug,
        MIGRATION_EXTENSION
    ))
}

/// Initial contents of a new migration file.
pub fn template(name: &str, now: DateTime<Utc>) -> String {
    format!(
        "-- Migration: {}\n-- Created: {}\n--\n-- Runs inside a transaction together with its schema_migrations record.\n\n",
        name.trim(),
        now.to_rfc3339()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_migration_name() {
        assert_eq!(
            parse_migration_name("20250101000000_create_plans.sql"),
            Some("20250101000000")
        );
        assert_eq!(parse_migration_name("001_init.sql"), Some("001"));
        assert_eq!(parse_migration_name("README.md"), None);
        assert_eq!(parse_migration_name("init.sql"), None);
        assert_eq!(parse_migration_name("v1_init.sql"), None);
        assert_eq!(parse_migration_name("001_.sql"), None);
        assert_eq!(parse_migration_name("_init.sql"), None);
        assert_eq!(parse_migration_name("001_init.sql.bak"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add resume scores"), "add_resume_scores");
        assert_eq!(slugify("  users: add--role!! "), "users_add_role");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_migration_file_name() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            migration_file_name(now, "Add index").unwrap(),
            "20250309140507_add_index.sql"
        );
        assert!(migration_file_name(now, "!!!").is_err());
    }

    #[test]
    fn test_template_has_header() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        let body = template("add index", now);
        assert!(body.starts_with("-- Migration: add index"));
        assert!(body.contains("2025-03-09"));
    }

    #[tokio::test]
    async fn test_discover_sorts_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "20250102000000_second.sql",
            "20250101000000_first.sql",
            "notes.txt",
            "draft.sql",
        ] {
            std::fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        std::fs::create_dir(dir.path().join("20250103000000_dir.sql")).unwrap();

        let files = discover(dir.path()).await.unwrap();
        let versions: Vec<_> = files.iter().map(|f| f.version.as_str()).collect();
        assert_eq!(
            versions,
            vec!["20250101000000_first.sql", "20250102000000_second.sql"]
        );
        assert_eq!(files[0].timestamp, "20250101000000");
    }
}
