//! Embedded single-file migrations.
//!
//! All migrations live in one sql file that is compiled into the binary.
//! A header comment starts each migration:
//!
//! ```sql
//! --##1 initial schema
//! ```
//!
//! The number is the migration version, the rest of the line its
//! description. Versions must increase by one per migration.
use std::{borrow::Cow, future::Future, pin::Pin};

use sqlx::{
    error::BoxDynError,
    migrate::{Migration, MigrationSource, MigrationType},
};

#[derive(Debug)]
pub struct MigrationScript<'s> {
    data: &'s str,
}

impl<'s> MigrationSource<'s> for MigrationScript<'s> {
    fn resolve(self) -> Pin<Box<dyn Future<Output = Result<Vec<Migration>, BoxDynError>> + Send + 's>> {
        Box::pin(async move {
            let mut migrations: Vec<Migration> = Vec::new();

            for line in self.data.lines() {
                if line.trim().is_empty() {
                    continue;
                }

                if let Some(header) = line.strip_prefix("--##") {
                    let (version, description) = match header.split_once(' ') {
                        Some((v, d)) => (v, d),
                        None => (header, ""),
                    };
                    let version = version.parse().map_err(|e| {
                        format!("invalid migration version '{version}': {e}")
                    })?;
                    migrations.push(Migration::new(
                        version,
                        Cow::Owned(description.to_string()),
                        MigrationType::Simple,
                        Cow::Owned(String::new()),
                    ));
                    continue;
                }

                match migrations.last_mut() {
                    Some(migration) => {
                        migration.sql.to_mut().push_str(line);
                        migration.sql.to_mut().push('\n');
                    }
                    None => {
                        // allow comments before the first header
                        if !line.starts_with("--") {
                            Err(format!(
                                "sql before the first migration header: {line}"
                            ))?
                        }
                    }
                }
            }

            Ok(migrations)
        })
    }
}

pub fn postgresql_migrations() -> MigrationScript<'static> {
    MigrationScript {
        data: include_str!("./sql/migrations.pg.sql"),
    }
}
