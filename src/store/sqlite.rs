use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::EntityStore;
use crate::model::{
    EntityAlias, EntityRecord, EntityStatement, EntitySummary, FactDocument, PropertyRef,
    QueryHit, StoreStats, fact_id,
};

pub const DB_SCHEMA_VERSION: &str = "1";

pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open database: {}", db_path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!(
                "database file missing: {}; run `wikifacts load` first",
                db_path.display()
            );
        }

        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open database read-only: {}", db_path.display()))?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn last_loaded_at(&self) -> Result<Option<DateTime<Utc>>> {
        let loaded_at = self
            .connection
            .query_row(
                "SELECT value FROM metadata WHERE key = 'last_loaded_at'",
                [],
                |row| row.get::<_, DateTime<Utc>>(0),
            )
            .optional()?;
        Ok(loaded_at)
    }

    fn entity_ids(&self) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT id FROM entities ORDER BY id ASC")?;
        let ids = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
              id TEXT PRIMARY KEY,
              label TEXT,
              description TEXT,
              type TEXT
            );

            CREATE TABLE IF NOT EXISTS aliases (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              entity_id TEXT NOT NULL,
              value TEXT NOT NULL,
              language TEXT,
              FOREIGN KEY(entity_id) REFERENCES entities(id)
            );

            CREATE TABLE IF NOT EXISTS properties (
              id TEXT PRIMARY KEY,
              label TEXT
            );

            CREATE TABLE IF NOT EXISTS statements (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              entity_id TEXT NOT NULL,
              property_id TEXT NOT NULL,
              value TEXT,
              entity_value_id TEXT,
              FOREIGN KEY(entity_id) REFERENCES entities(id),
              FOREIGN KEY(property_id) REFERENCES properties(id)
            );

            CREATE INDEX IF NOT EXISTS idx_aliases_entity ON aliases(entity_id);
            CREATE INDEX IF NOT EXISTS idx_statements_entity ON statements(entity_id);
            CREATE INDEX IF NOT EXISTS idx_statements_property ON statements(property_id);
            ",
        )
        .context("failed to initialize entity schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;

    Ok(())
}

fn like_contains(term: &str) -> String {
    let escaped = term
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

impl EntityStore for SqliteStore {
    fn store_kind(&self) -> &'static str {
        "sqlite"
    }

    fn store_entities(&mut self, entities: &[EntityRecord]) -> Result<usize> {
        let tx = self.connection.transaction()?;

        {
            let mut upsert_entity = tx.prepare(
                "INSERT OR REPLACE INTO entities(id, label, description, type) VALUES(?1, ?2, ?3, ?4)",
            )?;
            let mut delete_aliases = tx.prepare("DELETE FROM aliases WHERE entity_id = ?1")?;
            let mut insert_alias =
                tx.prepare("INSERT INTO aliases(entity_id, value, language) VALUES(?1, ?2, ?3)")?;
            let mut delete_statements =
                tx.prepare("DELETE FROM statements WHERE entity_id = ?1")?;
            let mut upsert_property = tx.prepare(
                "
                INSERT INTO properties(id, label) VALUES(?1, ?2)
                ON CONFLICT(id) DO UPDATE SET
                  label=CASE WHEN excluded.label = '' THEN properties.label ELSE excluded.label END
                ",
            )?;
            let mut insert_statement = tx.prepare(
                "
                INSERT INTO statements(entity_id, property_id, value, entity_value_id)
                VALUES(?1, ?2, ?3, ?4)
                ",
            )?;

            for entity in entities {
                upsert_entity
                    .execute(params![
                        entity.entity_id,
                        entity.label,
                        entity.description,
                        entity.entity_type,
                    ])
                    .with_context(|| format!("failed to store entity {}", entity.entity_id))?;

                delete_aliases.execute([&entity.entity_id])?;
                for alias in &entity.aliases {
                    insert_alias.execute(params![entity.entity_id, alias.value, alias.language])?;
                }

                delete_statements.execute([&entity.entity_id])?;
                for statement in &entity.statements {
                    upsert_property.execute(params![
                        statement.property.property_id,
                        statement.property.label,
                    ])?;
                    insert_statement.execute(params![
                        entity.entity_id,
                        statement.property.property_id,
                        statement.value,
                        statement.entity_id,
                    ])?;
                }
            }
        }

        tx.execute(
            "INSERT INTO metadata(key, value) VALUES('last_loaded_at', ?1)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [Utc::now()],
        )?;
        tx.commit()?;

        Ok(entities.len())
    }

    fn get_entity(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        let entity = self
            .connection
            .query_row(
                "
                SELECT id, COALESCE(label, ''), COALESCE(description, ''), COALESCE(type, '')
                FROM entities
                WHERE id = ?1
                ",
                [entity_id],
                |row| {
                    Ok(EntityRecord {
                        entity_id: row.get(0)?,
                        label: row.get(1)?,
                        description: row.get(2)?,
                        entity_type: row.get(3)?,
                        aliases: Vec::new(),
                        statements: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut entity) = entity else {
            return Ok(None);
        };

        let mut alias_statement = self.connection.prepare(
            "SELECT value, COALESCE(language, '') FROM aliases WHERE entity_id = ?1 ORDER BY id ASC",
        )?;
        entity.aliases = alias_statement
            .query_map([entity_id], |row| {
                Ok(EntityAlias {
                    value: row.get(0)?,
                    language: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<EntityAlias>>>()?;

        let mut statement_query = self.connection.prepare(
            "
            SELECT s.property_id, COALESCE(p.label, ''), COALESCE(s.value, ''), s.entity_value_id
            FROM statements s
            LEFT JOIN properties p ON p.id = s.property_id
            WHERE s.entity_id = ?1
            ORDER BY s.id ASC
            ",
        )?;
        entity.statements = statement_query
            .query_map([entity_id], |row| {
                Ok(EntityStatement {
                    property: PropertyRef {
                        property_id: row.get(0)?,
                        label: row.get(1)?,
                    },
                    value: row.get(2)?,
                    entity_id: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<EntityStatement>>>()?;

        Ok(Some(entity))
    }

    fn search_entities(&self, keyword: &str, limit: usize) -> Result<Vec<EntitySummary>> {
        let mut statement = self.connection.prepare(
            "
            SELECT DISTINCT e.id, COALESCE(e.label, ''), COALESCE(e.description, '')
            FROM entities e
            LEFT JOIN aliases a ON a.entity_id = e.id
            WHERE
              lower(COALESCE(e.label, '')) LIKE ?1 ESCAPE '\\'
              OR lower(COALESCE(e.description, '')) LIKE ?1 ESCAPE '\\'
              OR lower(COALESCE(a.value, '')) LIKE ?1 ESCAPE '\\'
            ORDER BY e.id ASC
            LIMIT ?2
            ",
        )?;

        let results = statement
            .query_map(params![like_contains(keyword), limit as i64], |row| {
                Ok(EntitySummary {
                    entity_id: row.get(0)?,
                    label: row.get(1)?,
                    description: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<EntitySummary>>>()?;
        Ok(results)
    }

    fn find_facts(&self, subject: &str, property_id: &str, limit: usize) -> Result<Vec<QueryHit>> {
        let mut statement = self.connection.prepare(
            "
            SELECT e.id, COALESCE(e.label, ''), s.property_id, COALESCE(s.value, '')
            FROM statements s
            JOIN entities e ON e.id = s.entity_id
            WHERE
              s.property_id = ?2
              AND (
                lower(COALESCE(e.label, '')) LIKE ?1 ESCAPE '\\'
                OR EXISTS (
                  SELECT 1 FROM aliases a
                  WHERE a.entity_id = e.id AND lower(a.value) LIKE ?1 ESCAPE '\\'
                )
              )
            ORDER BY
              CASE WHEN lower(COALESCE(e.label, '')) = lower(?3) THEN 0 ELSE 1 END,
              e.id ASC,
              s.id ASC
            LIMIT ?4
            ",
        )?;

        let hits = statement
            .query_map(
                params![like_contains(subject), property_id, subject.trim(), limit as i64],
                |row| {
                    let entity_id: String = row.get(0)?;
                    let property_id: String = row.get(2)?;
                    Ok(QueryHit {
                        item_id: fact_id(&entity_id, &property_id),
                        entity_id,
                        label: row.get(1)?,
                        value: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<QueryHit>>>()?;
        Ok(hits)
    }

    fn fact_documents(&self) -> Result<Vec<FactDocument>> {
        let mut documents = Vec::<FactDocument>::new();
        for entity_id in self.entity_ids()? {
            let Some(entity) = self.get_entity(&entity_id)? else {
                continue;
            };
            for statement in &entity.statements {
                documents.push(FactDocument::from_statement(&entity, statement));
            }
        }
        Ok(documents)
    }

    fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<usize> {
            let value: i64 = self
                .connection
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("failed to run count query: {sql}"))?;
            Ok(value.max(0) as usize)
        };

        Ok(StoreStats {
            entities_count: count("SELECT COUNT(*) FROM entities")?,
            properties_count: count("SELECT COUNT(*) FROM properties")?,
            statements_count: count("SELECT COUNT(*) FROM statements")?,
        })
    }
}
