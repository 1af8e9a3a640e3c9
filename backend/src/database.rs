use std::{path::Path, sync::Mutex};

use anyhow::{Context, Result, bail};
use log::error;
use rusqlite::{Connection, Params, Statement, types::Null};
use serde::{Serialize, de::DeserializeOwned};

use crate::models::Settings;

const SETTINGS: &str = "settings";

pub trait Identifiable {
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);
}

#[macro_export]
macro_rules! impl_identifiable {
    ($type:ty) => {
        impl $crate::database::Identifiable for $type {
            fn id(&self) -> Option<i64> {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = Some(id);
            }
        }
    };
}

/// JSON documents stored one per row in SQLite tables.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens `local.db` next to the running executable.
    pub fn open_default() -> Result<Self> {
        let exe = std::env::current_exe()?;
        let Some(dir) = exe.parent() else {
            bail!("executable has no parent directory");
        };
        Self::open(dir.join("local.db"))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {SETTINGS} (
                id INTEGER PRIMARY KEY,
                data TEXT NOT NULL
            );
            "#
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Loads the settings row, inserting the defaults on first run.
    pub fn query_settings(&self) -> Result<Settings> {
        let mut settings = self
            .query_from_table::<Settings>(SETTINGS)?
            .into_iter()
            .next()
            .unwrap_or_default();
        if settings.id.is_none() {
            self.upsert_settings(&mut settings)?;
        }
        Ok(settings)
    }

    pub fn upsert_settings(&self, settings: &mut Settings) -> Result<()> {
        self.upsert_to_table(SETTINGS, settings)
    }

    fn query_from_table<T>(&self, table: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Identifiable + Default,
    {
        let conn = self.conn.lock().unwrap();
        let stmt = format!("SELECT id, data FROM {table};");
        let stmt = conn.prepare(&stmt)?;
        map_data(stmt, [])
    }

    fn upsert_to_table<T>(&self, table: &str, data: &mut T) -> Result<()>
    where
        T: Serialize + Identifiable,
    {
        let json = serde_json::to_string(&data)?;
        let conn = self.conn.lock().unwrap();
        let stmt = format!(
            "INSERT INTO {table} (id, data) VALUES (?1, ?2) ON CONFLICT (id) DO UPDATE SET data = ?2;",
        );
        match data.id() {
            Some(id) => {
                if conn.execute(&stmt, (id, &json))? > 0 {
                    Ok(())
                } else {
                    bail!("no row was updated")
                }
            }
            None => {
                if conn.execute(&stmt, (Null, &json))? > 0 {
                    data.set_id(conn.last_insert_rowid());
                    Ok(())
                } else {
                    bail!("no row was inserted")
                }
            }
        }
    }
}

fn map_data<T>(mut stmt: Statement<'_>, params: impl Params) -> Result<Vec<T>>
where
    T: DeserializeOwned + Identifiable + Default,
{
    Ok(stmt
        .query_map::<T, _, _>(params, |row| {
            let id = row.get::<_, i64>(0)?;
            let data = row.get::<_, String>(1)?;
            let mut value = serde_json::from_str::<'_, T>(data.as_str())
                .inspect_err(|err| error!(target: "database", "malformed row {id}: {err}"))
                .unwrap_or_default();
            value.set_id(id);
            Ok(value)
        })?
        .filter_map(|c| c.ok())
        .collect::<Vec<_>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::Line;

    #[test]
    fn query_settings_inserts_defaults_once() {
        let database = Database::open_in_memory().unwrap();

        let first = database.query_settings().unwrap();
        let second = database.query_settings().unwrap();

        assert_eq!(first.id, Some(1));
        assert_eq!(first, second);
    }

    #[test]
    fn upsert_settings_persists_changes() {
        let database = Database::open_in_memory().unwrap();
        let mut settings = database.query_settings().unwrap();
        settings.counting_enabled = true;
        settings.lines = vec![
            Line::horizontal(100.0, 640.0),
            Line::horizontal(300.0, 640.0),
        ];

        database.upsert_settings(&mut settings).unwrap();

        let loaded = database.query_settings().unwrap();
        assert!(loaded.counting_enabled);
        assert_eq!(loaded.lines, settings.lines);
    }

    #[test]
    fn malformed_row_loads_as_default() {
        let database = Database::open_in_memory().unwrap();
        database
            .conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO settings (id, data) VALUES (7, 'not json');",
                [],
            )
            .unwrap();

        let settings = database.query_settings().unwrap();

        assert_eq!(settings.id, Some(7));
        assert_eq!(settings.model_path, Settings::default().model_path);
    }
}
