// src/db/models/app.rs

//! Package to profile bindings

use crate::config::AppBinding;
use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

impl AppBinding {
    /// Store this binding, replacing any binding of the same package
    ///
    /// SQLite's UNIQUE lets several NULLs coexist, so the replacement is
    /// done with a null-safe `IS` comparison rather than `ON CONFLICT`.
    pub fn upsert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "DELETE FROM app WHERE package_name IS ?1",
            params![&self.package_name],
        )?;
        conn.execute(
            "INSERT INTO app (package_name, config_id) VALUES (?1, ?2)",
            params![&self.package_name, self.config_id],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Binding for `package_name`; `None` finds the fallback binding
    pub fn find_by_package_name(
        conn: &Connection,
        package_name: Option<&str>,
    ) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_name, config_id FROM app WHERE package_name IS ?1",
        )?;
        let binding = stmt.query_row([package_name], Self::from_row).optional()?;
        Ok(binding)
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_name, config_id FROM app ORDER BY package_name",
        )?;
        let bindings = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(bindings)
    }

    pub fn delete_by_package_name(conn: &Connection, package_name: Option<&str>) -> Result<()> {
        conn.execute("DELETE FROM app WHERE package_name IS ?1", [package_name])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_name: row.get(1)?,
            config_id: row.get(2)?,
        })
    }
}
