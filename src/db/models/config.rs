// src/db/models/config.rs

//! Stored install profiles

use crate::authorizer::AuthorizerKind;
use crate::config::{ConfigEntity, DexoptMode, InstallMode, InstallReason, PackageSource};
use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str = "id, name, description, authorizer, customize_authorizer, install_mode, \
     installer, install_reason, package_source, enable_dexopt, dexopt_mode, auto_delete, \
     all_users, allow_test_only, allow_downgrade, force_dexopt";

impl ConfigEntity {
    /// Insert this profile into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO config (name, description, authorizer, customize_authorizer, install_mode,
                installer, install_reason, package_source, enable_dexopt, dexopt_mode, auto_delete,
                all_users, allow_test_only, allow_downgrade, force_dexopt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                &self.name,
                &self.description,
                self.authorizer.as_str(),
                &self.customize_authorizer,
                self.install_mode.as_str(),
                &self.installer,
                self.install_reason.code(),
                self.package_source.code(),
                self.enable_dexopt as i32,
                self.dexopt_mode.as_str(),
                self.auto_delete as i32,
                self.all_users as i32,
                self.allow_test_only as i32,
                self.allow_downgrade as i32,
                self.force_dexopt as i32,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Overwrite the stored row with this profile's fields
    pub fn update(&self, conn: &Connection) -> Result<()> {
        let Some(id) = self.id else {
            return Ok(());
        };
        conn.execute(
            "UPDATE config SET name = ?1, description = ?2, authorizer = ?3,
                customize_authorizer = ?4, install_mode = ?5, installer = ?6,
                install_reason = ?7, package_source = ?8, enable_dexopt = ?9,
                dexopt_mode = ?10, auto_delete = ?11, all_users = ?12,
                allow_test_only = ?13, allow_downgrade = ?14, force_dexopt = ?15
             WHERE id = ?16",
            params![
                &self.name,
                &self.description,
                self.authorizer.as_str(),
                &self.customize_authorizer,
                self.install_mode.as_str(),
                &self.installer,
                self.install_reason.code(),
                self.package_source.code(),
                self.enable_dexopt as i32,
                self.dexopt_mode.as_str(),
                self.auto_delete as i32,
                self.all_users as i32,
                self.allow_test_only as i32,
                self.allow_downgrade as i32,
                self.force_dexopt as i32,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM config WHERE id = ?1", COLUMNS))?;
        let config = stmt.query_row([id], Self::from_row).optional()?;
        Ok(config)
    }

    /// All profiles in insertion order
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM config ORDER BY id", COLUMNS))?;
        let configs = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(configs)
    }

    /// Delete a profile; its bindings go with it
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM config WHERE id = ?1", [id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let authorizer: String = row.get(3)?;
        let install_mode: String = row.get(5)?;
        let dexopt_mode: String = row.get(10)?;

        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            description: row.get(2)?,
            authorizer: AuthorizerKind::parse(&authorizer).unwrap_or(AuthorizerKind::Global),
            customize_authorizer: row.get(4)?,
            install_mode: InstallMode::parse(&install_mode).unwrap_or(InstallMode::Global),
            installer: row.get(6)?,
            install_reason: InstallReason::from_code(row.get(7)?),
            package_source: PackageSource::from_code(row.get(8)?),
            enable_dexopt: row.get::<_, i32>(9)? != 0,
            dexopt_mode: DexoptMode::parse(&dexopt_mode).unwrap_or(DexoptMode::SpeedProfile),
            auto_delete: row.get::<_, i32>(11)? != 0,
            all_users: row.get::<_, i32>(12)? != 0,
            allow_test_only: row.get::<_, i32>(13)? != 0,
            allow_downgrade: row.get::<_, i32>(14)? != 0,
            force_dexopt: row.get::<_, i32>(15)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_insert_and_find() {
        let conn = db::open_in_memory().unwrap();
        let mut config = ConfigEntity::new("work")
            .with_authorizer(AuthorizerKind::Customize)
            .with_customize_authorizer("su -c sh")
            .with_install_mode(InstallMode::AutoNotification)
            .with_installer("com.android.vending")
            .with_auto_delete(true);
        config.install_reason = InstallReason::User;
        config.package_source = PackageSource::Store;
        config = config.with_dexopt(DexoptMode::Speed, true);

        let id = config.insert(&conn).unwrap();
        let found = ConfigEntity::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found, config);
    }

    #[test]
    fn test_update_and_delete() {
        let conn = db::open_in_memory().unwrap();
        let mut config = ConfigEntity::new("a");
        let id = config.insert(&conn).unwrap();

        config.name = "b".to_string();
        config.allow_downgrade = true;
        config.update(&conn).unwrap();
        let found = ConfigEntity::find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found.name, "b");
        assert!(found.allow_downgrade);

        ConfigEntity::delete(&conn, id).unwrap();
        assert!(ConfigEntity::find_by_id(&conn, id).unwrap().is_none());
    }

    #[test]
    fn test_list_all_keeps_insertion_order() {
        let conn = db::open_in_memory().unwrap();
        for name in ["first", "second", "third"] {
            ConfigEntity::new(name).insert(&conn).unwrap();
        }
        let names: Vec<String> = ConfigEntity::list_all(&conn)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
