// src/db/store.rs

//! SQLite-backed implementation of the config repositories

use super::models::Preference;
use crate::config::{
    AppBinding, AppRepo, ConfigEntity, ConfigRepo, PreferenceKey, Preferences,
};
use crate::device::Manufacturer;
use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

/// One connection shared by the config, app and preference repositories
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (creating and migrating if needed) the database at `db_path`
    pub fn open(db_path: &str) -> Result<Self> {
        super::init(db_path)?;
        Ok(Self::new(super::open(db_path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(super::open_in_memory()?))
    }

    /// Run `f` with the underlying connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Store the built-in profile on first use
    ///
    /// Only vendors that need a non-default profile get one; returns the
    /// id of the seeded row.
    pub fn seed_default(&self, manufacturer: Manufacturer) -> Result<Option<i64>> {
        if manufacturer != Manufacturer::Xiaomi {
            return Ok(None);
        }
        self.with_conn(|conn| {
            super::transaction(conn, |tx| {
                if !ConfigEntity::list_all(tx)?.is_empty() {
                    return Ok(None);
                }
                let mut config = ConfigEntity::builtin(manufacturer);
                let id = config.insert(tx)?;
                info!("Seeded default config {} for {:?}", id, manufacturer);
                Ok(Some(id))
            })
        })
    }

    pub fn insert_config(&self, entity: &mut ConfigEntity) -> Result<i64> {
        self.with_conn(|conn| entity.insert(conn))
    }

    pub fn update_config(&self, entity: &ConfigEntity) -> Result<()> {
        self.with_conn(|conn| entity.update(conn))
    }

    pub fn delete_config(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| ConfigEntity::delete(conn, id))
    }

    pub fn insert_binding(&self, binding: &mut AppBinding) -> Result<i64> {
        self.with_conn(|conn| binding.upsert(conn))
    }

    pub fn remove_binding(&self, package_name: Option<&str>) -> Result<()> {
        self.with_conn(|conn| AppBinding::delete_by_package_name(conn, package_name))
    }

    pub fn unset_preference(&self, key: PreferenceKey) -> Result<()> {
        self.with_conn(|conn| Preference::unset(conn, key.as_str()))
    }

    pub fn preferences(&self) -> Result<Vec<Preference>> {
        self.with_conn(|conn| Preference::list_all(conn))
    }
}

impl ConfigRepo for SqliteStore {
    fn find(&self, id: i64) -> Result<Option<ConfigEntity>> {
        self.with_conn(|conn| ConfigEntity::find_by_id(conn, id))
    }

    fn all(&self) -> Result<Vec<ConfigEntity>> {
        self.with_conn(|conn| ConfigEntity::list_all(conn))
    }

    fn insert(&self, entity: &mut ConfigEntity) -> Result<i64> {
        self.insert_config(entity)
    }
}

impl AppRepo for SqliteStore {
    fn find_by_package_name(&self, package_name: Option<&str>) -> Result<Option<AppBinding>> {
        self.with_conn(|conn| AppBinding::find_by_package_name(conn, package_name))
    }

    fn all(&self) -> Result<Vec<AppBinding>> {
        self.with_conn(|conn| AppBinding::list_all(conn))
    }

    fn insert(&self, binding: &mut AppBinding) -> Result<i64> {
        self.insert_binding(binding)
    }
}

impl Preferences for SqliteStore {
    fn get(&self, key: PreferenceKey) -> Result<Option<String>> {
        self.with_conn(|conn| Preference::get(conn, key.as_str()))
    }

    fn set(&self, key: PreferenceKey, value: &str) -> Result<()> {
        self.with_conn(|conn| Preference::set(conn, key.as_str(), value))
    }
}
