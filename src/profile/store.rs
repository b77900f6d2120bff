//! SQLite-backed profile store
//!
//! Every write goes through [`ProfileValidator`]; reads hand out immutable
//! `Arc<RetrievalProfile>` snapshots. Exactly one profile is the default at any
//! time.

use super::{
    builtin_profiles, normalize_profile_key, LibraryType, ProfileConfig, ProfileValidator,
    RetrievalProfile, GENERAL_PROFILE_KEY,
};
use crate::error::{RagError, Result};
use crate::storage::{time_column, uuid_column, Database};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const PROFILE_COLUMNS: &str = "id, profile_key, name, library_type, description, version, \
                               is_default, is_builtin, is_active, created_at, updated_at, config";

fn default_library_type() -> LibraryType {
    LibraryType::General
}

/// A new profile, as written by a user or read from an import file
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileDraft {
    pub profile_key: String,
    pub name: String,
    #[serde(default = "default_library_type")]
    pub library_type: LibraryType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub config: ProfileConfig,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
    pub config: Option<ProfileConfig>,
}

pub struct ProfileStore {
    db: Arc<Database>,
}

impl ProfileStore {
    /// Open the store and seed the built-in profiles
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let store = Self { db };
        store.ensure_builtin_profiles()?;
        Ok(store)
    }

    /// Insert any missing built-in profile and make sure a default exists
    pub fn ensure_builtin_profiles(&self) -> Result<()> {
        let conn = self.db.get_conn()?;
        let now = Utc::now().to_rfc3339();

        for builtin in builtin_profiles() {
            let config = encode_config(&builtin.config)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO retrieval_profiles
                 (id, profile_key, name, library_type, description, version,
                  is_default, is_builtin, is_active, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, 1, 1, ?6, ?7, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    builtin.profile_key,
                    builtin.name,
                    builtin.library_type.as_str(),
                    builtin.description,
                    config,
                    now
                ],
            )?;
            if inserted > 0 {
                info!("Seeded built-in profile {}", builtin.profile_key);
            }
        }

        let defaults: i64 = conn.query_row(
            "SELECT COUNT(*) FROM retrieval_profiles WHERE is_default = 1",
            [],
            |row| row.get(0),
        )?;
        if defaults == 0 {
            conn.execute(
                "UPDATE retrieval_profiles SET is_default = 1 WHERE profile_key = ?1",
                params![GENERAL_PROFILE_KEY],
            )?;
        }
        Ok(())
    }

    /// All profiles, built-ins first, then by key
    pub fn list(&self) -> Result<Vec<RetrievalProfile>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM retrieval_profiles ORDER BY is_builtin DESC, profile_key",
            PROFILE_COLUMNS
        ))?;
        let profiles = stmt
            .query_map([], profile_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(profiles)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<RetrievalProfile>> {
        self.query_one("id = ?1", &id.to_string())?
            .map(Arc::new)
            .ok_or_else(|| RagError::ProfileNotFound { key: id.to_string() })
    }

    pub fn get_by_key(&self, profile_key: &str) -> Result<Arc<RetrievalProfile>> {
        let key = normalize_profile_key(profile_key)?;
        self.query_one("profile_key = ?1", &key)?
            .map(Arc::new)
            .ok_or(RagError::ProfileNotFound { key })
    }

    /// Look a profile up by id or key
    pub fn find(&self, id_or_key: &str) -> Result<Arc<RetrievalProfile>> {
        match Uuid::parse_str(id_or_key.trim()) {
            Ok(id) => self.get(id),
            Err(_) => self.get_by_key(id_or_key),
        }
    }

    fn query_one(&self, condition: &str, value: &str) -> Result<Option<RetrievalProfile>> {
        let conn = self.db.get_conn()?;
        let profile = conn
            .query_row(
                &format!(
                    "SELECT {} FROM retrieval_profiles WHERE {}",
                    PROFILE_COLUMNS, condition
                ),
                params![value],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    pub fn create(&self, draft: ProfileDraft) -> Result<Arc<RetrievalProfile>> {
        ProfileValidator::validate(&draft.config)?;
        let key = normalize_profile_key(&draft.profile_key)?;
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(RagError::InvalidConfigValue {
                path: "name".to_string(),
                message: "Profile name cannot be empty".to_string(),
            });
        }
        if self.query_one("profile_key = ?1", &key)?.is_some() {
            return Err(RagError::ProfileConflict { key });
        }

        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO retrieval_profiles
             (id, profile_key, name, library_type, description, version,
              is_default, is_builtin, is_active, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, 0, 1, ?6, ?7, ?7)",
            params![
                id.to_string(),
                key,
                name,
                draft.library_type.as_str(),
                draft.description.trim(),
                encode_config(&draft.config)?,
                now
            ],
        )?;
        if draft.is_default {
            make_default(&tx, id)?;
        }
        tx.commit()?;
        drop(conn);

        info!("Created retrieval profile {}", key);
        self.get(id)
    }

    /// Apply a partial update; every successful update bumps the version.
    ///
    /// The default switch and the row update commit together or not at all.
    pub fn update(&self, id: Uuid, update: ProfileUpdate) -> Result<Arc<RetrievalProfile>> {
        let current = self.get(id)?;
        if let Some(config) = &update.config {
            ProfileValidator::validate(config)?;
        }
        let mut new_default = None;
        if update.is_default == Some(false) && current.is_default {
            if current.profile_key == GENERAL_PROFILE_KEY {
                return Err(RagError::InvalidConfigValue {
                    path: "is_default".to_string(),
                    message: "Choose another default profile instead of clearing this one"
                        .to_string(),
                });
            }
            new_default = Some(self.get_by_key(GENERAL_PROFILE_KEY)?.id);
        } else if update.is_default == Some(true) {
            new_default = Some(id);
        }

        let name = update.name.as_deref().map(str::trim).unwrap_or(&current.name);
        let description = update
            .description
            .as_deref()
            .map(str::trim)
            .unwrap_or(&current.description);
        let config = update.config.as_ref().unwrap_or(&current.config);
        let is_active = update.is_active.unwrap_or(current.is_active);

        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        if let Some(default_id) = new_default {
            make_default(&tx, default_id)?;
        }
        tx.execute(
            "UPDATE retrieval_profiles
             SET name = ?1, description = ?2, is_active = ?3, config = ?4,
                 version = version + 1, updated_at = ?5
             WHERE id = ?6",
            params![
                name,
                description,
                is_active,
                encode_config(config)?,
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )?;
        tx.commit()?;
        drop(conn);

        info!(
            "Updated retrieval profile {} to version {}",
            current.profile_key,
            current.version + 1
        );
        self.get(id)
    }

    /// Create the profile, or update config, name and description of an
    /// existing one with the same key
    pub fn upsert(&self, draft: ProfileDraft) -> Result<Arc<RetrievalProfile>> {
        let key = normalize_profile_key(&draft.profile_key)?;
        match self.query_one("profile_key = ?1", &key)? {
            Some(existing) => self.update(
                existing.id,
                ProfileUpdate {
                    name: Some(draft.name),
                    description: Some(draft.description),
                    is_default: draft.is_default.then_some(true),
                    config: Some(draft.config),
                    ..ProfileUpdate::default()
                },
            ),
            None => self.create(draft),
        }
    }

    /// Make `id` the only default profile
    pub fn set_default(&self, id: Uuid) -> Result<()> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        make_default(&tx, id)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a user profile. Libraries using it fall back to type defaults.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let profile = self.get(id)?;
        if profile.is_builtin {
            return Err(RagError::BuiltinProfile {
                key: profile.profile_key.clone(),
            });
        }

        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE libraries SET profile_id = NULL WHERE profile_id = ?1",
            params![id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM retrieval_profiles WHERE id = ?1",
            params![id.to_string()],
        )?;
        if profile.is_default {
            tx.execute(
                "UPDATE retrieval_profiles SET is_default = 1 WHERE profile_key = ?1",
                params![GENERAL_PROFILE_KEY],
            )?;
        }
        tx.commit()?;

        info!("Deleted retrieval profile {}", profile.profile_key);
        Ok(())
    }

    /// Profile a search should run with: the explicitly assigned one when it is
    /// active, else the best active profile for the library type, else the
    /// global default, else the general built-in
    pub fn resolve(
        &self,
        explicit: Option<Uuid>,
        library_type: LibraryType,
    ) -> Result<Arc<RetrievalProfile>> {
        if let Some(id) = explicit {
            match self.get(id) {
                Ok(profile) if profile.is_active => return Ok(profile),
                Ok(profile) => warn!(
                    "Assigned profile {} is inactive, using library type default",
                    profile.profile_key
                ),
                Err(RagError::ProfileNotFound { .. }) => {
                    warn!("Assigned profile {} no longer exists", id)
                }
                Err(e) => return Err(e),
            }
        }

        let conn = self.db.get_conn()?;
        let by_type = conn
            .query_row(
                &format!(
                    "SELECT {} FROM retrieval_profiles
                     WHERE is_active = 1 AND library_type = ?1
                     ORDER BY is_default DESC, is_builtin DESC, created_at ASC
                     LIMIT 1",
                    PROFILE_COLUMNS
                ),
                params![library_type.as_str()],
                profile_from_row,
            )
            .optional()?;
        if let Some(profile) = by_type {
            return Ok(Arc::new(profile));
        }

        let global = conn
            .query_row(
                &format!(
                    "SELECT {} FROM retrieval_profiles WHERE is_active = 1 AND is_default = 1",
                    PROFILE_COLUMNS
                ),
                [],
                profile_from_row,
            )
            .optional()?;
        Ok(Arc::new(
            global.unwrap_or_else(RetrievalProfile::builtin_general),
        ))
    }
}

/// Clear every default flag and set it on `id`, inside the caller's transaction
fn make_default(tx: &Transaction<'_>, id: Uuid) -> Result<()> {
    let exists: i64 = tx.query_row(
        "SELECT COUNT(*) FROM retrieval_profiles WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(RagError::ProfileNotFound { key: id.to_string() });
    }
    tx.execute("UPDATE retrieval_profiles SET is_default = 0 WHERE is_default = 1", [])?;
    tx.execute(
        "UPDATE retrieval_profiles SET is_default = 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}

fn encode_config(config: &ProfileConfig) -> Result<String> {
    serde_json::to_string(config).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to serialize profile config".to_string(),
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<RetrievalProfile> {
    let library_type: String = row.get(3)?;
    let config: String = row.get(11)?;
    Ok(RetrievalProfile {
        id: uuid_column(row, 0)?,
        profile_key: row.get(1)?,
        name: row.get(2)?,
        library_type: library_type.parse().unwrap_or(LibraryType::General),
        description: row.get(4)?,
        version: row.get(5)?,
        is_default: row.get(6)?,
        is_builtin: row.get(7)?,
        is_active: row.get(8)?,
        created_at: time_column(row, 9)?,
        updated_at: time_column(row, 10)?,
        config: serde_json::from_str(&config)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteChunkStore;
    use tempfile::TempDir;

    fn setup() -> (ProfileStore, Arc<Database>, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("profiles.db")).unwrap());
        let store = ProfileStore::new(Arc::clone(&db)).unwrap();
        (store, db, temp)
    }

    fn draft(key: &str) -> ProfileDraft {
        ProfileDraft {
            profile_key: key.to_string(),
            name: "Custom".to_string(),
            library_type: LibraryType::NovelStory,
            description: String::new(),
            is_default: false,
            config: ProfileConfig::default(),
        }
    }

    fn default_keys(store: &ProfileStore) -> Vec<String> {
        store
            .list()
            .unwrap()
            .into_iter()
            .filter(|p| p.is_default)
            .map(|p| p.profile_key)
            .collect()
    }

    #[test]
    fn test_builtins_seeded_once() {
        let (store, _db, _temp) = setup();
        store.ensure_builtin_profiles().unwrap();

        let profiles = store.list().unwrap();
        assert_eq!(profiles.len(), 5);
        assert!(profiles.iter().all(|p| p.is_builtin));
        assert_eq!(default_keys(&store), vec![GENERAL_PROFILE_KEY.to_string()]);
    }

    #[test]
    fn test_create_normalizes_and_rejects_duplicates() {
        let (store, _db, _temp) = setup();
        let created = store.create(draft("My Profile!")).unwrap();
        assert_eq!(created.profile_key, "my_profile");
        assert_eq!(created.version, 1);

        let duplicate = store.create(draft("my_profile"));
        assert!(matches!(duplicate, Err(RagError::ProfileConflict { .. })));
    }

    #[test]
    fn test_invalid_config_is_rejected_with_every_field() {
        let (store, _db, _temp) = setup();
        let mut bad = draft("bad");
        bad.config.rag_min_top1_score = 2.0;
        bad.config.summary_min_files = 0;

        match store.create(bad) {
            Err(RagError::ConfigurationInvalid { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert!(paths.contains(&"rag_min_top1_score"));
                assert!(paths.contains(&"summary_min_files"));
            }
            other => panic!("expected ConfigurationInvalid, got {:?}", other),
        }
        assert!(store.get_by_key("bad").is_err());
    }

    #[test]
    fn test_update_bumps_version() {
        let (store, _db, _temp) = setup();
        let created = store.create(draft("tuned")).unwrap();

        let mut config = ProfileConfig::default();
        config.rag_min_item_score = 0.05;
        let updated = store
            .update(
                created.id,
                ProfileUpdate {
                    config: Some(config),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.config.rag_min_item_score, 0.05);
        assert_eq!(updated.name, "Custom");
    }

    #[test]
    fn test_single_default_maintained() {
        let (store, _db, _temp) = setup();
        let created = store.create(draft("mine")).unwrap();
        store.set_default(created.id).unwrap();
        assert_eq!(default_keys(&store), vec!["mine".to_string()]);

        store.delete(created.id).unwrap();
        assert_eq!(default_keys(&store), vec![GENERAL_PROFILE_KEY.to_string()]);
    }

    #[test]
    fn test_builtin_cannot_be_deleted() {
        let (store, _db, _temp) = setup();
        let general = store.get_by_key(GENERAL_PROFILE_KEY).unwrap();
        assert!(matches!(
            store.delete(general.id),
            Err(RagError::BuiltinProfile { .. })
        ));
    }

    #[test]
    fn test_resolve_order() {
        let (store, db, _temp) = setup();
        let libraries = SqliteChunkStore::new(Arc::clone(&db)).unwrap();
        let library = libraries
            .create_library("novels", LibraryType::NovelStory)
            .unwrap();

        let by_type = store.resolve(None, library.library_type).unwrap();
        assert_eq!(by_type.profile_key, "novel_story");

        let custom = store.create(draft("custom")).unwrap();
        libraries
            .set_library_profile(library.id, Some(custom.id))
            .unwrap();
        assert_eq!(
            store.resolve(Some(custom.id), library.library_type).unwrap().profile_key,
            "custom"
        );

        store
            .update(
                custom.id,
                ProfileUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            store.resolve(Some(custom.id), library.library_type).unwrap().profile_key,
            "novel_story"
        );

        store.delete(custom.id).unwrap();
        let reloaded = libraries.find_library("novels").unwrap();
        assert!(reloaded.profile_id.is_none());
        assert_eq!(
            store.resolve(Some(custom.id), LibraryType::General).unwrap().profile_key,
            GENERAL_PROFILE_KEY
        );
    }

    #[test]
    fn test_upsert_updates_existing() {
        let (store, _db, _temp) = setup();
        store.upsert(draft("imported")).unwrap();
        let mut second = draft("imported");
        second.name = "Renamed".to_string();
        let updated = store.upsert(second).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.version, 2);
    }

    #[test]
    fn test_failed_update_keeps_default_unchanged() {
        let (store, db, _temp) = setup();
        let mut mine = draft("mine");
        mine.is_default = true;
        let created = store.create(mine).unwrap();
        assert_eq!(default_keys(&store), vec!["mine".to_string()]);

        // Make the row update fail after the default switch has run
        db.get_conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_rename BEFORE UPDATE OF name ON retrieval_profiles
                 BEGIN SELECT RAISE(ABORT, 'rename rejected'); END;",
            )
            .unwrap();

        let result = store.update(
            created.id,
            ProfileUpdate {
                name: Some("Renamed".to_string()),
                is_default: Some(false),
                ..Default::default()
            },
        );
        assert!(result.is_err());
        assert_eq!(default_keys(&store), vec!["mine".to_string()]);
        assert_eq!(store.get(created.id).unwrap().version, 1);
    }
}
