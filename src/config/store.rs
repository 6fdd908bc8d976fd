use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::AppConfig;
use crate::error::{AppError, Result};
use crate::input::Mapping;

/// Configuration store backed by SQLite
///
/// Reads go through an `ArcSwap` cache, so hot paths never touch the database.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigChange {
    fn mapping(profile: &str) -> Self {
        Self {
            key: format!("mapping:{}", profile),
        }
    }

    /// Whether this change touched the stored mapping of `profile`
    pub fn is_mapping_of(&self, profile: &str) -> bool {
        self.key.strip_prefix("mapping:") == Some(profile)
    }
}

impl ConfigStore {
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            // SQLite is single-writer; one reader plus one writer is enough
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let config = Self::load_config(&pool).await?;
        let cache = Arc::new(ArcSwap::from_pointee(config));

        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            pool,
            cache,
            change_tx,
        })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mappings (
                profile TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_config(pool: &Pool<Sqlite>) -> Result<AppConfig> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM config WHERE key = 'app_config'")
                .fetch_optional(pool)
                .await?;

        match row {
            Some((json,)) => {
                serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string()))
            }
            None => {
                let config = AppConfig::default();
                Self::save_config_to_db(pool, &config).await?;
                Ok(config)
            }
        }
    }

    async fn save_config_to_db(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;

        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES ('app_config', ?1, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?1, updated_at = datetime('now')
            "#,
        )
        .bind(&json)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; concurrent updates resolve as last write wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);

        if config == **current {
            return Ok(());
        }

        Self::save_config_to_db(&self.pool, &config).await?;
        self.cache.store(Arc::new(config));

        let _ = self.change_tx.send(ConfigChange {
            key: "app_config".to_string(),
        });

        Ok(())
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    /// Load the controller mapping saved for `profile`, if any
    pub async fn load_mapping(&self, profile: &str) -> Result<Option<Mapping>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM mappings WHERE profile = ?1")
                .bind(profile)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((json,)) => match serde_json::from_str::<Mapping>(&json) {
                Ok(mapping) => Ok(Some(mapping)),
                Err(e) => {
                    tracing::warn!(profile, "Discarding unreadable mapping: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Persist the controller mapping for `profile`
    pub async fn save_mapping(&self, profile: &str, mapping: &Mapping) -> Result<()> {
        let json = serde_json::to_string(mapping)?;

        sqlx::query(
            r#"
            INSERT INTO mappings (profile, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(profile) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(profile)
        .bind(&json)
        .execute(&self.pool)
        .await?;

        let _ = self.change_tx.send(ConfigChange::mapping(profile));

        Ok(())
    }

    /// Forget the mapping for `profile`; returns whether one existed
    pub async fn delete_mapping(&self, profile: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mappings WHERE profile = ?1")
            .bind(profile)
            .execute(&self.pool)
            .await?;

        let existed = result.rows_affected() > 0;
        if existed {
            let _ = self.change_tx.send(ConfigChange::mapping(profile));
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolVariant;
    use crate::input::AxisName;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let store = ConfigStore::new(&db_path).await.unwrap();
        assert_eq!(store.get().web.http_port, 8801);

        let mut changes = store.subscribe();
        store
            .update(|c| {
                c.web.http_port = 9000;
                c.control.variant = ProtocolVariant::SinglePlayer;
            })
            .await
            .unwrap();
        assert_eq!(changes.recv().await.unwrap().key, "app_config");

        let config = store.get();
        assert_eq!(config.web.http_port, 9000);

        // New instance reads what the first one persisted
        let store2 = ConfigStore::new(&db_path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.web.http_port, 9000);
        assert_eq!(config.control.variant, ProtocolVariant::SinglePlayer);
    }

    #[tokio::test]
    async fn test_mapping_persistence() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();

        assert!(store.load_mapping("pad1").await.unwrap().is_none());

        let mut mapping = Mapping::default();
        mapping.axes.set(AxisName::Rx, 5);
        mapping.buttons.set(0, 9).unwrap();
        store.save_mapping("pad1", &mapping).await.unwrap();

        let loaded = store.load_mapping("pad1").await.unwrap().unwrap();
        assert_eq!(loaded, mapping);
        assert!(store.load_mapping("pad2").await.unwrap().is_none());

        let mut changes = store.subscribe();
        assert!(store.delete_mapping("pad1").await.unwrap());
        let change = changes.try_recv().unwrap();
        assert!(change.is_mapping_of("pad1"));
        assert!(!change.is_mapping_of("pad"));
        assert!(!store.delete_mapping("pad1").await.unwrap());
        assert!(store.load_mapping("pad1").await.unwrap().is_none());
    }
}
