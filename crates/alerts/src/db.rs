//! SQLite database for watch subscriptions and poller state.

use chrono::{DateTime, Utc};
use smartflow_core::{AlertRule, ChatId, TargetClass, TargetKey, WatchTarget};
use smartflow_engine::TargetSnapshot;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

type WatchRow = (String, String, i64, String, bool, String);
type StateRow = (String, String, String, String);

/// Database connection for subscriptions and poller state.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to SQLite database at the given path.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watches (
                class TEXT NOT NULL,
                target_id TEXT NOT NULL,
                chat_id INTEGER NOT NULL,
                rule TEXT NOT NULL,
                auto INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                PRIMARY KEY (class, target_id, chat_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS target_state (
                class TEXT NOT NULL,
                target_id TEXT NOT NULL,
                seen TEXT NOT NULL DEFAULT '[]',
                series TEXT NOT NULL DEFAULT '{}',
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (class, target_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a user subscription. The target's rule is updated for every
    /// subscriber and the target stops being auto-tracked.
    pub async fn add_watch(&self, target: &WatchTarget, chat_id: ChatId) -> Result<(), DbError> {
        let rule = serde_json::to_string(&target.rule)?;
        let class = target.class().as_str();

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE watches SET rule = ?, auto = 0 WHERE class = ? AND target_id = ?")
            .bind(&rule)
            .bind(class)
            .bind(target.id())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO watches (class, target_id, chat_id, rule, auto, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            ON CONFLICT(class, target_id, chat_id)
            DO UPDATE SET rule = excluded.rule, auto = 0
            "#,
        )
        .bind(class)
        .bind(target.id())
        .bind(chat_id)
        .bind(&rule)
        .bind(target.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Remove a chat's subscription to a target.
    pub async fn remove_watch(&self, key: &TargetKey, chat_id: ChatId) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM watches WHERE class = ? AND target_id = ? AND chat_id = ?")
                .bind(key.class.as_str())
                .bind(&key.id)
                .bind(chat_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace every auto-tracked subscription with the given targets.
    pub async fn replace_auto_watches(&self, targets: &[WatchTarget]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM watches WHERE auto = 1")
            .execute(&mut *tx)
            .await?;

        for target in targets.iter().filter(|t| t.auto) {
            let rule = serde_json::to_string(&target.rule)?;
            for chat_id in &target.subscribers {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO watches (class, target_id, chat_id, rule, auto, created_at)
                    VALUES (?, ?, ?, ?, 1, ?)
                    "#,
                )
                .bind(target.class().as_str())
                .bind(target.id())
                .bind(*chat_id)
                .bind(&rule)
                .bind(target.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        Ok(())
    }

    /// Load every target with its subscribers. Rows that no longer parse are
    /// skipped.
    pub async fn load_watches(&self) -> Result<Vec<WatchTarget>, DbError> {
        let rows = sqlx::query_as::<_, WatchRow>(
            "SELECT class, target_id, chat_id, rule, auto, created_at FROM watches",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut targets: BTreeMap<TargetKey, WatchTarget> = BTreeMap::new();
        for (class, target_id, chat_id, rule, auto, created_at) in rows {
            let Some(key) = parse_key(&class, &target_id) else {
                continue;
            };
            let rule: AlertRule = match serde_json::from_str(&rule) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(target = %key, error = %e, "Skipping watch with invalid rule");
                    continue;
                }
            };
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());

            let target = targets.entry(key.clone()).or_insert_with(|| {
                let mut target = WatchTarget::new(key, rule);
                target.created_at = created_at;
                target.auto = auto;
                target
            });
            target.subscribers.insert(chat_id);
        }

        Ok(targets.into_values().collect())
    }

    /// Persist poller state, replacing what was stored before.
    pub async fn save_state(&self, snapshots: &[(TargetKey, TargetSnapshot)]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM target_state")
            .execute(&mut *tx)
            .await?;

        for (key, snapshot) in snapshots {
            sqlx::query(
                "INSERT INTO target_state (class, target_id, seen, series) VALUES (?, ?, ?, ?)",
            )
            .bind(key.class.as_str())
            .bind(&key.id)
            .bind(serde_json::to_string(&snapshot.seen)?)
            .bind(serde_json::to_string(&snapshot.series)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Load persisted poller state.
    pub async fn load_state(&self) -> Result<Vec<(TargetKey, TargetSnapshot)>, DbError> {
        let rows = sqlx::query_as::<_, StateRow>(
            "SELECT class, target_id, seen, series FROM target_state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for (class, target_id, seen, series) in rows {
            let Some(key) = parse_key(&class, &target_id) else {
                continue;
            };
            let snapshot = match (serde_json::from_str(&seen), serde_json::from_str(&series)) {
                (Ok(seen), Ok(series)) => TargetSnapshot { seen, series },
                _ => {
                    warn!(target = %key, "Skipping unreadable poller state");
                    continue;
                }
            };
            snapshots.push((key, snapshot));
        }

        Ok(snapshots)
    }
}

fn parse_key(class: &str, target_id: &str) -> Option<TargetKey> {
    match TargetClass::from_str(class) {
        Ok(class) => Some(TargetKey::new(class, target_id)),
        Err(e) => {
            warn!(class = class, target_id = target_id, error = %e, "Skipping row with unknown class");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use smartflow_core::Sample;
    use smartflow_engine::ObservationSeries;

    const MINT: &str = "So11111111111111111111111111111111111111112";

    fn token(id: &str) -> TargetKey {
        TargetKey::new(TargetClass::Token, id)
    }

    #[tokio::test]
    async fn test_database_connect() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        assert!(db.load_watches().await.unwrap().is_empty());
        assert!(db.load_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_roundtrip() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let target = WatchTarget::new(token(MINT), AlertRule::jump(300, 25.0));

        db.add_watch(&target, 1).await.unwrap();
        db.add_watch(&target, 2).await.unwrap();

        let loaded = db.load_watches().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, token(MINT));
        assert_eq!(loaded[0].rule, AlertRule::jump(300, 25.0));
        assert_eq!(loaded[0].subscribers.iter().copied().collect::<Vec<_>>(), vec![1, 2]);

        assert!(db.remove_watch(&token(MINT), 1).await.unwrap());
        assert!(!db.remove_watch(&token(MINT), 1).await.unwrap());
        let loaded = db.load_watches().await.unwrap();
        assert_eq!(loaded[0].subscribers.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_rule_applies_to_all_subscribers() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.add_watch(&WatchTarget::new(token(MINT), AlertRule::jump(300, 25.0)), 1)
            .await
            .unwrap();
        db.add_watch(&WatchTarget::new(token(MINT), AlertRule::jump(300, 10.0)), 2)
            .await
            .unwrap();

        let loaded = db.load_watches().await.unwrap();
        assert_eq!(loaded[0].rule, AlertRule::jump(300, 10.0));
    }

    #[tokio::test]
    async fn test_replace_auto_watches_keeps_user_rows() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let rule = AlertRule::jump(300, 25.0);
        db.add_watch(&WatchTarget::new(token("user"), rule), 1).await.unwrap();

        let auto = WatchTarget::new(token("auto1"), rule).with_subscriber(1).auto();
        db.replace_auto_watches(&[auto]).await.unwrap();
        assert_eq!(db.load_watches().await.unwrap().len(), 2);

        let auto = WatchTarget::new(token("auto2"), rule).with_subscriber(1).auto();
        db.replace_auto_watches(&[auto]).await.unwrap();

        let keys: Vec<_> = db.load_watches().await.unwrap().into_iter().map(|t| t.key).collect();
        assert_eq!(keys, vec![token("auto2"), token("user")]);
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut series = ObservationSeries::new();
        series.append(Sample::new(now, 1.0), TimeDelta::minutes(5));
        let snapshot = TargetSnapshot {
            seen: vec![("sig".to_string(), now)],
            series,
        };

        db.save_state(&[(token(MINT), snapshot.clone())]).await.unwrap();
        assert_eq!(db.load_state().await.unwrap(), vec![(token(MINT), snapshot)]);

        db.save_state(&[]).await.unwrap();
        assert!(db.load_state().await.unwrap().is_empty());
    }
}
