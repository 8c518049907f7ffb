//! SQLite 持久化（异步，可选）
//!
//! 布局与接口约定一致：每学生一行学伴状态、一行自适应档案，每会话一行。
//! 状态本体按 JSON 列存储，重启后整行恢复。

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{AdaptiveProfile, CompanionState};

/// 状态数据库：学伴状态 / 自适应档案 / 会话快照
pub struct StateDb {
    pool: SqlitePool,
}

impl StateDb {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&db_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS companion_state (
                student_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS adaptive_profile (
                student_id TEXT PRIMARY KEY,
                profile TEXT NOT NULL,
                last_applied_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS learning_session (
                session_id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                status TEXT NOT NULL,
                session TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_session_student ON learning_session(student_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    pub async fn save_companion(&self, state: &CompanionState) -> Result<(), sqlx::Error> {
        let json = serde_json::to_string(state).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        sqlx::query(
            "INSERT OR REPLACE INTO companion_state (student_id, state, updated_at) VALUES (?, ?, ?)",
        )
        .bind(&state.student_id)
        .bind(&json)
        .bind(state.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_companion(&self, student_id: &str) -> Result<Option<CompanionState>, sqlx::Error> {
        let row = sqlx::query("SELECT state FROM companion_state WHERE student_id = ?")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| serde_json::from_str(r.get::<String, _>("state").as_str()).ok()))
    }

    pub async fn save_profile(&self, profile: &AdaptiveProfile) -> Result<(), sqlx::Error> {
        let json = serde_json::to_string(profile).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        sqlx::query(
            "INSERT OR REPLACE INTO adaptive_profile (student_id, profile, last_applied_at) VALUES (?, ?, ?)",
        )
        .bind(&profile.student_id)
        .bind(&json)
        .bind(profile.last_applied_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_profile(&self, student_id: &str) -> Result<Option<AdaptiveProfile>, sqlx::Error> {
        let row = sqlx::query("SELECT profile FROM adaptive_profile WHERE student_id = ?")
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| serde_json::from_str(r.get::<String, _>("profile").as_str()).ok()))
    }

    /// 会话快照写入（status 冗余一列便于清扫查询）
    pub async fn save_session_json(
        &self,
        session_id: &str,
        student_id: &str,
        status: &str,
        session_json: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO learning_session (session_id, student_id, status, session, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(student_id)
        .bind(status)
        .bind(session_json)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InteractionSummary;

    #[tokio::test]
    async fn test_companion_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::open(dir.path().join("state.db")).await.unwrap();

        let mut state = CompanionState::new("s1");
        state.apply(
            &InteractionSummary {
                performance: 0.9,
                response_secs: 60,
                attempts: 1,
                completed: true,
                frustration_signal: false,
                note: "quiz done".to_string(),
            },
            &crate::config::CompanionSection::default(),
        );

        db.save_companion(&state).await.unwrap();
        let loaded = db.load_companion("s1").await.unwrap().unwrap();
        assert_eq!(loaded.mood, state.mood);
        assert_eq!(loaded.memory.len(), 1);

        assert!(db.load_companion("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::open(dir.path().join("state.db")).await.unwrap();

        let profile = AdaptiveProfile::new("s1");
        db.save_profile(&profile).await.unwrap();
        let loaded = db.load_profile("s1").await.unwrap().unwrap();
        assert_eq!(loaded.student_id, "s1");
    }
}
