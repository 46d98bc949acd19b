//! System settings, with a short list of reserved keys the API must refuse
//! CRUD on (`migrate` is the only one today).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cache::CacheService;
use crate::error::{ApiError, StoreError};
use crate::kv::KeyBuilder;
use crate::model::{RESERVED_SETTING_KEYS, SettingType, SystemSetting};

#[derive(sqlx::FromRow)]
struct SettingRow {
    key: String,
    value: String,
    setting_type: String,
    description: Option<String>,
    modified_at: DateTime<Utc>,
    modified_by: Uuid,
}

impl TryFrom<SettingRow> for SystemSetting {
    type Error = ApiError;
    fn try_from(row: SettingRow) -> Result<Self, ApiError> {
        let setting_type = match row.setting_type.as_str() {
            "string" => SettingType::String,
            "int" => SettingType::Int,
            "bool" => SettingType::Bool,
            "json" => SettingType::Json,
            other => return Err(ApiError::ServerError(Some(anyhow::anyhow!("unknown setting type {other}")))),
        };
        Ok(SystemSetting {
            key: row.key,
            value: row.value,
            setting_type,
            description: row.description,
            modified_at: row.modified_at,
            modified_by: row.modified_by,
        })
    }
}

pub fn reject_reserved(key: &str) -> Result<(), ApiError> {
    if RESERVED_SETTING_KEYS.contains(&key) {
        return Err(ApiError::ReservedKey(key.to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct SystemSettingStore {
    pool: PgPool,
    cache: CacheService,
}

impl SystemSettingStore {
    pub fn new(pool: PgPool, cache: CacheService) -> Self {
        Self { pool, cache }
    }

    fn type_str(t: SettingType) -> &'static str {
        match t {
            SettingType::String => "string",
            SettingType::Int => "int",
            SettingType::Bool => "bool",
            SettingType::Json => "json",
        }
    }

    pub async fn upsert(&self, key: &str, value: &str, setting_type: SettingType, description: Option<&str>, modified_by: Uuid) -> Result<SystemSetting, ApiError> {
        reject_reserved(key)?;
        let row: SettingRow = sqlx::query_as(
            "INSERT INTO system_settings (key, value, setting_type, description, modified_by)
             VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, setting_type = excluded.setting_type,
               description = excluded.description, modified_by = excluded.modified_by, modified_at = now()
             RETURNING key, value, setting_type, description, modified_at, modified_by",
        )
        .bind(key)
        .bind(value)
        .bind(Self::type_str(setting_type))
        .bind(description)
        .bind(modified_by)
        .fetch_one(&self.pool)
        .await?;
        self.cache.invalidate_setting(&Default::default(), key).await;
        row.try_into()
    }

    pub async fn get(&self, key: &str) -> Result<SystemSetting, ApiError> {
        reject_reserved(key)?;
        if let Some(cached) = self.cache.get_cached_setting::<SystemSetting>(&Default::default(), key).await {
            return Ok(cached);
        }
        let row: Option<SettingRow> = sqlx::query_as(
            "SELECT key, value, setting_type, description, modified_at, modified_by FROM system_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        let setting: SystemSetting = row.ok_or(StoreError::NotFound)?.try_into()?;
        self.cache.cache_setting(&Default::default(), key, &setting).await;
        Ok(setting)
    }

    pub async fn delete(&self, key: &str) -> Result<(), ApiError> {
        reject_reserved(key)?;
        let res = sqlx::query("DELETE FROM system_settings WHERE key = $1").bind(key).execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound.into());
        }
        self.cache.invalidate_setting(&Default::default(), key).await;
        Ok(())
    }

    pub async fn migrate(&self, overwrite: bool) -> Result<(), ApiError> {
        // Schema migration is an out-of-scope external collaborator; this
        // records the request for audit purposes only.
        tracing::info!(overwrite, "settings migrate requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_key_is_rejected() {
        let err = reject_reserved("migrate").unwrap_err();
        assert_eq!(err.kind(), "reserved_key");
    }

    #[test]
    fn non_reserved_key_passes() {
        assert!(reject_reserved("session_timeout_minutes").is_ok());
    }
}
