use anyhow::Result;
use base64::Engine;
use chrono::{Duration, Utc};
use contracts::domain::a002_return_case::request::CreateCaseDto;
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Сколько часов храним записи леджера. Клиенты повторяют создание в
/// пределах суток; 48 часов дают запас на часовые пояса и очереди.
const RETENTION_HOURS: i64 = 48;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "a002_case_idempotency")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub case_id: String,
    pub payload_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Отпечаток содержимого команды создания
///
/// Повтор с тем же ключом и тем же отпечатком — replay, возвращаем уже
/// созданную заявку; тот же ключ с другим отпечатком — конфликт.
pub fn payload_fingerprint(parcel_id: Uuid, dto: &CreateCaseDto) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}",
        parcel_id,
        dto.reason,
        dto.comment.as_deref().unwrap_or(""),
        dto.reverse_track_number.as_deref().unwrap_or(""),
        dto.is_exchange,
        dto.requested_at.to_rfc3339(),
    );
    let digest = Sha256::digest(canonical.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest)
}

pub async fn get_by_key<C: ConnectionTrait>(db: &C, key: &str) -> Result<Option<Model>> {
    let record = Entity::find_by_id(key.to_string()).one(db).await?;
    Ok(record)
}

pub async fn insert<C: ConnectionTrait>(
    db: &C,
    key: &str,
    case_id: Uuid,
    payload_hash: &str,
) -> Result<(), DbErr> {
    let active = ActiveModel {
        key: Set(key.to_string()),
        case_id: Set(case_id.to_string()),
        payload_hash: Set(payload_hash.to_string()),
        created_at: Set(Utc::now()),
    };
    active.insert(db).await?;
    Ok(())
}

/// Удалить устаревшие записи леджера (вызывается на старте приложения)
pub async fn purge_stale<C: ConnectionTrait>(db: &C) -> Result<u64> {
    let cutoff = Utc::now() - Duration::hours(RETENTION_HOURS);
    let result = Entity::delete_many()
        .filter(Column::CreatedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dto(reason: &str) -> CreateCaseDto {
        CreateCaseDto {
            reason: reason.into(),
            comment: None,
            reverse_track_number: None,
            is_exchange: false,
            idempotency_key: "k1".into(),
            requested_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let parcel_id = Uuid::new_v4();
        assert_eq!(
            payload_fingerprint(parcel_id, &dto("Брак")),
            payload_fingerprint(parcel_id, &dto("Брак"))
        );
    }

    #[test]
    fn test_fingerprint_differs_on_payload_change() {
        let parcel_id = Uuid::new_v4();
        assert_ne!(
            payload_fingerprint(parcel_id, &dto("Брак")),
            payload_fingerprint(parcel_id, &dto("Не подошёл размер"))
        );
        assert_ne!(
            payload_fingerprint(parcel_id, &dto("Брак")),
            payload_fingerprint(Uuid::new_v4(), &dto("Брак"))
        );
    }
}
