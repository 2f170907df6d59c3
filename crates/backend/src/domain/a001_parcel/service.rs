use anyhow::Result;
use async_trait::async_trait;
use contracts::domain::a001_parcel::aggregate::{Parcel, ParcelDto};
use contracts::domain::a002_return_case::response::{ExchangeParcelRef, ExchangeParcelSummary};
use contracts::domain::common::AggregateId;
use contracts::enums::CarrierStatus;
use rand::Rng;
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use super::repository;
use crate::domain::a002_return_case::gateway::ParcelGateway;

pub async fn list_all(db: &DatabaseConnection) -> Result<Vec<Parcel>> {
    repository::list_all(db).await
}

pub async fn get_by_id(db: &DatabaseConnection, id: Uuid) -> Result<Option<Parcel>> {
    repository::get_by_id(db, id).await
}

pub async fn create(db: &DatabaseConnection, dto: ParcelDto) -> Result<Uuid> {
    let status = CarrierStatus::from_code(&dto.carrier_status).unwrap_or(CarrierStatus::Registered);
    let code = if dto.code.as_deref().unwrap_or("").trim().is_empty() {
        let id_part = Uuid::new_v4().to_string();
        format!("P-{}", &id_part[..8])
    } else {
        dto.code.clone().unwrap_or_default()
    };
    let mut parcel =
        Parcel::new_for_insert(code, dto.description, dto.track_number, status, dto.comment);
    if status == CarrierStatus::Delivered {
        parcel.delivered_at = Some(chrono::Utc::now());
    }
    parcel
        .validate()
        .map_err(|e| anyhow::anyhow!("Validation failed: {}", e))?;
    repository::insert(db, &parcel).await
}

pub async fn update(db: &DatabaseConnection, dto: ParcelDto) -> Result<()> {
    let id = dto
        .id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| anyhow::anyhow!("Parcel id is required for update"))?;
    let mut parcel = repository::get_by_id(db, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Parcel not found: {}", id))?;
    parcel.update(&dto);
    parcel
        .validate()
        .map_err(|e| anyhow::anyhow!("Validation failed: {}", e))?;
    parcel.before_write();
    repository::update(db, &parcel).await
}

pub async fn delete(db: &DatabaseConnection, id: Uuid) -> Result<bool> {
    repository::soft_delete(db, id).await
}

/// Сменить статус перевозчика (ручная команда вместо опроса перевозчика)
pub async fn set_carrier_status(
    db: &DatabaseConnection,
    id: Uuid,
    status: CarrierStatus,
) -> Result<Parcel> {
    let mut parcel = repository::get_by_id(db, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Parcel not found: {}", id))?;
    parcel.set_carrier_status(status);
    parcel.before_write();
    repository::update(db, &parcel).await?;

    tracing::info!("Parcel {} carrier status set to {}", id, status.code());
    Ok(parcel)
}

/// Тестовые данные для ручной проверки сценариев возврата
pub async fn insert_test_data(db: &DatabaseConnection) -> Result<Vec<Uuid>> {
    let samples = [
        ("Кроссовки, 42 размер", "RA100200300RU", CarrierStatus::Delivered),
        ("Куртка зимняя", "RA100200301RU", CarrierStatus::InTransit),
        ("Термокружка", "RA100200302RU", CarrierStatus::Delivered),
    ];

    let mut ids = Vec::new();
    for (description, track, status) in samples {
        let dto = ParcelDto {
            id: None,
            code: None,
            description: description.to_string(),
            comment: None,
            track_number: track.to_string(),
            carrier_status: status.code().to_string(),
        };
        ids.push(create(db, dto).await?);
    }
    tracing::info!("Inserted {} test parcels", ids.len());
    Ok(ids)
}

fn generate_exchange_track() -> String {
    let mut rng = rand::thread_rng();
    format!("EXC{:010}", rng.gen_range(0..10_000_000_000u64))
}

/// Продакшен-реализация шва: посылки лежат в этой же БД
pub struct LocalParcelGateway;

#[async_trait]
impl ParcelGateway for LocalParcelGateway {
    async fn can_register_return(&self, db: &DatabaseConnection, parcel_id: Uuid) -> Result<bool> {
        let parcel = repository::get_by_id(db, parcel_id).await?;
        Ok(parcel.map(|p| p.can_register_return()).unwrap_or(false))
    }

    async fn create_exchange(
        &self,
        db: &DatabaseConnection,
        parcel_id: Uuid,
    ) -> Result<ExchangeParcelRef> {
        let source = repository::get_by_id(db, parcel_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Parcel not found: {}", parcel_id))?;

        let parcel = Parcel::new_exchange(
            format!("Обмен: {}", source.base.description),
            generate_exchange_track(),
        );
        repository::insert(db, &parcel).await?;

        tracing::info!(
            "Created exchange parcel {} ({}) for parcel {}",
            parcel.base.id.as_string(),
            parcel.track_number,
            parcel_id
        );
        Ok(ExchangeParcelRef {
            id: parcel.base.id.value(),
            number: parcel.track_number,
        })
    }

    async fn exchange_summary(
        &self,
        db: &DatabaseConnection,
        exchange_parcel_id: Uuid,
    ) -> Result<Option<ExchangeParcelSummary>> {
        let parcel = repository::get_by_id(db, exchange_parcel_id).await?;
        Ok(parcel.map(|p| ExchangeParcelSummary {
            id: p.to_string_id(),
            number: p.track_number.clone(),
            status_label: p.carrier_status.display_name().to_string(),
        }))
    }

    async fn reversal_blocked(
        &self,
        db: &DatabaseConnection,
        exchange_parcel_id: Uuid,
    ) -> Result<Option<String>> {
        let parcel = repository::get_by_id(db, exchange_parcel_id).await?;
        Ok(parcel.and_then(|p| {
            if p.carrier_status.is_pre_dispatch() {
                None
            } else {
                Some(format!(
                    "Обменная посылка уже передана перевозчику (статус: {})",
                    p.carrier_status.display_name()
                ))
            }
        }))
    }
}
