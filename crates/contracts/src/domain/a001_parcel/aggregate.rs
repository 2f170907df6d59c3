use crate::domain::common::{AggregateId, AggregateRoot, BaseAggregate, EntityMetadata, Origin};
use crate::enums::CarrierStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ID типа для посылки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParcelId(pub Uuid);

impl ParcelId {
    pub fn new(value: Uuid) -> Self {
        Self(value)
    }
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl AggregateId for ParcelId {
    fn as_string(&self) -> String {
        self.0.to_string()
    }
    fn from_string(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(ParcelId::new)
            .map_err(|e| format!("Invalid UUID: {}", e))
    }
}

/// Посылка (агрегат)
///
/// Для движка заявок посылка — внешний коллаборатор: движок читает только
/// признак доступности возврата и статус перевозчика.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parcel {
    #[serde(flatten)]
    pub base: BaseAggregate<ParcelId>,

    /// Трек-номер перевозчика
    #[serde(rename = "trackNumber")]
    pub track_number: String,

    /// Текущий статус у перевозчика
    #[serde(rename = "carrierStatus")]
    pub carrier_status: CarrierStatus,

    /// Дата доставки получателю
    #[serde(rename = "deliveredAt")]
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Посылка создана как обменная по заявке
    #[serde(rename = "isExchange")]
    pub is_exchange: bool,
}

impl Parcel {
    pub fn new_for_insert(
        code: String,
        description: String,
        track_number: String,
        carrier_status: CarrierStatus,
        comment: Option<String>,
    ) -> Self {
        let mut base = BaseAggregate::new(ParcelId::new_v4(), code, description);
        base.comment = comment;
        Self {
            base,
            track_number,
            carrier_status,
            delivered_at: None,
            is_exchange: false,
        }
    }

    /// Создать обменную посылку по заявке
    pub fn new_exchange(description: String, track_number: String) -> Self {
        let id = ParcelId::new_v4();
        let code = format!("EXC-{}", &id.as_string()[..8]);
        let base = BaseAggregate::new(id, code, description);
        Self {
            base,
            track_number,
            carrier_status: CarrierStatus::Registered,
            delivered_at: None,
            is_exchange: true,
        }
    }

    pub fn to_string_id(&self) -> String {
        self.base.id.as_string()
    }

    pub fn touch_updated(&mut self) {
        self.base.touch();
    }

    /// Возврат можно оформить только по доставленной посылке
    pub fn can_register_return(&self) -> bool {
        !self.base.metadata.is_deleted && self.carrier_status == CarrierStatus::Delivered
    }

    /// Сменить статус перевозчика
    pub fn set_carrier_status(&mut self, status: CarrierStatus) {
        self.carrier_status = status;
        if status == CarrierStatus::Delivered && self.delivered_at.is_none() {
            self.delivered_at = Some(chrono::Utc::now());
        }
    }

    pub fn update(&mut self, dto: &ParcelDto) {
        self.base.code = dto.code.clone().unwrap_or_default();
        self.base.description = dto.description.clone();
        self.base.comment = dto.comment.clone();
        self.track_number = dto.track_number.clone();
        if let Some(status) = CarrierStatus::from_code(&dto.carrier_status) {
            self.set_carrier_status(status);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base.description.trim().is_empty() {
            return Err("Описание не может быть пустым".into());
        }
        if self.base.code.trim().is_empty() {
            return Err("Код не может быть пустым".into());
        }
        if self.track_number.trim().is_empty() {
            return Err("Трек-номер обязателен".into());
        }
        Ok(())
    }

    pub fn before_write(&mut self) {
        self.touch_updated();
    }
}

impl AggregateRoot for Parcel {
    type Id = ParcelId;
    fn id(&self) -> Self::Id {
        self.base.id
    }
    fn code(&self) -> &str {
        &self.base.code
    }
    fn description(&self) -> &str {
        &self.base.description
    }
    fn metadata(&self) -> &EntityMetadata {
        &self.base.metadata
    }
    fn metadata_mut(&mut self) -> &mut EntityMetadata {
        &mut self.base.metadata
    }
    fn aggregate_index() -> &'static str {
        "a001"
    }
    fn collection_name() -> &'static str {
        "parcel"
    }
    fn element_name() -> &'static str {
        "Посылка"
    }
    fn list_name() -> &'static str {
        "Посылки"
    }
    fn origin() -> Origin {
        Origin::Carrier
    }
}

// =============================================================================
// DTO
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParcelDto {
    pub id: Option<String>,
    pub code: Option<String>,
    pub description: String,
    pub comment: Option<String>,
    #[serde(rename = "trackNumber")]
    pub track_number: String,
    #[serde(rename = "carrierStatus")]
    pub carrier_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_register_return_only_when_delivered() {
        let mut parcel = Parcel::new_for_insert(
            "P-0001".into(),
            "Посылка покупателю".into(),
            "RA123456789RU".into(),
            CarrierStatus::InTransit,
            None,
        );
        assert!(!parcel.can_register_return());

        parcel.set_carrier_status(CarrierStatus::Delivered);
        assert!(parcel.can_register_return());
        assert!(parcel.delivered_at.is_some());

        parcel.base.metadata.is_deleted = true;
        assert!(!parcel.can_register_return());
    }

    #[test]
    fn test_new_exchange_is_registered() {
        let parcel = Parcel::new_exchange("Обмен по заявке".into(), "EXC0000000042".into());
        assert!(parcel.is_exchange);
        assert_eq!(parcel.carrier_status, CarrierStatus::Registered);
        assert!(parcel.base.code.starts_with("EXC-"));
    }
}
