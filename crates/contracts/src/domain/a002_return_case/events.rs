use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregate::CaseState;

/// Частичное построчное обновление заявки
///
/// Публикуется после каждой применённой команды. Слои представления могут
/// подписаться на ленту и дёшево обновить одну строку списка, не
/// перезапрашивая снапшот; заполнены только изменившиеся поля. Это
/// оптимизация: полная истина всегда доступна через getCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRowEvent {
    /// Монотонный номер события в ленте
    pub seq: u64,
    pub parcel_id: String,
    pub case_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CaseState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse_track_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_confirmed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_parcel_id: Option<String>,
    /// Версия заявки после применения команды
    pub version: i32,
}

impl CaseRowEvent {
    /// Пустое событие по заявке (изменившиеся поля заполняет отправитель)
    pub fn for_case(parcel_id: uuid::Uuid, case_id: uuid::Uuid, version: i32) -> Self {
        Self {
            seq: 0,
            parcel_id: parcel_id.to_string(),
            case_id: case_id.to_string(),
            state: None,
            reverse_track_number: None,
            comment: None,
            receipt_confirmed: None,
            closed_at: None,
            exchange_parcel_id: None,
            version,
        }
    }
}
