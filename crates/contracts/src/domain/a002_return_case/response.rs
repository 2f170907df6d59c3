use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregate::CaseState;
use super::permissions::PermissionSet;

/// Ссылка на созданную обменную посылку (результат фабрики)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeParcelRef {
    pub id: uuid::Uuid,
    pub number: String,
}

/// Сводка по обменной посылке в составе снапшота
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeParcelSummary {
    pub id: String,
    pub number: String,
    pub status_label: String,
}

/// Полный авторитетный снапшот заявки
///
/// Каждая команда (и getCase) возвращает именно его: вызывающая сторона
/// всегда целиком заменяет своё локальное представление, ничего не
/// домешивая. `version` монотонно растёт — устаревший снапшот,
/// пришедший позже свежего, можно отбросить по номеру.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSnapshot {
    pub case_id: String,
    pub parcel_id: String,
    pub state: CaseState,
    pub state_label: String,
    pub reason: String,
    pub comment: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decision_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub reverse_track_number: Option<String>,
    pub receipt_confirmed: bool,
    pub receipt_confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_parcel: Option<ExchangeParcelSummary>,
    pub permissions: PermissionSet,
    /// Подсказка следующего шага (детерминированный текст по состоянию)
    pub hint: String,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_unavailable_reason: Option<String>,
    pub version: i32,
}

/// Строка списка заявок (облегчённый DTO для list-view)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseListItemDto {
    pub id: String,
    pub parcel_id: String,
    pub code: String,
    pub state: CaseState,
    pub state_label: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub receipt_confirmed: bool,
    pub reverse_track_number: Option<String>,
    pub has_exchange_parcel: bool,
    pub version: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::a002_return_case::permissions::PermissionSet;

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = CaseSnapshot {
            case_id: "c1".into(),
            parcel_id: "p1".into(),
            state: CaseState::OpenReturn,
            state_label: CaseState::OpenReturn.label().into(),
            reason: "Брак".into(),
            comment: None,
            requested_at: Utc::now(),
            decision_at: None,
            closed_at: None,
            reverse_track_number: None,
            receipt_confirmed: false,
            receipt_confirmed_at: None,
            exchange_parcel: None,
            permissions: PermissionSet::default(),
            hint: String::new(),
            warnings: vec![],
            cancel_unavailable_reason: None,
            version: 0,
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["state"], "OPEN_RETURN");
        assert!(value.get("caseId").is_some());
        assert!(value.get("receiptConfirmed").is_some());
        assert!(value["permissions"].get("allowLaunchExchange").is_some());
        // Отсутствующая обменная посылка не сериализуется
        assert!(value.get("exchangeParcel").is_none());
        assert!(value.get("cancelUnavailableReason").is_none());
    }

    #[test]
    fn test_exchange_summary_shape() {
        let summary = ExchangeParcelSummary {
            id: "x1".into(),
            number: "EXC0000000001".into(),
            status_label: "Зарегистрирована".into(),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["statusLabel"], "Зарегистрирована");
    }
}
