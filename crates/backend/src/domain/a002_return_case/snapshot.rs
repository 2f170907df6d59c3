use contracts::domain::a002_return_case::aggregate::{CaseState, ReturnCase};
use contracts::domain::a002_return_case::error::CaseError;
use contracts::domain::a002_return_case::permissions::{self, PermissionSet};
use contracts::domain::a002_return_case::response::{CaseSnapshot, ExchangeParcelSummary};
use contracts::domain::common::AggregateId;
use sea_orm::DatabaseConnection;

use super::gateway::ParcelGateway;

/// Собрать полный снапшот заявки
///
/// Сводку обменной посылки вытягивает через шов; сами разрешения проектор
/// не выводит — их всегда отдаёт `permissions::derive`, чтобы показанные
/// и проверяемые флаги совпадали по построению.
pub async fn project(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    case: &ReturnCase,
) -> Result<CaseSnapshot, CaseError> {
    let exchange_parcel = match case.exchange_parcel_id {
        Some(id) => gateway
            .exchange_summary(db, id)
            .await
            .map_err(|e| CaseError::Storage(e.to_string()))?,
        None => None,
    };
    Ok(build(case, exchange_parcel))
}

/// Чистая сборка снапшота из заявки и уже загруженной сводки
pub fn build(case: &ReturnCase, exchange_parcel: Option<ExchangeParcelSummary>) -> CaseSnapshot {
    let perms = permissions::derive(case);

    CaseSnapshot {
        case_id: case.base.id.as_string(),
        parcel_id: case.parcel_id.to_string(),
        state: case.state,
        state_label: case.state.label().to_string(),
        reason: case.reason.clone(),
        comment: case.base.comment.clone(),
        requested_at: case.requested_at,
        decision_at: case.decision_at,
        closed_at: case.closed_at,
        reverse_track_number: case.reverse_track_number.clone(),
        receipt_confirmed: case.receipt_confirmed,
        receipt_confirmed_at: case.receipt_confirmed_at,
        exchange_parcel,
        hint: hint_for(case, &perms),
        warnings: warnings_for(case, &perms),
        cancel_unavailable_reason: case.cancel_unavailable_reason.clone(),
        version: case.base.metadata.version,
        permissions: perms,
    }
}

/// Подсказка следующего шага — детерминированный текст по состоянию
fn hint_for(case: &ReturnCase, perms: &PermissionSet) -> String {
    match case.state {
        CaseState::Closed => "Заявка закрыта".to_string(),
        CaseState::OpenReturn => {
            "Можно оформить обмен или закрыть заявку возврата".to_string()
        }
        CaseState::OpenExchange if perms.allow_create_exchange_parcel => {
            "Создайте обменную посылку".to_string()
        }
        CaseState::OpenExchange => "Обмен оформлен, ожидается обменная посылка".to_string(),
        CaseState::ExchangeInProgress if !case.receipt_confirmed => {
            "Подтвердите получение возврата — до этого закрыть обмен нельзя".to_string()
        }
        CaseState::ExchangeInProgress => "Возврат получен, заявку можно закрыть".to_string(),
    }
}

/// Предупреждения — также детерминированный текст по состоянию
fn warnings_for(case: &ReturnCase, perms: &PermissionSet) -> Vec<String> {
    let mut warnings = Vec::new();

    if case.state.is_exchange() && !case.receipt_confirmed && !perms.allow_close {
        warnings.push("Возврат ещё не получен — закрытие обмена заблокировано".to_string());
    }
    if let Some(reason) = &case.cancel_unavailable_reason {
        warnings.push(reason.clone());
    }
    if case.state != CaseState::Closed && case.reverse_track_number.is_none() {
        warnings.push("Не указан обратный трек-номер".to_string());
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::domain::a002_return_case::request::CreateCaseDto;
    use uuid::Uuid;

    fn case(is_exchange: bool) -> ReturnCase {
        let dto = CreateCaseDto {
            reason: "Не подошёл цвет".into(),
            comment: None,
            reverse_track_number: Some("RB111222333RU".into()),
            is_exchange,
            idempotency_key: "key".into(),
            requested_at: Utc::now(),
        };
        ReturnCase::new_for_create(Uuid::new_v4(), &dto)
    }

    #[test]
    fn test_build_mirrors_case_fields() {
        let case = case(false);
        let snapshot = build(&case, None);

        assert_eq!(snapshot.case_id, case.base.id.as_string());
        assert_eq!(snapshot.parcel_id, case.parcel_id.to_string());
        assert_eq!(snapshot.state, CaseState::OpenReturn);
        assert_eq!(snapshot.state_label, "Открыт возврат");
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.exchange_parcel.is_none());
        // Показанные флаги — те же, что отдаёт derive
        assert_eq!(snapshot.permissions, permissions::derive(&case));
    }

    #[test]
    fn test_hint_for_open_exchange() {
        let mut case = case(true);
        let snapshot = build(&case, None);
        assert_eq!(snapshot.hint, "Создайте обменную посылку");

        case.attach_exchange_parcel(Uuid::new_v4());
        let snapshot = build(&case, None);
        assert_eq!(
            snapshot.hint,
            "Подтвердите получение возврата — до этого закрыть обмен нельзя"
        );

        case.confirm_receipt(Utc::now());
        let snapshot = build(&case, None);
        assert_eq!(snapshot.hint, "Возврат получен, заявку можно закрыть");
    }

    #[test]
    fn test_warnings_for_blocked_close_and_missing_track() {
        let mut case = case(true);
        case.attach_exchange_parcel(Uuid::new_v4());
        case.reverse_track_number = None;

        let snapshot = build(&case, None);
        assert!(snapshot
            .warnings
            .contains(&"Возврат ещё не получен — закрытие обмена заблокировано".to_string()));
        assert!(snapshot
            .warnings
            .contains(&"Не указан обратный трек-номер".to_string()));
    }

    #[test]
    fn test_cancel_reason_surfaces_in_warnings() {
        let mut case = case(true);
        case.attach_exchange_parcel(Uuid::new_v4());
        case.block_cancellation("Обменная посылка уже передана перевозчику".into());

        let snapshot = build(&case, None);
        assert_eq!(
            snapshot.cancel_unavailable_reason.as_deref(),
            Some("Обменная посылка уже передана перевозчику")
        );
        assert!(snapshot
            .warnings
            .iter()
            .any(|w| w.contains("уже передана перевозчику")));
        assert!(!snapshot.permissions.allow_convert_to_return);
    }

    #[test]
    fn test_closed_case_snapshot() {
        let mut case = case(false);
        case.close(Utc::now());
        let snapshot = build(&case, None);
        assert_eq!(snapshot.hint, "Заявка закрыта");
        assert!(snapshot.closed_at.is_some());
        assert_eq!(snapshot.permissions, PermissionSet::default());
        assert!(snapshot.warnings.is_empty());
    }
}
