use chrono::Utc;
use contracts::domain::a002_return_case::aggregate::{CaseState, ReturnCase};
use contracts::domain::a002_return_case::error::CaseError;
use contracts::domain::a002_return_case::events::CaseRowEvent;
use contracts::domain::a002_return_case::permissions;
use contracts::domain::a002_return_case::request::{CreateCaseDto, UpdateReverseTrackDto};
use contracts::domain::a002_return_case::response::CaseSnapshot;
use contracts::domain::common::AggregateId;
use sea_orm::{DatabaseConnection, TransactionTrait};
use uuid::Uuid;

use super::gateway::ParcelGateway;
use super::{events, idempotency, repository, snapshot};

// ============================================================================
// Командный процессор заявок
//
// Каждая команда: загрузка по (parcel_id, case_id) -> отказ по терминальному
// состоянию -> свежий вывод разрешений -> guard -> эффект -> запись с
// проверкой версии -> полный снапшот. Частичных переходов снаружи не видно:
// либо команда применена целиком, либо заявка осталась как была.
// ============================================================================

fn storage<E: std::fmt::Display>(e: E) -> CaseError {
    CaseError::Storage(e.to_string())
}

fn row_event(case: &ReturnCase) -> CaseRowEvent {
    CaseRowEvent::for_case(case.parcel_id, case.base.id.value(), case.base.metadata.version)
}

async fn load_case(
    db: &DatabaseConnection,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<ReturnCase, CaseError> {
    repository::get_for_parcel(db, parcel_id, case_id)
        .await
        .map_err(storage)?
        .ok_or(CaseError::NotFound)
}

fn ensure_open(case: &ReturnCase) -> Result<(), CaseError> {
    if case.is_terminal() {
        return Err(CaseError::Closed);
    }
    Ok(())
}

/// Записать агрегат с проверкой версии; неудача — конкурентная запись
async fn persist(
    db: &DatabaseConnection,
    case: &mut ReturnCase,
    expected_version: i32,
) -> Result<(), CaseError> {
    case.before_write();
    case.base.metadata.version = expected_version + 1;
    let updated = repository::update_guarded(db, case, expected_version)
        .await
        .map_err(storage)?;
    if !updated {
        return Err(CaseError::Storage(
            "заявка изменена параллельным запросом, повторите команду".into(),
        ));
    }
    Ok(())
}

/// Подтянуть downstream-факт о блокировке отмены обмена
///
/// Возвращает true, если блокировка обнаружена только что (и ещё не
/// сохранена в строке заявки).
async fn refresh_cancel_block(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    case: &mut ReturnCase,
) -> Result<bool, CaseError> {
    if !case.state.is_exchange() || case.cancel_unavailable_reason.is_some() {
        return Ok(false);
    }
    let Some(exchange_parcel_id) = case.exchange_parcel_id else {
        return Ok(false);
    };
    if let Some(reason) = gateway
        .reversal_blocked(db, exchange_parcel_id)
        .await
        .map_err(storage)?
    {
        case.block_cancellation(reason);
        return Ok(true);
    }
    Ok(false)
}

// ============================================================================
// create
// ============================================================================

fn validate_create(dto: &CreateCaseDto) -> Result<(), CaseError> {
    if dto.reason.trim().is_empty() {
        return Err(CaseError::Validation("причина возврата обязательна".into()));
    }
    if dto.idempotency_key.trim().is_empty() {
        return Err(CaseError::Validation(
            "idempotencyKey обязателен для создания заявки".into(),
        ));
    }
    if let Some(track) = &dto.reverse_track_number {
        if track.trim().is_empty() {
            return Err(CaseError::Validation(
                "обратный трек-номер не может быть пустым".into(),
            ));
        }
    }
    Ok(())
}

/// Создать заявку (идемпотентно по клиентскому ключу)
///
/// Леджер и заявка пишутся в одной транзакции; гонку двух одинаковых
/// повторов решает первичный ключ леджера — проигравший перечитывает уже
/// созданную заявку и возвращает её снапшот. Внутри транзакции нет
/// внешних вызовов.
pub async fn create_case(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    dto: CreateCaseDto,
) -> Result<CaseSnapshot, CaseError> {
    validate_create(&dto)?;
    let fingerprint = idempotency::payload_fingerprint(parcel_id, &dto);

    // Быстрый путь: повтор уже обработанного запроса
    if let Some(record) = idempotency::get_by_key(db, &dto.idempotency_key)
        .await
        .map_err(storage)?
    {
        return replay_record(db, gateway, record, &fingerprint).await;
    }

    let eligible = gateway
        .can_register_return(db, parcel_id)
        .await
        .map_err(storage)?;
    if !eligible {
        return Err(CaseError::NotEligible(
            "посылка не найдена или ещё не доставлена".into(),
        ));
    }

    let case = ReturnCase::new_for_create(parcel_id, &dto);
    case.validate().map_err(CaseError::Validation)?;

    let txn = db.begin().await.map_err(storage)?;

    // Повторные проверки внутри транзакции
    if let Some(record) = idempotency::get_by_key(&txn, &dto.idempotency_key)
        .await
        .map_err(storage)?
    {
        txn.rollback().await.map_err(storage)?;
        return replay_record(db, gateway, record, &fingerprint).await;
    }
    if repository::get_active_by_parcel(&txn, parcel_id)
        .await
        .map_err(storage)?
        .is_some()
    {
        txn.rollback().await.map_err(storage)?;
        return Err(CaseError::NotEligible(
            "по посылке уже открыта заявка на возврат".into(),
        ));
    }

    if let Err(err) = repository::insert(&txn, &case).await {
        let _ = txn.rollback().await;
        return handle_create_conflict(db, gateway, err, &dto.idempotency_key, &fingerprint).await;
    }
    if let Err(err) = idempotency::insert(
        &txn,
        &dto.idempotency_key,
        case.base.id.value(),
        &fingerprint,
    )
    .await
    {
        let _ = txn.rollback().await;
        return handle_create_conflict(db, gateway, err, &dto.idempotency_key, &fingerprint).await;
    }

    txn.commit().await.map_err(storage)?;

    let mut event = row_event(&case);
    event.state = Some(case.state);
    event.reverse_track_number = case.reverse_track_number.clone();
    event.comment = case.base.comment.clone();
    events::publish(event);

    tracing::info!(
        "Created return case {} for parcel {} (state: {})",
        case.base.id.as_string(),
        parcel_id,
        case.state
    );
    snapshot::project(db, gateway, &case).await
}

/// Повтор по записи леджера: тот же отпечаток — вернуть созданную заявку
/// без изменений, другой — конфликт
async fn replay_record(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    record: idempotency::Model,
    fingerprint: &str,
) -> Result<CaseSnapshot, CaseError> {
    if record.payload_hash != fingerprint {
        return Err(CaseError::IdempotencyConflict);
    }
    let case_id = Uuid::parse_str(&record.case_id)
        .map_err(|_| CaseError::Storage("леджер содержит некорректный case_id".into()))?;
    let case = repository::get_by_id(db, case_id)
        .await
        .map_err(storage)?
        .ok_or_else(|| CaseError::Storage("леджер ссылается на отсутствующую заявку".into()))?;

    tracing::info!(
        "Replayed create for case {} (idempotency key reuse)",
        record.case_id
    );
    snapshot::project(db, gateway, &case).await
}

/// Разбор нарушения уникальности при создании: гонка по ключу леджера
/// или по активной заявке на посылку
async fn handle_create_conflict(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    err: sea_orm::DbErr,
    key: &str,
    fingerprint: &str,
) -> Result<CaseSnapshot, CaseError> {
    let message = err.to_string();
    if !message.contains("UNIQUE constraint failed") {
        return Err(storage(err));
    }

    // Первым успел параллельный повтор того же запроса
    if let Some(record) = idempotency::get_by_key(db, key).await.map_err(storage)? {
        return replay_record(db, gateway, record, fingerprint).await;
    }

    // Иначе сработал частичный индекс активной заявки
    Err(CaseError::NotEligible(
        "по посылке уже открыта заявка на возврат".into(),
    ))
}

// ============================================================================
// Переходы
// ============================================================================

/// OPEN_RETURN -> OPEN_EXCHANGE
pub async fn launch_exchange(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<CaseSnapshot, CaseError> {
    let mut case = load_case(db, parcel_id, case_id).await?;
    ensure_open(&case)?;

    // Повтор уже применённой команды — no-op успех
    if case.state == CaseState::OpenExchange {
        return snapshot::project(db, gateway, &case).await;
    }

    let perms = permissions::derive(&case);
    if !perms.allow_launch_exchange {
        return Err(CaseError::TransitionNotAllowed {
            permission: permissions::ALLOW_LAUNCH_EXCHANGE,
            reason: None,
        });
    }

    let expected = case.base.metadata.version;
    case.launch_exchange(Utc::now());
    persist(db, &mut case, expected).await?;

    let mut event = row_event(&case);
    event.state = Some(case.state);
    events::publish(event);

    tracing::info!("Case {} switched to exchange", case_id);
    snapshot::project(db, gateway, &case).await
}

/// OPEN_EXCHANGE -> EXCHANGE_IN_PROGRESS: создать и привязать обменную посылку
pub async fn create_exchange_parcel(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<CaseSnapshot, CaseError> {
    let mut case = load_case(db, parcel_id, case_id).await?;
    ensure_open(&case)?;

    // Повтор уже применённой команды — no-op успех
    if case.state == CaseState::ExchangeInProgress && case.exchange_parcel_id.is_some() {
        return snapshot::project(db, gateway, &case).await;
    }

    let perms = permissions::derive(&case);
    if !perms.allow_create_exchange_parcel {
        return Err(CaseError::TransitionNotAllowed {
            permission: permissions::ALLOW_CREATE_EXCHANGE_PARCEL,
            reason: None,
        });
    }

    // Фабрика — внешний вызов, поэтому до записи заявки; проигравшая
    // в гонке версий посылка остаётся не привязанной к заявке
    let exchange = gateway
        .create_exchange(db, parcel_id)
        .await
        .map_err(storage)?;

    let expected = case.base.metadata.version;
    case.attach_exchange_parcel(exchange.id);
    persist(db, &mut case, expected).await?;

    let mut event = row_event(&case);
    event.state = Some(case.state);
    event.exchange_parcel_id = Some(exchange.id.to_string());
    events::publish(event);

    tracing::info!(
        "Case {} got exchange parcel {} ({})",
        case_id,
        exchange.id,
        exchange.number
    );
    snapshot::project(db, gateway, &case).await
}

/// OPEN_EXCHANGE / EXCHANGE_IN_PROGRESS -> OPEN_RETURN
pub async fn convert_to_return(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<CaseSnapshot, CaseError> {
    let mut case = load_case(db, parcel_id, case_id).await?;
    ensure_open(&case)?;

    // Повтор уже применённой команды — no-op успех
    if case.state == CaseState::OpenReturn {
        return snapshot::project(db, gateway, &case).await;
    }

    let newly_blocked = refresh_cancel_block(db, gateway, &mut case).await?;

    let perms = permissions::derive(&case);
    if !perms.allow_convert_to_return {
        let reason = case.cancel_unavailable_reason.clone();
        if newly_blocked {
            // Кэшируем причину блокировки в строке заявки, чтобы её видели
            // оба UI; отказ команды от неудачи кэширования не зависит
            let expected = case.base.metadata.version;
            if let Err(e) = persist(db, &mut case, expected).await {
                tracing::warn!("Failed to cache cancel block for case {}: {}", case_id, e);
            }
        }
        return Err(CaseError::TransitionNotAllowed {
            permission: permissions::ALLOW_CONVERT_TO_RETURN,
            reason,
        });
    }

    let expected = case.base.metadata.version;
    case.convert_to_return();
    persist(db, &mut case, expected).await?;

    let mut event = row_event(&case);
    event.state = Some(case.state);
    events::publish(event);

    tracing::info!("Case {} converted back to plain return", case_id);
    snapshot::project(db, gateway, &case).await
}

/// Любое нетерминальное состояние -> CLOSED
pub async fn close_case(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<CaseSnapshot, CaseError> {
    let mut case = load_case(db, parcel_id, case_id).await?;
    ensure_open(&case)?;

    let perms = permissions::derive(&case);
    if !perms.allow_close {
        let reason = if case.state.is_exchange() && !case.receipt_confirmed {
            Some("возврат ещё не получен — подтвердите получение перед закрытием обмена".into())
        } else {
            None
        };
        return Err(CaseError::TransitionNotAllowed {
            permission: permissions::ALLOW_CLOSE,
            reason,
        });
    }

    let expected = case.base.metadata.version;
    case.close(Utc::now());
    persist(db, &mut case, expected).await?;

    let mut event = row_event(&case);
    event.state = Some(case.state);
    event.closed_at = case.closed_at;
    events::publish(event);

    tracing::info!("Case {} closed", case_id);
    snapshot::project(db, gateway, &case).await
}

/// Обновить обратный трек и/или комментарий (состояние не меняется)
pub async fn update_reverse_track(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    case_id: Uuid,
    dto: UpdateReverseTrackDto,
) -> Result<CaseSnapshot, CaseError> {
    if dto.reverse_track_number.is_none() && dto.comment.is_none() {
        return Err(CaseError::Validation(
            "нужно передать трек-номер или комментарий".into(),
        ));
    }
    if let Some(track) = &dto.reverse_track_number {
        if track.trim().is_empty() {
            return Err(CaseError::Validation(
                "обратный трек-номер не может быть пустым".into(),
            ));
        }
    }

    let mut case = load_case(db, parcel_id, case_id).await?;
    ensure_open(&case)?;

    let perms = permissions::derive(&case);
    if !perms.allow_update_reverse_track {
        return Err(CaseError::TransitionNotAllowed {
            permission: permissions::ALLOW_UPDATE_REVERSE_TRACK,
            reason: None,
        });
    }

    let expected = case.base.metadata.version;
    case.update_reverse_track(dto.reverse_track_number.clone(), dto.comment.clone());
    persist(db, &mut case, expected).await?;

    let mut event = row_event(&case);
    event.reverse_track_number = dto.reverse_track_number;
    event.comment = dto.comment;
    events::publish(event);

    snapshot::project(db, gateway, &case).await
}

/// Подтвердить физическое получение возврата (однонаправленный флаг)
pub async fn confirm_receipt(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<CaseSnapshot, CaseError> {
    let mut case = load_case(db, parcel_id, case_id).await?;
    ensure_open(&case)?;

    // Повтор уже применённой команды — no-op успех
    if case.receipt_confirmed {
        return snapshot::project(db, gateway, &case).await;
    }

    let perms = permissions::derive(&case);
    if !perms.allow_confirm_receipt {
        return Err(CaseError::TransitionNotAllowed {
            permission: permissions::ALLOW_CONFIRM_RECEIPT,
            reason: None,
        });
    }

    let expected = case.base.metadata.version;
    case.confirm_receipt(Utc::now());
    persist(db, &mut case, expected).await?;

    let mut event = row_event(&case);
    event.receipt_confirmed = Some(true);
    events::publish(event);

    tracing::info!("Case {} receipt confirmed", case_id);
    snapshot::project(db, gateway, &case).await
}

// ============================================================================
// Чтения
// ============================================================================

/// Полный снапшот заявки
pub async fn get_case(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<CaseSnapshot, CaseError> {
    let mut case = load_case(db, parcel_id, case_id).await?;
    // Downstream-факт подтягиваем и в чтении, но строку не переписываем:
    // сохранённая копия — только кэш
    refresh_cancel_block(db, gateway, &mut case).await?;
    snapshot::project(db, gateway, &case).await
}

/// Аудит-история закрытых заявок по посылке
pub async fn history(
    db: &DatabaseConnection,
    gateway: &dyn ParcelGateway,
    parcel_id: Uuid,
) -> Result<Vec<CaseSnapshot>, CaseError> {
    let cases = repository::history_by_parcel(db, parcel_id)
        .await
        .map_err(storage)?;
    let mut snapshots = Vec::with_capacity(cases.len());
    for case in &cases {
        snapshots.push(snapshot::project(db, gateway, case).await?);
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::a001_parcel::service as parcel_service;
    use crate::domain::a001_parcel::service::LocalParcelGateway;
    use crate::shared::data::db;
    use contracts::domain::a001_parcel::aggregate::ParcelDto;
    use contracts::enums::CarrierStatus;

    const GW: LocalParcelGateway = LocalParcelGateway;

    async fn test_db() -> DatabaseConnection {
        let path = format!("target/test-db/a002-{}.db", Uuid::new_v4());
        db::connect(&path).await.expect("test db")
    }

    async fn seed_parcel(db: &DatabaseConnection, status: CarrierStatus) -> Uuid {
        let suffix = Uuid::new_v4().simple().to_string();
        let dto = ParcelDto {
            id: None,
            code: None,
            description: "Тестовая посылка".into(),
            comment: None,
            track_number: format!("RA{}RU", &suffix[..9]),
            carrier_status: status.code().to_string(),
        };
        parcel_service::create(db, dto).await.expect("seed parcel")
    }

    fn dto(key: &str, reason: &str, is_exchange: bool) -> CreateCaseDto {
        CreateCaseDto {
            reason: reason.into(),
            comment: None,
            reverse_track_number: None,
            is_exchange,
            idempotency_key: key.into(),
            requested_at: Utc::now(),
        }
    }

    async fn case_in_progress(db: &DatabaseConnection, parcel_id: Uuid) -> CaseSnapshot {
        let snap = create_case(db, &GW, parcel_id, dto("flow", "Брак", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");
        launch_exchange(db, &GW, parcel_id, case_id)
            .await
            .expect("launch");
        create_exchange_parcel(db, &GW, parcel_id, case_id)
            .await
            .expect("exchange parcel")
    }

    #[tokio::test]
    async fn scenario_a_create_return_case() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Не подошёл размер", false))
            .await
            .expect("create");

        assert_eq!(snap.state, CaseState::OpenReturn);
        assert_eq!(snap.state_label, "Открыт возврат");
        assert!(snap.permissions.allow_launch_exchange);
        assert!(snap.permissions.allow_close);
        assert!(!snap.permissions.allow_create_exchange_parcel);
        assert_eq!(snap.version, 0);
        assert!(snap.closed_at.is_none());
    }

    #[tokio::test]
    async fn scenario_b_exchange_flow() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Не подошёл размер", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");

        let snap = launch_exchange(&db, &GW, parcel_id, case_id)
            .await
            .expect("launch");
        assert_eq!(snap.state, CaseState::OpenExchange);
        assert!(snap.permissions.allow_create_exchange_parcel);
        assert!(snap.decision_at.is_some());

        let snap = create_exchange_parcel(&db, &GW, parcel_id, case_id)
            .await
            .expect("exchange parcel");
        assert_eq!(snap.state, CaseState::ExchangeInProgress);
        assert!(!snap.permissions.allow_create_exchange_parcel);
        let exchange = snap.exchange_parcel.expect("summary");
        assert!(!exchange.number.is_empty());
        assert_eq!(exchange.status_label, "Зарегистрирована");
    }

    #[tokio::test]
    async fn scenario_c_close_requires_receipt() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;
        let snap = case_in_progress(&db, parcel_id).await;
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");

        let err = close_case(&db, &GW, parcel_id, case_id)
            .await
            .expect_err("close must be blocked");
        match err {
            CaseError::TransitionNotAllowed { permission, reason } => {
                assert_eq!(permission, permissions::ALLOW_CLOSE);
                assert!(reason.expect("reason").contains("подтвердите получение"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        confirm_receipt(&db, &GW, parcel_id, case_id)
            .await
            .expect("confirm receipt");

        let snap = close_case(&db, &GW, parcel_id, case_id)
            .await
            .expect("close after receipt");
        assert_eq!(snap.state, CaseState::Closed);
        assert!(snap.closed_at.is_some());
        assert_eq!(snap.permissions, Default::default());
    }

    #[tokio::test]
    async fn scenario_d_same_key_different_payload_conflicts() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");

        let err = create_case(&db, &GW, parcel_id, dto("k1", "Передумал", false))
            .await
            .expect_err("conflict expected");
        assert!(matches!(err, CaseError::IdempotencyConflict));
    }

    #[tokio::test]
    async fn create_replays_same_case_for_same_payload() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let payload = dto("k1", "Брак", false);
        let first = create_case(&db, &GW, parcel_id, payload.clone())
            .await
            .expect("create");
        let second = create_case(&db, &GW, parcel_id, payload)
            .await
            .expect("replay");

        // Ровно одна заявка, повтор вернул её же без изменений
        assert_eq!(first.case_id, second.case_id);
        assert_eq!(first.version, second.version);
        assert_eq!(first.state, second.state);
    }

    #[tokio::test]
    async fn create_rejects_second_active_case() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");

        let err = create_case(&db, &GW, parcel_id, dto("k2", "Ещё одна", false))
            .await
            .expect_err("second active case must be rejected");
        assert!(matches!(err, CaseError::NotEligible(_)));
    }

    #[tokio::test]
    async fn create_rejects_ineligible_parcel() {
        let db = test_db().await;
        let in_transit = seed_parcel(&db, CarrierStatus::InTransit).await;

        let err = create_case(&db, &GW, in_transit, dto("k1", "Брак", false))
            .await
            .expect_err("not delivered yet");
        assert!(matches!(err, CaseError::NotEligible(_)));

        let err = create_case(&db, &GW, Uuid::new_v4(), dto("k2", "Брак", false))
            .await
            .expect_err("unknown parcel");
        assert!(matches!(err, CaseError::NotEligible(_)));
    }

    #[tokio::test]
    async fn closed_case_rejects_every_command() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");
        close_case(&db, &GW, parcel_id, case_id)
            .await
            .expect("close");

        assert!(matches!(
            launch_exchange(&db, &GW, parcel_id, case_id).await,
            Err(CaseError::Closed)
        ));
        assert!(matches!(
            create_exchange_parcel(&db, &GW, parcel_id, case_id).await,
            Err(CaseError::Closed)
        ));
        assert!(matches!(
            convert_to_return(&db, &GW, parcel_id, case_id).await,
            Err(CaseError::Closed)
        ));
        assert!(matches!(
            close_case(&db, &GW, parcel_id, case_id).await,
            Err(CaseError::Closed)
        ));
        assert!(matches!(
            confirm_receipt(&db, &GW, parcel_id, case_id).await,
            Err(CaseError::Closed)
        ));
        let track = UpdateReverseTrackDto {
            reverse_track_number: Some("RB1".into()),
            comment: None,
        };
        assert!(matches!(
            update_reverse_track(&db, &GW, parcel_id, case_id, track).await,
            Err(CaseError::Closed)
        ));

        // Чтение остаётся доступным
        let snap = get_case(&db, &GW, parcel_id, case_id).await.expect("get");
        assert_eq!(snap.state, CaseState::Closed);
    }

    #[tokio::test]
    async fn convert_to_return_detaches_exchange_parcel() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;
        let snap = case_in_progress(&db, parcel_id).await;
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");

        let snap = convert_to_return(&db, &GW, parcel_id, case_id)
            .await
            .expect("convert");
        assert_eq!(snap.state, CaseState::OpenReturn);
        assert!(snap.exchange_parcel.is_none());
        // Возврат снова можно закрыть свободно
        assert!(snap.permissions.allow_close);

        // Повтор команды — no-op успех
        let again = convert_to_return(&db, &GW, parcel_id, case_id)
            .await
            .expect("retry convert");
        assert_eq!(again.state, CaseState::OpenReturn);
        assert_eq!(again.version, snap.version);
    }

    #[tokio::test]
    async fn convert_is_blocked_after_exchange_dispatch() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;
        let snap = case_in_progress(&db, parcel_id).await;
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");
        let exchange_id =
            Uuid::parse_str(&snap.exchange_parcel.expect("summary").id).expect("exchange id");

        // Обменная посылка уехала к перевозчику
        parcel_service::set_carrier_status(&db, exchange_id, CarrierStatus::InTransit)
            .await
            .expect("dispatch");

        let err = convert_to_return(&db, &GW, parcel_id, case_id)
            .await
            .expect_err("reversal must be blocked");
        match err {
            CaseError::TransitionNotAllowed { permission, reason } => {
                assert_eq!(permission, permissions::ALLOW_CONVERT_TO_RETURN);
                assert!(reason.expect("reason").contains("передана перевозчику"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Причина блокировки видна в снапшоте обеим поверхностям UI
        let snap = get_case(&db, &GW, parcel_id, case_id).await.expect("get");
        assert!(snap.cancel_unavailable_reason.is_some());
        assert!(!snap.permissions.allow_convert_to_return);
    }

    #[tokio::test]
    async fn update_reverse_track_publishes_row_event() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");

        let upd = UpdateReverseTrackDto {
            reverse_track_number: Some("RB987654321RU".into()),
            comment: Some("Сдал в пункт выдачи".into()),
        };
        let snap = update_reverse_track(&db, &GW, parcel_id, case_id, upd)
            .await
            .expect("update");
        assert_eq!(snap.reverse_track_number.as_deref(), Some("RB987654321RU"));
        assert_eq!(snap.comment.as_deref(), Some("Сдал в пункт выдачи"));
        assert_eq!(snap.state, CaseState::OpenReturn);
        assert_eq!(snap.version, 1);

        // Лента событий общая для процесса — фильтруем по заявке
        let mine: Vec<_> = events::list_after(0)
            .into_iter()
            .filter(|e| e.case_id == snap.case_id)
            .collect();
        assert!(mine
            .iter()
            .any(|e| e.reverse_track_number.as_deref() == Some("RB987654321RU")));

        let err = update_reverse_track(&db, &GW, parcel_id, case_id, Default::default())
            .await
            .expect_err("empty update");
        assert!(matches!(err, CaseError::Validation(_)));
    }

    #[tokio::test]
    async fn confirm_receipt_is_idempotent() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");

        let first = confirm_receipt(&db, &GW, parcel_id, case_id)
            .await
            .expect("confirm");
        assert!(first.receipt_confirmed);
        assert!(first.receipt_confirmed_at.is_some());
        assert_eq!(first.version, 1);

        // Повтор — no-op успех, отметка времени не переписывается
        let second = confirm_receipt(&db, &GW, parcel_id, case_id)
            .await
            .expect("retry confirm");
        assert!(second.receipt_confirmed);
        assert_eq!(second.receipt_confirmed_at, first.receipt_confirmed_at);
        assert_eq!(second.version, first.version);
    }

    #[tokio::test]
    async fn launch_exchange_retry_is_noop() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");

        let first = launch_exchange(&db, &GW, parcel_id, case_id)
            .await
            .expect("launch");
        let second = launch_exchange(&db, &GW, parcel_id, case_id)
            .await
            .expect("retry launch");
        assert_eq!(second.state, CaseState::OpenExchange);
        assert_eq!(second.version, first.version);
    }

    #[tokio::test]
    async fn closed_case_releases_parcel_for_new_case() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");
        close_case(&db, &GW, parcel_id, case_id)
            .await
            .expect("close");

        // Посылка снова доступна, закрытая заявка ушла в историю
        let snap = create_case(&db, &GW, parcel_id, dto("k2", "Второй возврат", false))
            .await
            .expect("second case");
        assert_eq!(snap.state, CaseState::OpenReturn);

        let history = history(&db, &GW, parcel_id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].case_id, case_id.to_string());
        assert_eq!(history[0].state, CaseState::Closed);
    }

    #[tokio::test]
    async fn unknown_case_is_not_found() {
        let db = test_db().await;
        let parcel_id = seed_parcel(&db, CarrierStatus::Delivered).await;

        let err = get_case(&db, &GW, parcel_id, Uuid::new_v4())
            .await
            .expect_err("missing case");
        assert!(matches!(err, CaseError::NotFound));

        // Чужая пара (parcel_id, case_id) тоже не находит заявку
        let snap = create_case(&db, &GW, parcel_id, dto("k1", "Брак", false))
            .await
            .expect("create");
        let case_id = Uuid::parse_str(&snap.case_id).expect("case id");
        let other_parcel = seed_parcel(&db, CarrierStatus::Delivered).await;
        let err = get_case(&db, &GW, other_parcel, case_id)
            .await
            .expect_err("foreign pair");
        assert!(matches!(err, CaseError::NotFound));
    }
}
