use crate::domain::common::{AggregateId, AggregateRoot, BaseAggregate, EntityMetadata, Origin};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::CreateCaseDto;

/// ID типа для заявки на возврат/обмен
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReturnCaseId(pub Uuid);

impl ReturnCaseId {
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

impl AggregateId for ReturnCaseId {
    fn as_string(&self) -> String {
        self.0.to_string()
    }
    fn from_string(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(ReturnCaseId::new)
            .map_err(|e| format!("Invalid UUID: {}", e))
    }
}

/// Состояние жизненного цикла заявки
///
/// CLOSED — терминальное: из него нет переходов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseState {
    #[serde(rename = "OPEN_RETURN")]
    OpenReturn,
    #[serde(rename = "OPEN_EXCHANGE")]
    OpenExchange,
    #[serde(rename = "EXCHANGE_IN_PROGRESS")]
    ExchangeInProgress,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl CaseState {
    /// Получить код состояния
    pub fn code(&self) -> &'static str {
        match self {
            CaseState::OpenReturn => "OPEN_RETURN",
            CaseState::OpenExchange => "OPEN_EXCHANGE",
            CaseState::ExchangeInProgress => "EXCHANGE_IN_PROGRESS",
            CaseState::Closed => "CLOSED",
        }
    }

    /// Получить человекочитаемое название (статическая таблица меток)
    pub fn label(&self) -> &'static str {
        match self {
            CaseState::OpenReturn => "Открыт возврат",
            CaseState::OpenExchange => "Открыт обмен",
            CaseState::ExchangeInProgress => "Обмен в пути",
            CaseState::Closed => "Заявка закрыта",
        }
    }

    /// Парсинг из строки
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "OPEN_RETURN" => Some(CaseState::OpenReturn),
            "OPEN_EXCHANGE" => Some(CaseState::OpenExchange),
            "EXCHANGE_IN_PROGRESS" => Some(CaseState::ExchangeInProgress),
            "CLOSED" => Some(CaseState::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Closed)
    }

    /// Заявка в обменной ветке жизненного цикла
    pub fn is_exchange(&self) -> bool {
        matches!(self, CaseState::OpenExchange | CaseState::ExchangeInProgress)
    }
}

impl std::fmt::Display for CaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Заявка на возврат/обмен (агрегат)
///
/// Единственный изменяемый ресурс движка. Все мутации проходят через
/// командный процессор; сама заявка хранит только факты, а набор
/// разрешённых действий каждый раз выводится заново из состояния.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnCase {
    #[serde(flatten)]
    pub base: BaseAggregate<ReturnCaseId>,

    /// Посылка, по которой открыта заявка (a001_parcel.id)
    #[serde(rename = "parcelId")]
    pub parcel_id: Uuid,

    /// Текущее состояние жизненного цикла
    pub state: CaseState,

    /// Причина возврата/обмена (свободный текст при создании)
    pub reason: String,

    /// Когда клиент подал заявку
    #[serde(rename = "requestedAt")]
    pub requested_at: DateTime<Utc>,

    /// Когда принято решение об обмене
    #[serde(rename = "decisionAt")]
    pub decision_at: Option<DateTime<Utc>>,

    /// Когда заявка закрыта; заполнено тогда и только тогда, когда state == CLOSED
    #[serde(rename = "closedAt")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Обратный трек-номер (посылка от клиента к нам)
    #[serde(rename = "reverseTrackNumber")]
    pub reverse_track_number: Option<String>,

    /// Возвращаемый товар физически получен. Однонаправленный флаг:
    /// состояние не меняет, но открывает закрытие обмена.
    #[serde(rename = "receiptConfirmed")]
    pub receipt_confirmed: bool,

    #[serde(rename = "receiptConfirmedAt")]
    pub receipt_confirmed_at: Option<DateTime<Utc>>,

    /// Обменная посылка; заполняется только в OPEN_EXCHANGE / EXCHANGE_IN_PROGRESS
    #[serde(rename = "exchangeParcelId")]
    pub exchange_parcel_id: Option<Uuid>,

    /// Почему отмена обмена недоступна (например, обменная посылка уже отправлена)
    #[serde(rename = "cancelUnavailableReason")]
    pub cancel_unavailable_reason: Option<String>,
}

impl ReturnCase {
    /// Создать заявку по команде клиента
    pub fn new_for_create(parcel_id: Uuid, dto: &CreateCaseDto) -> Self {
        let id = ReturnCaseId::new_v4();
        let code = format!("RC-{}", &id.as_string()[..8]);
        let mut base = BaseAggregate::new(id, code, dto.reason.clone());
        base.comment = dto.comment.clone();

        let (state, decision_at) = if dto.is_exchange {
            // Решение об обмене принято в момент подачи заявки
            (CaseState::OpenExchange, Some(dto.requested_at))
        } else {
            (CaseState::OpenReturn, None)
        };

        Self {
            base,
            parcel_id,
            state,
            reason: dto.reason.clone(),
            requested_at: dto.requested_at,
            decision_at,
            closed_at: None,
            reverse_track_number: dto.reverse_track_number.clone(),
            receipt_confirmed: false,
            receipt_confirmed_at: None,
            exchange_parcel_id: None,
            cancel_unavailable_reason: None,
        }
    }

    pub fn to_string_id(&self) -> String {
        self.base.id.as_string()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    // ========================================================================
    // Переходы. Guard-проверки выполняет командный процессор; методы
    // применяют только эффект перехода.
    // ========================================================================

    /// OPEN_RETURN -> OPEN_EXCHANGE
    pub fn launch_exchange(&mut self, now: DateTime<Utc>) {
        self.state = CaseState::OpenExchange;
        self.decision_at = Some(now);
    }

    /// OPEN_EXCHANGE -> EXCHANGE_IN_PROGRESS, привязка обменной посылки
    pub fn attach_exchange_parcel(&mut self, exchange_parcel_id: Uuid) {
        self.exchange_parcel_id = Some(exchange_parcel_id);
        self.state = CaseState::ExchangeInProgress;
    }

    /// OPEN_EXCHANGE / EXCHANGE_IN_PROGRESS -> OPEN_RETURN.
    /// Обменная посылка не удаляется — только отвязывается от заявки.
    pub fn convert_to_return(&mut self) {
        self.state = CaseState::OpenReturn;
        self.exchange_parcel_id = None;
        self.cancel_unavailable_reason = None;
    }

    /// Любое нетерминальное состояние -> CLOSED
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.state = CaseState::Closed;
        self.closed_at = Some(now);
    }

    /// Однонаправленное подтверждение получения: повторный вызов не
    /// перезаписывает отметку времени и никогда не снимает флаг.
    pub fn confirm_receipt(&mut self, now: DateTime<Utc>) {
        if !self.receipt_confirmed {
            self.receipt_confirmed = true;
            self.receipt_confirmed_at = Some(now);
        }
    }

    /// Обновить обратный трек и/или комментарий (состояние не меняется)
    pub fn update_reverse_track(&mut self, track: Option<String>, comment: Option<String>) {
        if let Some(track) = track {
            self.reverse_track_number = Some(track);
        }
        if comment.is_some() {
            self.base.comment = comment;
        }
    }

    /// Зафиксировать блокировку отмены обмена (downstream-факт)
    pub fn block_cancellation(&mut self, reason: String) {
        self.cancel_unavailable_reason = Some(reason);
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base.code.trim().is_empty() {
            return Err("Код не может быть пустым".into());
        }
        if self.reason.trim().is_empty() {
            return Err("Причина возврата обязательна".into());
        }
        if self.closed_at.is_some() != (self.state == CaseState::Closed) {
            return Err("closedAt заполняется только у закрытой заявки".into());
        }
        if self.exchange_parcel_id.is_some() && !self.state.is_exchange() {
            return Err("Обменная посылка допустима только в обменных состояниях".into());
        }
        Ok(())
    }

    pub fn before_write(&mut self) {
        self.base.touch();
    }
}

impl AggregateRoot for ReturnCase {
    type Id = ReturnCaseId;
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
        "a002"
    }
    fn collection_name() -> &'static str {
        "return_case"
    }
    fn element_name() -> &'static str {
        "Заявка на возврат"
    }
    fn list_name() -> &'static str {
        "Заявки на возврат"
    }
    fn origin() -> Origin {
        Origin::Customer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_dto(is_exchange: bool) -> CreateCaseDto {
        CreateCaseDto {
            reason: "Не подошёл размер".into(),
            comment: Some("Хочу на размер больше".into()),
            reverse_track_number: None,
            is_exchange,
            idempotency_key: "k1".into(),
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_return_case() {
        let case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(false));
        assert_eq!(case.state, CaseState::OpenReturn);
        assert!(case.decision_at.is_none());
        assert!(case.closed_at.is_none());
        assert!(!case.receipt_confirmed);
        assert!(case.base.code.starts_with("RC-"));
        assert!(case.validate().is_ok());
    }

    #[test]
    fn test_new_exchange_case_has_decision_at() {
        let case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(true));
        assert_eq!(case.state, CaseState::OpenExchange);
        assert_eq!(case.decision_at, Some(case.requested_at));
    }

    #[test]
    fn test_exchange_flow_transitions() {
        let mut case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(false));

        case.launch_exchange(Utc::now());
        assert_eq!(case.state, CaseState::OpenExchange);
        assert!(case.decision_at.is_some());

        let exchange_id = Uuid::new_v4();
        case.attach_exchange_parcel(exchange_id);
        assert_eq!(case.state, CaseState::ExchangeInProgress);
        assert_eq!(case.exchange_parcel_id, Some(exchange_id));
        assert!(case.validate().is_ok());

        case.convert_to_return();
        assert_eq!(case.state, CaseState::OpenReturn);
        assert!(case.exchange_parcel_id.is_none());
        assert!(case.cancel_unavailable_reason.is_none());
    }

    #[test]
    fn test_close_sets_closed_at() {
        let mut case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(false));
        case.close(Utc::now());
        assert_eq!(case.state, CaseState::Closed);
        assert!(case.closed_at.is_some());
        assert!(case.is_terminal());
        assert!(case.validate().is_ok());
    }

    #[test]
    fn test_confirm_receipt_is_monotonic() {
        let mut case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(false));
        case.confirm_receipt(Utc::now());
        let first = case.receipt_confirmed_at;
        assert!(case.receipt_confirmed);

        // Повтор не перезаписывает отметку
        case.confirm_receipt(Utc::now());
        assert!(case.receipt_confirmed);
        assert_eq!(case.receipt_confirmed_at, first);
    }

    #[test]
    fn test_update_reverse_track_keeps_existing_on_none() {
        let mut case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(false));
        case.update_reverse_track(Some("RB987654321RU".into()), None);
        assert_eq!(case.reverse_track_number.as_deref(), Some("RB987654321RU"));
        assert_eq!(case.base.comment.as_deref(), Some("Хочу на размер больше"));

        case.update_reverse_track(None, Some("Передал в пункт выдачи".into()));
        assert_eq!(case.reverse_track_number.as_deref(), Some("RB987654321RU"));
        assert_eq!(case.base.comment.as_deref(), Some("Передал в пункт выдачи"));
    }

    #[test]
    fn test_state_codes_roundtrip() {
        for state in [
            CaseState::OpenReturn,
            CaseState::OpenExchange,
            CaseState::ExchangeInProgress,
            CaseState::Closed,
        ] {
            assert_eq!(CaseState::from_code(state.code()), Some(state));
        }
        assert_eq!(CaseState::from_code("UNKNOWN"), None);
    }

    #[test]
    fn test_validate_rejects_inconsistent_rows() {
        let mut case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(false));
        case.closed_at = Some(Utc::now());
        assert!(case.validate().is_err());

        let mut case = ReturnCase::new_for_create(Uuid::new_v4(), &create_dto(false));
        case.exchange_parcel_id = Some(Uuid::new_v4());
        assert!(case.validate().is_err());
    }
}
