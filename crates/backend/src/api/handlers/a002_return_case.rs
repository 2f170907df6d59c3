use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::Json;
use contracts::domain::a002_return_case::error::CaseError;
use contracts::domain::a002_return_case::events::CaseRowEvent;
use contracts::domain::a002_return_case::request::{CreateCaseDto, UpdateReverseTrackDto};
use contracts::domain::a002_return_case::response::{CaseListItemDto, CaseSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domain::a001_parcel::service::LocalParcelGateway;
use crate::domain::a002_return_case::repository::{CaseTotals, CasesListQuery};
use crate::domain::a002_return_case::{events, repository, service};
use crate::shared::data::db::get_connection;

const GATEWAY: LocalParcelGateway = LocalParcelGateway;

type CaseResult = Result<Json<CaseSnapshot>, (StatusCode, Json<serde_json::Value>)>;

/// Типизированная ошибка движка -> HTTP-ответ
///
/// Код вида ошибки уходит в тело, чтобы клиент ветвился по нему, а не по
/// HTTP-статусу.
fn error_response(err: CaseError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        CaseError::Validation(_) => StatusCode::BAD_REQUEST,
        CaseError::NotFound => StatusCode::NOT_FOUND,
        CaseError::NotEligible(_)
        | CaseError::Closed
        | CaseError::TransitionNotAllowed { .. }
        | CaseError::IdempotencyConflict => StatusCode::CONFLICT,
        CaseError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Return case command failed: {}", err);
    }

    let mut body = json!({
        "error": err.kind(),
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    });
    if let CaseError::TransitionNotAllowed { permission, reason } = &err {
        body["permission"] = json!(permission);
        if let Some(reason) = reason {
            body["reason"] = json!(reason);
        }
    }
    (status, Json(body))
}

fn parse_uuid(value: &str) -> Result<Uuid, (StatusCode, Json<serde_json::Value>)> {
    Uuid::parse_str(value).map_err(|_| {
        error_response(CaseError::Validation("некорректный идентификатор".into()))
    })
}

/// POST /api/a002/return-cases/:parcel_id — создать заявку
pub async fn create_case(Path(parcel_id): Path<String>, Json(dto): Json<CreateCaseDto>) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    service::create_case(get_connection(), &GATEWAY, parcel_id, dto)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /api/a002/return-cases/:parcel_id/:case_id — снапшот заявки
pub async fn get_case(Path((parcel_id, case_id)): Path<(String, String)>) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    let case_id = parse_uuid(&case_id)?;
    service::get_case(get_connection(), &GATEWAY, parcel_id, case_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/a002/return-cases/:parcel_id/:case_id/launch-exchange
pub async fn launch_exchange(Path((parcel_id, case_id)): Path<(String, String)>) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    let case_id = parse_uuid(&case_id)?;
    service::launch_exchange(get_connection(), &GATEWAY, parcel_id, case_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/a002/return-cases/:parcel_id/:case_id/exchange-parcel
pub async fn create_exchange_parcel(
    Path((parcel_id, case_id)): Path<(String, String)>,
) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    let case_id = parse_uuid(&case_id)?;
    service::create_exchange_parcel(get_connection(), &GATEWAY, parcel_id, case_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/a002/return-cases/:parcel_id/:case_id/convert-to-return
pub async fn convert_to_return(Path((parcel_id, case_id)): Path<(String, String)>) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    let case_id = parse_uuid(&case_id)?;
    service::convert_to_return(get_connection(), &GATEWAY, parcel_id, case_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/a002/return-cases/:parcel_id/:case_id/close
pub async fn close_case(Path((parcel_id, case_id)): Path<(String, String)>) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    let case_id = parse_uuid(&case_id)?;
    service::close_case(get_connection(), &GATEWAY, parcel_id, case_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// PUT /api/a002/return-cases/:parcel_id/:case_id/reverse-track
pub async fn update_reverse_track(
    Path((parcel_id, case_id)): Path<(String, String)>,
    Json(dto): Json<UpdateReverseTrackDto>,
) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    let case_id = parse_uuid(&case_id)?;
    service::update_reverse_track(get_connection(), &GATEWAY, parcel_id, case_id, dto)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/a002/return-cases/:parcel_id/:case_id/confirm-receipt
pub async fn confirm_receipt(Path((parcel_id, case_id)): Path<(String, String)>) -> CaseResult {
    let parcel_id = parse_uuid(&parcel_id)?;
    let case_id = parse_uuid(&case_id)?;
    service::confirm_receipt(get_connection(), &GATEWAY, parcel_id, case_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /api/a002/return-cases/:parcel_id/history — закрытые заявки посылки
pub async fn history(
    Path(parcel_id): Path<String>,
) -> Result<Json<Vec<CaseSnapshot>>, (StatusCode, Json<serde_json::Value>)> {
    let parcel_id = parse_uuid(&parcel_id)?;
    service::history(get_connection(), &GATEWAY, parcel_id)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================
// Список с пагинацией (list-view поверхность)
// ============================================

/// Параметры запроса списка
#[derive(Debug, Deserialize)]
pub struct ListCasesQuery {
    pub state: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search_track: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort_by: Option<String>,
    pub sort_desc: Option<bool>,
}

/// Ответ с пагинацией
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedCasesResponse {
    pub items: Vec<CaseListItemDto>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Серверные итоги по всему датасету (с учётом фильтров)
    pub totals: Option<CaseTotals>,
}

/// GET /api/a002/return-cases — список заявок с пагинацией
pub async fn list_cases(
    Query(query): Query<ListCasesQuery>,
) -> Result<Json<PaginatedCasesResponse>, StatusCode> {
    let page_size = query.limit.unwrap_or(100);
    let offset = query.offset.unwrap_or(0);
    let page = if page_size > 0 { offset / page_size } else { 0 };
    let sort_by = query
        .sort_by
        .clone()
        .unwrap_or_else(|| "requested_at".to_string());
    let sort_desc = query.sort_desc.unwrap_or(true);

    let list_query = CasesListQuery {
        state: query.state.clone(),
        date_from: query.date_from.clone(),
        date_to: query.date_to.clone(),
        search_track: query.search_track.clone(),
        sort_by,
        sort_desc,
        limit: page_size,
        offset,
    };

    let result = repository::list_sql(get_connection(), list_query.clone())
        .await
        .map_err(|e| {
            tracing::error!("Failed to list return cases: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let total = result.total;
    let total_pages = if page_size > 0 {
        (total + page_size - 1) / page_size
    } else {
        0
    };

    // Итоги по всему датасету (с учётом фильтров)
    let totals = repository::totals_sql(get_connection(), &list_query).await.ok();

    Ok(Json(PaginatedCasesResponse {
        items: result.items,
        total,
        page,
        page_size,
        total_pages,
        totals,
    }))
}

// ============================================
// Лента построчных событий
// ============================================

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub after_seq: Option<u64>,
}

/// GET /api/a002/return-cases/events?after_seq=N
///
/// Дешёвое частичное обновление строк; полная истина — всегда getCase.
pub async fn list_events(Query(query): Query<EventsQuery>) -> Json<Vec<CaseRowEvent>> {
    Json(events::list_after(query.after_seq.unwrap_or(0)))
}
