use anyhow::Result;
use chrono::Utc;
use contracts::domain::a002_return_case::aggregate::{CaseState, ReturnCase, ReturnCaseId};
use contracts::domain::a002_return_case::response::CaseListItemDto;
use contracts::domain::common::{BaseAggregate, EntityMetadata};
use sea_orm::entity::prelude::*;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    Statement,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "a002_return_case")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub code: String,
    pub description: String,
    pub comment: Option<String>,
    pub parcel_id: String,
    pub state: String,
    pub reason: String,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub decision_at: Option<chrono::DateTime<chrono::Utc>>,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub reverse_track_number: Option<String>,
    pub receipt_confirmed: bool,
    pub receipt_confirmed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub exchange_parcel_id: Option<String>,
    pub cancel_unavailable_reason: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for ReturnCase {
    fn from(m: Model) -> Self {
        let metadata = EntityMetadata {
            created_at: m.created_at.unwrap_or_else(Utc::now),
            updated_at: m.updated_at.unwrap_or_else(Utc::now),
            is_deleted: false,
            version: m.version,
        };
        let uuid = Uuid::parse_str(&m.id).unwrap_or_else(|_| Uuid::new_v4());
        let parcel_id = Uuid::parse_str(&m.parcel_id)
            .unwrap_or_else(|_| panic!("Bad parcel_id for case {}: {}", m.id, m.parcel_id));
        let state = CaseState::from_code(&m.state)
            .unwrap_or_else(|| panic!("Unknown state for case {}: {}", m.id, m.state));
        let exchange_parcel_id = m
            .exchange_parcel_id
            .as_deref()
            .map(|s| {
                Uuid::parse_str(s)
                    .unwrap_or_else(|_| panic!("Bad exchange_parcel_id for case {}: {}", m.id, s))
            });

        ReturnCase {
            base: BaseAggregate::with_metadata(
                ReturnCaseId(uuid),
                m.code,
                m.description,
                m.comment.clone(),
                metadata,
            ),
            parcel_id,
            state,
            reason: m.reason,
            requested_at: m.requested_at,
            decision_at: m.decision_at,
            closed_at: m.closed_at,
            reverse_track_number: m.reverse_track_number,
            receipt_confirmed: m.receipt_confirmed,
            receipt_confirmed_at: m.receipt_confirmed_at,
            exchange_parcel_id,
            cancel_unavailable_reason: m.cancel_unavailable_reason,
        }
    }
}

fn to_active(case: &ReturnCase) -> ActiveModel {
    ActiveModel {
        id: Set(case.base.id.value().to_string()),
        code: Set(case.base.code.clone()),
        description: Set(case.base.description.clone()),
        comment: Set(case.base.comment.clone()),
        parcel_id: Set(case.parcel_id.to_string()),
        state: Set(case.state.code().to_string()),
        reason: Set(case.reason.clone()),
        requested_at: Set(case.requested_at),
        decision_at: Set(case.decision_at),
        closed_at: Set(case.closed_at),
        reverse_track_number: Set(case.reverse_track_number.clone()),
        receipt_confirmed: Set(case.receipt_confirmed),
        receipt_confirmed_at: Set(case.receipt_confirmed_at),
        exchange_parcel_id: Set(case.exchange_parcel_id.map(|id| id.to_string())),
        cancel_unavailable_reason: Set(case.cancel_unavailable_reason.clone()),
        created_at: Set(Some(case.base.metadata.created_at)),
        updated_at: Set(Some(case.base.metadata.updated_at)),
        version: Set(case.base.metadata.version),
    }
}

pub async fn get_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<ReturnCase>> {
    let result = Entity::find_by_id(id.to_string()).one(db).await?;
    Ok(result.map(Into::into))
}

/// Загрузка по паре (parcel_id, case_id) — так адресуют заявку обе
/// поверхности UI; чужая пара не находит запись
pub async fn get_for_parcel<C: ConnectionTrait>(
    db: &C,
    parcel_id: Uuid,
    case_id: Uuid,
) -> Result<Option<ReturnCase>> {
    let result = Entity::find()
        .filter(Column::Id.eq(case_id.to_string()))
        .filter(Column::ParcelId.eq(parcel_id.to_string()))
        .one(db)
        .await?;
    Ok(result.map(Into::into))
}

/// Незакрытая заявка по посылке (инвариант: не больше одной)
pub async fn get_active_by_parcel<C: ConnectionTrait>(
    db: &C,
    parcel_id: Uuid,
) -> Result<Option<ReturnCase>> {
    let result = Entity::find()
        .filter(Column::ParcelId.eq(parcel_id.to_string()))
        .filter(Column::State.ne(CaseState::Closed.code()))
        .one(db)
        .await?;
    Ok(result.map(Into::into))
}

pub async fn insert<C: ConnectionTrait>(db: &C, case: &ReturnCase) -> Result<(), DbErr> {
    to_active(case).insert(db).await?;
    Ok(())
}

/// Обновление с проверкой версии (optimistic locking)
///
/// Пишет агрегат целиком при совпадении ожидаемой версии строки; `false`
/// означает, что строку успел изменить параллельный запрос и команду надо
/// повторить от свежего снапшота.
pub async fn update_guarded<C: ConnectionTrait>(
    db: &C,
    case: &ReturnCase,
    expected_version: i32,
) -> Result<bool> {
    let mut active = to_active(case);
    // id не обновляем, он ключ отбора
    active.id = sea_orm::ActiveValue::NotSet;

    let result = Entity::update_many()
        .set(active)
        .filter(Column::Id.eq(case.base.id.value().to_string()))
        .filter(Column::Version.eq(expected_version))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Аудит-история закрытых заявок по посылке
pub async fn history_by_parcel<C: ConnectionTrait>(
    db: &C,
    parcel_id: Uuid,
) -> Result<Vec<ReturnCase>> {
    let items: Vec<ReturnCase> = Entity::find()
        .filter(Column::ParcelId.eq(parcel_id.to_string()))
        .filter(Column::State.eq(CaseState::Closed.code()))
        .order_by_desc(Column::ClosedAt)
        .all(db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(items)
}

// ============================================
// SQL-based list with pagination
// ============================================

#[derive(Debug, Clone)]
pub struct CasesListQuery {
    pub state: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub search_track: Option<String>,
    pub sort_by: String,
    pub sort_desc: bool,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug)]
pub struct CasesListResult {
    pub items: Vec<CaseListItemDto>,
    pub total: usize,
}

fn sanitize_like(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

fn build_where_clause(query: &CasesListQuery) -> String {
    let mut conditions = vec!["1 = 1".to_string()];

    if let Some(ref state) = query.state {
        // Значение проверено по таблице состояний до генерации SQL
        if CaseState::from_code(state).is_some() {
            conditions.push(format!("state = '{}'", state));
        }
    }
    if let Some(ref date_from) = query.date_from {
        conditions.push(format!("requested_at >= '{}'", sanitize_like(date_from)));
    }
    if let Some(ref date_to) = query.date_to {
        conditions.push(format!(
            "requested_at <= '{}T23:59:59'",
            sanitize_like(date_to)
        ));
    }
    if let Some(ref search_track) = query.search_track {
        let needle = sanitize_like(search_track);
        if !needle.is_empty() {
            conditions.push(format!("reverse_track_number LIKE '%{}%'", needle));
        }
    }

    conditions.join(" AND ")
}

/// SQL-based list with pagination and filtering
pub async fn list_sql(db: &DatabaseConnection, query: CasesListQuery) -> Result<CasesListResult> {
    let where_clause = build_where_clause(&query);

    // Map sort field to SQL expression
    let sort_column = match query.sort_by.as_str() {
        "requested_at" => "requested_at",
        "closed_at" => "closed_at",
        "state" => "state",
        "code" => "code",
        _ => "requested_at",
    };
    let sort_order = if query.sort_desc { "DESC" } else { "ASC" };

    // Count total
    let count_sql = format!(
        "SELECT COUNT(*) as cnt FROM a002_return_case WHERE {}",
        where_clause
    );
    let count_stmt = Statement::from_string(sea_orm::DatabaseBackend::Sqlite, count_sql);
    let count_result = db.query_one(count_stmt).await?;
    let total: usize = count_result
        .map(|row| row.try_get::<i64>("", "cnt").unwrap_or(0) as usize)
        .unwrap_or(0);

    // Fetch paginated data
    let select_sql = format!(
        r#"
        SELECT
            id,
            parcel_id,
            code,
            state,
            reason,
            requested_at,
            closed_at,
            receipt_confirmed,
            reverse_track_number,
            exchange_parcel_id,
            version
        FROM a002_return_case
        WHERE {}
        ORDER BY {} {}
        LIMIT {} OFFSET {}
        "#,
        where_clause, sort_column, sort_order, query.limit, query.offset
    );

    let stmt = Statement::from_string(sea_orm::DatabaseBackend::Sqlite, select_sql);
    let rows = db.query_all(stmt).await?;

    let items: Vec<CaseListItemDto> = rows
        .into_iter()
        .filter_map(|row| {
            let id: String = row.try_get("", "id").ok()?;
            let parcel_id: String = row.try_get("", "parcel_id").ok()?;
            let code: String = row.try_get("", "code").unwrap_or_default();
            let state_code: String = row.try_get("", "state").ok()?;
            let state = CaseState::from_code(&state_code)?;
            let reason: String = row.try_get("", "reason").unwrap_or_default();
            let requested_at: chrono::DateTime<chrono::Utc> = row.try_get("", "requested_at").ok()?;
            let closed_at: Option<chrono::DateTime<chrono::Utc>> =
                row.try_get("", "closed_at").ok();
            let receipt_confirmed: bool = row.try_get::<i32>("", "receipt_confirmed").unwrap_or(0) == 1;
            let reverse_track_number: Option<String> =
                row.try_get("", "reverse_track_number").ok();
            let exchange_parcel_id: Option<String> = row.try_get("", "exchange_parcel_id").ok();
            let version: i32 = row.try_get("", "version").unwrap_or(0);

            Some(CaseListItemDto {
                id,
                parcel_id,
                code,
                state,
                state_label: state.label().to_string(),
                reason,
                requested_at,
                closed_at,
                receipt_confirmed,
                reverse_track_number,
                has_exchange_parcel: exchange_parcel_id.is_some(),
                version,
            })
        })
        .collect();

    Ok(CasesListResult { items, total })
}

/// Серверные итоги по датасету (с учётом фильтров)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseTotals {
    pub total_records: usize,
    pub open_returns: usize,
    pub open_exchanges: usize,
    pub exchanges_in_progress: usize,
    pub closed: usize,
}

pub async fn totals_sql(db: &DatabaseConnection, query: &CasesListQuery) -> Result<CaseTotals> {
    let where_clause = build_where_clause(query);

    let totals_sql = format!(
        "SELECT
            COUNT(*) as total_records,
            SUM(CASE WHEN state = 'OPEN_RETURN' THEN 1 ELSE 0 END) as open_returns,
            SUM(CASE WHEN state = 'OPEN_EXCHANGE' THEN 1 ELSE 0 END) as open_exchanges,
            SUM(CASE WHEN state = 'EXCHANGE_IN_PROGRESS' THEN 1 ELSE 0 END) as exchanges_in_progress,
            SUM(CASE WHEN state = 'CLOSED' THEN 1 ELSE 0 END) as closed
        FROM a002_return_case
        WHERE {}",
        where_clause
    );

    let stmt = Statement::from_string(sea_orm::DatabaseBackend::Sqlite, totals_sql);
    let result = db.query_one(stmt).await?;

    if let Some(row) = result {
        Ok(CaseTotals {
            total_records: row.try_get::<i64>("", "total_records").unwrap_or(0) as usize,
            open_returns: row.try_get::<i64>("", "open_returns").unwrap_or(0) as usize,
            open_exchanges: row.try_get::<i64>("", "open_exchanges").unwrap_or(0) as usize,
            exchanges_in_progress: row.try_get::<i64>("", "exchanges_in_progress").unwrap_or(0)
                as usize,
            closed: row.try_get::<i64>("", "closed").unwrap_or(0) as usize,
        })
    } else {
        Ok(CaseTotals {
            total_records: 0,
            open_returns: 0,
            open_exchanges: 0,
            exchanges_in_progress: 0,
            closed: 0,
        })
    }
}
