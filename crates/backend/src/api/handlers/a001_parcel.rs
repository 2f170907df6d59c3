use axum::{extract::Path, Json};
use serde::Deserialize;
use serde_json::json;

use crate::domain::a001_parcel;
use crate::shared::data::db::get_connection;
use contracts::enums::CarrierStatus;

/// GET /api/a001/parcels
pub async fn list_all() -> Result<
    Json<Vec<contracts::domain::a001_parcel::aggregate::Parcel>>,
    axum::http::StatusCode,
> {
    match a001_parcel::service::list_all(get_connection()).await {
        Ok(v) => Ok(Json(v)),
        Err(e) => {
            tracing::error!("Failed to list parcels: {}", e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/a001/parcels/:id
pub async fn get_by_id(
    Path(id): Path<String>,
) -> Result<Json<contracts::domain::a001_parcel::aggregate::Parcel>, axum::http::StatusCode> {
    let uuid = match uuid::Uuid::parse_str(&id) {
        Ok(uuid) => uuid,
        Err(_) => return Err(axum::http::StatusCode::BAD_REQUEST),
    };
    match a001_parcel::service::get_by_id(get_connection(), uuid).await {
        Ok(Some(v)) => Ok(Json(v)),
        Ok(None) => Err(axum::http::StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get parcel {}: {}", id, e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/a001/parcels
pub async fn upsert(
    Json(dto): Json<contracts::domain::a001_parcel::aggregate::ParcelDto>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    let result = if dto.id.is_some() {
        a001_parcel::service::update(get_connection(), dto)
            .await
            .map(|_| uuid::Uuid::nil().to_string())
    } else {
        a001_parcel::service::create(get_connection(), dto)
            .await
            .map(|id| id.to_string())
    };
    match result {
        Ok(id) => Ok(Json(json!({"id": id}))),
        Err(e) => {
            tracing::error!("Failed to upsert parcel: {}", e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// DELETE /api/a001/parcels/:id
pub async fn delete(Path(id): Path<String>) -> Result<(), axum::http::StatusCode> {
    let uuid = match uuid::Uuid::parse_str(&id) {
        Ok(uuid) => uuid,
        Err(_) => return Err(axum::http::StatusCode::BAD_REQUEST),
    };
    match a001_parcel::service::delete(get_connection(), uuid).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(axum::http::StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete parcel {}: {}", id, e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

/// POST /api/a001/parcels/:id/status — ручная смена статуса перевозчика
pub async fn set_status(
    Path(id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<contracts::domain::a001_parcel::aggregate::Parcel>, axum::http::StatusCode> {
    let uuid = match uuid::Uuid::parse_str(&id) {
        Ok(uuid) => uuid,
        Err(_) => return Err(axum::http::StatusCode::BAD_REQUEST),
    };
    let status = match CarrierStatus::from_code(&req.status) {
        Some(status) => status,
        None => return Err(axum::http::StatusCode::BAD_REQUEST),
    };
    match a001_parcel::service::set_carrier_status(get_connection(), uuid, status).await {
        Ok(parcel) => Ok(Json(parcel)),
        Err(e) => {
            tracing::error!("Failed to set parcel {} status: {}", id, e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/a001/parcels/:id/can-register-return
pub async fn can_register_return(
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    let uuid = match uuid::Uuid::parse_str(&id) {
        Ok(uuid) => uuid,
        Err(_) => return Err(axum::http::StatusCode::BAD_REQUEST),
    };
    match a001_parcel::service::get_by_id(get_connection(), uuid).await {
        Ok(parcel) => {
            let eligible = parcel.map(|p| p.can_register_return()).unwrap_or(false);
            Ok(Json(json!({"eligible": eligible})))
        }
        Err(e) => {
            tracing::error!("Failed to check parcel {} eligibility: {}", id, e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/a001/parcels/testdata
pub async fn insert_test_data() -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
    match a001_parcel::service::insert_test_data(get_connection()).await {
        Ok(ids) => Ok(Json(json!({
            "success": true,
            "inserted": ids.len(),
        }))),
        Err(e) => {
            tracing::error!("Failed to insert test parcels: {}", e);
            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
