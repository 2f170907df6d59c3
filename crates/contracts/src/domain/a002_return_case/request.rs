use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Команда создания заявки
///
/// `idempotency_key` выдаёт клиент; повтор запроса с тем же ключом и тем же
/// содержимым возвращает уже созданную заявку, а не дубликат.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCaseDto {
    pub reason: String,
    pub comment: Option<String>,
    #[serde(rename = "reverseTrackNumber")]
    pub reverse_track_number: Option<String>,
    #[serde(rename = "isExchange")]
    pub is_exchange: bool,
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(rename = "requestedAt")]
    pub requested_at: DateTime<Utc>,
}

/// Команда обновления обратного трека и/или комментария
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateReverseTrackDto {
    #[serde(rename = "reverseTrackNumber")]
    pub reverse_track_number: Option<String>,
    pub comment: Option<String>,
}
