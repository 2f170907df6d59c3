use thiserror::Error;

/// Типизированные ошибки командного процессора
///
/// Ошибки возвращаются как значения и никогда не пересекают границу
/// команда/снапшот неструктурированными: вызывающая сторона ветвится по
/// виду ошибки, чтобы решить, повторять ли запрос.
#[derive(Debug, Error)]
pub enum CaseError {
    /// Некорректное содержимое команды; исправляется на стороне клиента
    #[error("некорректный запрос: {0}")]
    Validation(String),

    /// Создание заявки по посылке, недоступной для возврата
    #[error("возврат по посылке недоступен: {0}")]
    NotEligible(String),

    /// Посылка или заявка не найдены
    #[error("заявка не найдена")]
    NotFound,

    /// Команда по закрытой (терминальной) заявке
    #[error("заявка закрыта, изменения невозможны")]
    Closed,

    /// Guard-проверка перехода не прошла
    #[error("действие недоступно: {permission}")]
    TransitionNotAllowed {
        /// Какой флаг разрешений оказался false
        permission: &'static str,
        /// Человекочитаемая причина блокировки, если известна
        reason: Option<String>,
    },

    /// Повтор ключа идемпотентности с другим содержимым запроса
    #[error("ключ идемпотентности уже использован с другим содержимым")]
    IdempotencyConflict,

    /// Инфраструктурный сбой хранилища; запрос можно повторить
    #[error("ошибка хранилища: {0}")]
    Storage(String),
}

impl CaseError {
    /// Машинный код вида ошибки для тела ответа
    pub fn kind(&self) -> &'static str {
        match self {
            CaseError::Validation(_) => "validation",
            CaseError::NotEligible(_) => "not_eligible",
            CaseError::NotFound => "not_found",
            CaseError::Closed => "closed",
            CaseError::TransitionNotAllowed { .. } => "transition_not_allowed",
            CaseError::IdempotencyConflict => "idempotency_conflict",
            CaseError::Storage(_) => "storage",
        }
    }

    /// Имеет ли смысл повторять запрос без изменений
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaseError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(CaseError::NotFound.kind(), "not_found");
        assert_eq!(CaseError::Closed.kind(), "closed");
        assert_eq!(
            CaseError::TransitionNotAllowed {
                permission: "allowClose",
                reason: None
            }
            .kind(),
            "transition_not_allowed"
        );
    }

    #[test]
    fn test_only_storage_is_retryable() {
        assert!(CaseError::Storage("db down".into()).is_retryable());
        assert!(!CaseError::IdempotencyConflict.is_retryable());
        assert!(!CaseError::Validation("bad".into()).is_retryable());
    }
}
