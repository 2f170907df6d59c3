use serde::{Deserialize, Serialize};

/// Статусы посылки у перевозчика
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarrierStatus {
    Registered,
    InTransit,
    ArrivedAtPickup,
    Delivered,
    ReturnedToSender,
}

impl CarrierStatus {
    /// Получить код статуса
    pub fn code(&self) -> &'static str {
        match self {
            CarrierStatus::Registered => "registered",
            CarrierStatus::InTransit => "in_transit",
            CarrierStatus::ArrivedAtPickup => "arrived_at_pickup",
            CarrierStatus::Delivered => "delivered",
            CarrierStatus::ReturnedToSender => "returned_to_sender",
        }
    }

    /// Получить человекочитаемое название
    pub fn display_name(&self) -> &'static str {
        match self {
            CarrierStatus::Registered => "Зарегистрирована",
            CarrierStatus::InTransit => "В пути",
            CarrierStatus::ArrivedAtPickup => "Прибыла в пункт выдачи",
            CarrierStatus::Delivered => "Доставлена",
            CarrierStatus::ReturnedToSender => "Возвращена отправителю",
        }
    }

    /// Получить все статусы
    pub fn all() -> Vec<CarrierStatus> {
        vec![
            CarrierStatus::Registered,
            CarrierStatus::InTransit,
            CarrierStatus::ArrivedAtPickup,
            CarrierStatus::Delivered,
            CarrierStatus::ReturnedToSender,
        ]
    }

    /// Парсинг из строки
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "registered" => Some(CarrierStatus::Registered),
            "in_transit" => Some(CarrierStatus::InTransit),
            "arrived_at_pickup" => Some(CarrierStatus::ArrivedAtPickup),
            "delivered" => Some(CarrierStatus::Delivered),
            "returned_to_sender" => Some(CarrierStatus::ReturnedToSender),
            _ => None,
        }
    }

    /// Посылка ещё не передана перевозчику
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(self, CarrierStatus::Registered)
    }
}

impl std::fmt::Display for CarrierStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}
