use serde::{Deserialize, Serialize};

use super::aggregate::{CaseState, ReturnCase};

/// Набор разрешённых действий по заявке
///
/// Всегда вычисляется заново из текущего состояния заявки; сохранённые
/// копии — только кэш для отображения, авторизация по ним не выполняется.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub allow_launch_exchange: bool,
    pub allow_create_exchange_parcel: bool,
    pub allow_update_reverse_track: bool,
    pub allow_confirm_receipt: bool,
    pub allow_close: bool,
    pub allow_convert_to_return: bool,
    pub allow_convert_to_exchange: bool,
}

// Имена флагов для сообщений об отказе перехода
pub const ALLOW_LAUNCH_EXCHANGE: &str = "allowLaunchExchange";
pub const ALLOW_CREATE_EXCHANGE_PARCEL: &str = "allowCreateExchangeParcel";
pub const ALLOW_UPDATE_REVERSE_TRACK: &str = "allowUpdateReverseTrack";
pub const ALLOW_CONFIRM_RECEIPT: &str = "allowConfirmReceipt";
pub const ALLOW_CLOSE: &str = "allowClose";
pub const ALLOW_CONVERT_TO_RETURN: &str = "allowConvertToReturn";
pub const ALLOW_CONVERT_TO_EXCHANGE: &str = "allowConvertToExchange";

/// Вывести набор разрешений из состояния заявки
///
/// Чистая функция от (state, receipt_confirmed, наличие обменной посылки,
/// блокировка отмены): без обращений к БД и часам, повторный вызов на той
/// же заявке даёт тот же результат.
///
/// Правила закрытия: возврат закрывается свободно, обмен — только после
/// подтверждения физического получения возвращаемого товара, чтобы не
/// потерять обмен в полёте.
pub fn derive(case: &ReturnCase) -> PermissionSet {
    let terminal = case.state.is_terminal();

    let allow_convert_to_return = case.state.is_exchange() && case.cancel_unavailable_reason.is_none();

    PermissionSet {
        allow_launch_exchange: case.state == CaseState::OpenReturn,
        allow_convert_to_exchange: case.state == CaseState::OpenReturn,
        allow_create_exchange_parcel: case.state == CaseState::OpenExchange
            && case.exchange_parcel_id.is_none(),
        allow_update_reverse_track: !terminal,
        allow_confirm_receipt: !terminal && !case.receipt_confirmed,
        allow_close: !terminal && (case.state == CaseState::OpenReturn || case.receipt_confirmed),
        allow_convert_to_return,
    }
}
