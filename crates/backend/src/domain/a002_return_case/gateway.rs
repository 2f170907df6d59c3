use anyhow::Result;
use async_trait::async_trait;
use contracts::domain::a002_return_case::response::{ExchangeParcelRef, ExchangeParcelSummary};
use sea_orm::DatabaseConnection;
use uuid::Uuid;

/// Шов между движком заявок и хранилищем посылок
///
/// Движок не знает, как устроен трекинг: он потребляет один факт
/// (доступность возврата), фабрику обменных посылок и два чтения для
/// снапшота. Обе поверхности UI ходят через одни и те же команды движка,
/// поэтому и коллаборатор у них общий.
#[async_trait]
pub trait ParcelGateway: Send + Sync {
    /// Можно ли сейчас открыть возврат по посылке
    async fn can_register_return(&self, db: &DatabaseConnection, parcel_id: Uuid) -> Result<bool>;

    /// Создать обменную посылку по заявке
    async fn create_exchange(
        &self,
        db: &DatabaseConnection,
        parcel_id: Uuid,
    ) -> Result<ExchangeParcelRef>;

    /// Сводка обменной посылки для снапшота
    async fn exchange_summary(
        &self,
        db: &DatabaseConnection,
        exchange_parcel_id: Uuid,
    ) -> Result<Option<ExchangeParcelSummary>>;

    /// Downstream-факт: причина, по которой отмена обмена заблокирована
    /// (обменная посылка уже передана перевозчику), либо None
    async fn reversal_blocked(
        &self,
        db: &DatabaseConnection,
        exchange_parcel_id: Uuid,
    ) -> Result<Option<String>>;
}
