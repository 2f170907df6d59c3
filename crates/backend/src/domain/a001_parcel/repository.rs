use anyhow::Result;
use chrono::Utc;
use contracts::domain::a001_parcel::aggregate::{Parcel, ParcelId};
use contracts::domain::common::{BaseAggregate, EntityMetadata};
use contracts::enums::CarrierStatus;
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "a001_parcel")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub code: String,
    pub description: String,
    pub comment: Option<String>,
    pub track_number: String,
    pub carrier_status: String,
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_exchange: bool,
    pub is_deleted: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Parcel {
    fn from(m: Model) -> Self {
        let metadata = EntityMetadata {
            created_at: m.created_at.unwrap_or_else(Utc::now),
            updated_at: m.updated_at.unwrap_or_else(Utc::now),
            is_deleted: m.is_deleted,
            version: m.version,
        };
        let uuid = Uuid::parse_str(&m.id).unwrap_or_else(|_| Uuid::new_v4());
        let carrier_status = CarrierStatus::from_code(&m.carrier_status)
            .unwrap_or_else(|| panic!("Unknown carrier_status for parcel {}: {}", m.id, m.carrier_status));

        Parcel {
            base: BaseAggregate::with_metadata(
                ParcelId(uuid),
                m.code,
                m.description,
                m.comment.clone(),
                metadata,
            ),
            track_number: m.track_number,
            carrier_status,
            delivered_at: m.delivered_at,
            is_exchange: m.is_exchange,
        }
    }
}

fn to_active(parcel: &Parcel) -> ActiveModel {
    ActiveModel {
        id: Set(parcel.base.id.value().to_string()),
        code: Set(parcel.base.code.clone()),
        description: Set(parcel.base.description.clone()),
        comment: Set(parcel.base.comment.clone()),
        track_number: Set(parcel.track_number.clone()),
        carrier_status: Set(parcel.carrier_status.code().to_string()),
        delivered_at: Set(parcel.delivered_at),
        is_exchange: Set(parcel.is_exchange),
        is_deleted: Set(parcel.base.metadata.is_deleted),
        created_at: Set(Some(parcel.base.metadata.created_at)),
        updated_at: Set(Some(parcel.base.metadata.updated_at)),
        version: Set(parcel.base.metadata.version),
    }
}

pub async fn list_all<C: ConnectionTrait>(db: &C) -> Result<Vec<Parcel>> {
    let items: Vec<Parcel> = Entity::find()
        .filter(Column::IsDeleted.eq(false))
        .order_by_desc(Column::UpdatedAt)
        .all(db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(items)
}

pub async fn get_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Parcel>> {
    let result = Entity::find_by_id(id.to_string()).one(db).await?;
    Ok(result.map(Into::into))
}

pub async fn insert<C: ConnectionTrait>(db: &C, parcel: &Parcel) -> Result<Uuid> {
    to_active(parcel).insert(db).await?;
    Ok(parcel.base.id.value())
}

pub async fn update<C: ConnectionTrait>(db: &C, parcel: &Parcel) -> Result<()> {
    let mut active = to_active(parcel);
    active.version = Set(parcel.base.metadata.version + 1);
    active.update(db).await?;
    Ok(())
}

pub async fn soft_delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<bool> {
    use sea_orm::sea_query::Expr;
    let result = Entity::update_many()
        .col_expr(Column::IsDeleted, Expr::value(true))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::Id.eq(id.to_string()))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}
