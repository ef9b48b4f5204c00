use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One membership per user. Written only by the membership lifecycle service.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memberships")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,

    pub plan_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,

    pub auto_renewal: bool,

    /// active | cancelled | expired
    pub status: String,

    /// Snapshot of the state before the last applied payment, consumed by
    /// refund reversal while the prior term is still running.
    pub prior_plan_id: Option<Uuid>,
    pub prior_expiry: Option<DateTime<Utc>>,

    /// Idempotency marker: the order whose payment was last applied.
    pub last_order_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::membership_plan::Entity",
        from = "Column::PlanId",
        to = "super::membership_plan::Column::Id"
    )]
    Plan,
}

impl Related<super::membership_plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
