use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A payment order. Rows are never deleted; the status column mutates only
/// through the order store's compare-and-set path.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub plan_id: Uuid,

    /// Registry key of the payment network handling this order.
    pub provider: String,

    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    /// original_amount - discount_amount; immutable once status leaves `created`.
    pub final_amount: Decimal,
    pub coupon_id: Option<Uuid>,

    pub status: String,

    /// Reference assigned by the provider once the order is registered there.
    pub provider_reference: Option<String>,
    /// Redirect URL or QR payload handed back to the client.
    pub redirect_payload: Option<String>,

    /// Set when this order was initiated by the auto-renewal sweep.
    pub renewal_subscription_id: Option<Uuid>,

    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
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
