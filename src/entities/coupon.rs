use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discount coupon. `used_count` is incremented only by the coupon service's
/// guarded-update apply path, never by read-modify-write.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub code: String,

    /// percentage | fixed
    pub kind: String,
    pub value: Decimal,

    pub min_order_amount: Option<Decimal>,
    /// When set, the coupon applies only to this plan.
    pub applicable_plan_id: Option<Uuid>,

    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,

    /// 0 means unlimited.
    pub max_uses_total: i32,
    /// 0 means unlimited.
    pub max_uses_per_user: i32,
    pub used_count: i32,

    /// active | disabled
    pub status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_redemption::Entity")]
    Redemptions,
}

impl Related<super::coupon_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
