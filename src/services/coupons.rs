use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::coupon::{self, Entity as CouponEntity, Model as CouponModel},
    entities::coupon_redemption::{
        self, ActiveModel as RedemptionActiveModel, Entity as RedemptionEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

const STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CouponKind {
    Percentage,
    Fixed,
}

/// Result of a successful validation. Pure preview; nothing is consumed
/// until [`CouponService::apply`] runs against a durably created order.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CouponQuote {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl CouponService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Validate a code against window, caps, minimum purchase and plan
    /// eligibility, and quote the discount. Never increments usage; repeated
    /// validation calls must not consume the coupon.
    #[instrument(skip_all, fields(code = %code, user_id = %user_id))]
    pub async fn validate(
        &self,
        code: &str,
        user_id: Uuid,
        amount: Decimal,
        plan_id: Uuid,
    ) -> Result<CouponQuote, ServiceError> {
        let now = Utc::now();
        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::CouponInvalid(format!("unknown coupon code: {code}")))?;

        if coupon.status != STATUS_ACTIVE {
            return Err(ServiceError::CouponInvalid("coupon is disabled".into()));
        }
        if now < coupon.valid_from || now > coupon.valid_to {
            return Err(ServiceError::CouponInvalid(
                "coupon is outside its validity window".into(),
            ));
        }
        if coupon.max_uses_total > 0 && coupon.used_count >= coupon.max_uses_total {
            return Err(ServiceError::CouponExhausted);
        }
        if let Some(plan) = coupon.applicable_plan_id {
            if plan != plan_id {
                return Err(ServiceError::CouponInvalid(
                    "coupon does not apply to this plan".into(),
                ));
            }
        }
        if let Some(min) = coupon.min_order_amount {
            if amount < min {
                return Err(ServiceError::CouponInvalid(format!(
                    "order amount below coupon minimum of {min}"
                )));
            }
        }
        if coupon.max_uses_per_user > 0 {
            let used_by_user = RedemptionEntity::find()
                .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
                .filter(coupon_redemption::Column::UserId.eq(user_id))
                .count(&*self.db)
                .await?;
            if used_by_user >= coupon.max_uses_per_user as u64 {
                return Err(ServiceError::CouponInvalid(
                    "per-user usage limit reached".into(),
                ));
            }
        }

        let discount_amount = discount_for(&coupon, amount)?;
        Ok(CouponQuote {
            coupon_id: coupon.id,
            code: coupon.code,
            discount_amount,
            final_amount: amount - discount_amount,
        })
    }

    /// Consume one use of the coupon for a durably created order.
    ///
    /// Exactly-once per order: the redemption row is keyed by order id, so a
    /// replay short-circuits before touching the counter. The counter itself
    /// advances through a guarded UPDATE that enforces the total cap at the
    /// database, which keeps concurrent redeemers from overshooting it.
    #[instrument(skip_all, fields(coupon_id = %coupon_id, order_id = %order_id))]
    pub async fn apply(
        &self,
        coupon_id: Uuid,
        user_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
        discount_amount: Decimal,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let redemption = RedemptionActiveModel {
            order_id: Set(order_id),
            coupon_id: Set(coupon_id),
            user_id: Set(user_id),
            amount: Set(amount),
            discount_amount: Set(discount_amount),
            redeemed_at: Set(now),
        };
        match redemption.insert(&txn).await {
            Ok(_) => {}
            Err(e) => {
                return if matches!(
                    e.sql_err(),
                    Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
                ) {
                    txn.rollback().await?;
                    info!(order_id = %order_id, "coupon already applied to this order");
                    Ok(())
                } else {
                    Err(ServiceError::DatabaseError(e))
                };
            }
        }

        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUsesTotal.eq(0))
                    .add(
                        Expr::col(coupon::Column::UsedCount)
                            .lt(Expr::col(coupon::Column::MaxUsesTotal)),
                    ),
            )
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            warn!(coupon_id = %coupon_id, "coupon cap reached during apply");
            return Err(ServiceError::CouponExhausted);
        }

        txn.commit().await?;

        self.event_sender
            .send(Event::CouponApplied {
                coupon_id,
                order_id,
                discount_amount,
            })
            .await;
        Ok(())
    }
}

/// Discount arithmetic, clamped to the order amount so the final amount
/// never goes negative.
pub(crate) fn discount_for(coupon: &CouponModel, amount: Decimal) -> Result<Decimal, ServiceError> {
    let kind = CouponKind::from_str(&coupon.kind)
        .map_err(|_| ServiceError::CouponInvalid(format!("unknown coupon kind: {}", coupon.kind)))?;

    let raw = match kind {
        CouponKind::Percentage => (amount * coupon.value / Decimal::from(100)).round_dp(2),
        CouponKind::Fixed => coupon.value,
    };
    Ok(raw.max(Decimal::ZERO).min(amount))
}
