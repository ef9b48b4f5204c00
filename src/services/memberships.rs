use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::membership::{
        ActiveModel as MembershipActiveModel, Entity as MembershipEntity, Model as MembershipModel,
    },
    entities::membership_plan::{self, Entity as PlanEntity, Model as PlanModel},
    entities::payment_order::Model as OrderModel,
    errors::ServiceError,
    events::{Event, EventSender},
};

const STATUS_ACTIVE: &str = "active";
const STATUS_CANCELLED: &str = "cancelled";

/// Quote for switching plans mid-term. The unused value of the current plan
/// is prorated against the target price; a downgrade whose remaining value
/// exceeds the target price yields a refund instead of a negative charge.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ChangeQuote {
    pub current_plan_id: Option<Uuid>,
    pub target_plan_id: Uuid,
    pub days_remaining: i64,
    pub remaining_value: Decimal,
    pub charge_amount: Decimal,
    pub refund_amount: Decimal,
    pub is_upgrade: bool,
}

/// Owns the membership entity. No other component writes it; payment and
/// refund side effects arrive here through the orchestrator.
#[derive(Clone)]
pub struct MembershipService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl MembershipService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<MembershipModel>, ServiceError> {
        Ok(MembershipEntity::find_by_id(user_id).one(&*self.db).await?)
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> Result<PlanModel, ServiceError> {
        PlanEntity::find_by_id(plan_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("membership plan {plan_id} not found")))
    }

    pub async fn get_active_plan(&self, plan_id: Uuid) -> Result<PlanModel, ServiceError> {
        let plan = self.get_plan(plan_id).await?;
        if plan.status != STATUS_ACTIVE {
            return Err(ServiceError::ValidationError(format!(
                "membership plan {} is retired",
                plan.code
            )));
        }
        Ok(plan)
    }

    pub async fn find_plan_by_code(&self, code: &str) -> Result<Option<PlanModel>, ServiceError> {
        Ok(PlanEntity::find()
            .filter(membership_plan::Column::Code.eq(code))
            .one(&*self.db)
            .await?)
    }

    /// Apply a confirmed payment: extend from the later of (now, current
    /// expiry) so early renewal never shortens access, and never double-count
    /// an already-applied order.
    ///
    /// Idempotent: the membership records the last applied order id, and the
    /// new expiry is re-derived from the order rather than blindly added, so
    /// webhook redelivery after a crash cannot double-extend.
    #[instrument(skip(self, order), fields(order_id = %order.id, user_id = %order.user_id))]
    pub async fn on_payment_confirmed(
        &self,
        order: &OrderModel,
    ) -> Result<DateTime<Utc>, ServiceError> {
        let plan = self.get_plan(order.plan_id).await?;
        let now = Utc::now();
        let existing = self.get(order.user_id).await?;

        let new_expiry = match existing {
            Some(current) => {
                if current.last_order_id == Some(order.id) {
                    info!(order_id = %order.id, "payment already applied to membership");
                    return Ok(current.expiry_date);
                }

                let base = if current.expiry_date > now {
                    current.expiry_date
                } else {
                    now
                };
                let new_expiry = base + Duration::days(i64::from(plan.duration_days));

                let prior_plan = current.plan_id;
                let prior_expiry = current.expiry_date;
                let mut active: MembershipActiveModel = current.into();
                active.plan_id = Set(order.plan_id);
                active.expiry_date = Set(new_expiry);
                active.status = Set(STATUS_ACTIVE.to_string());
                active.prior_plan_id = Set(Some(prior_plan));
                active.prior_expiry = Set(Some(prior_expiry));
                active.last_order_id = Set(Some(order.id));
                active.updated_at = Set(now);
                active.update(&*self.db).await?;
                new_expiry
            }
            None => {
                let new_expiry = now + Duration::days(i64::from(plan.duration_days));
                let model = MembershipActiveModel {
                    user_id: Set(order.user_id),
                    plan_id: Set(order.plan_id),
                    start_date: Set(now),
                    expiry_date: Set(new_expiry),
                    auto_renewal: Set(false),
                    status: Set(STATUS_ACTIVE.to_string()),
                    prior_plan_id: Set(None),
                    prior_expiry: Set(None),
                    last_order_id: Set(Some(order.id)),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                model.insert(&*self.db).await?;
                new_expiry
            }
        };

        self.event_sender
            .send(Event::MembershipExtended {
                user_id: order.user_id,
                plan_id: order.plan_id,
                new_expiry,
            })
            .await;
        info!(user_id = %order.user_id, new_expiry = %new_expiry, "membership extended");
        Ok(new_expiry)
    }

    /// Undo a refunded payment: revert to the pre-payment snapshot while the
    /// prior term is still running, otherwise close the membership.
    #[instrument(skip(self, order), fields(order_id = %order.id, user_id = %order.user_id))]
    pub async fn on_refund_confirmed(&self, order: &OrderModel) -> Result<(), ServiceError> {
        let Some(current) = self.get(order.user_id).await? else {
            warn!(order_id = %order.id, "refund for a user without membership");
            return Ok(());
        };

        if current.last_order_id != Some(order.id) {
            // The refunded order is not the one shaping the current term;
            // nothing to revert.
            info!(order_id = %order.id, "refunded order is not the applied one; membership untouched");
            return Ok(());
        }

        let now = Utc::now();
        match (current.prior_plan_id, current.prior_expiry) {
            (Some(prior_plan), Some(prior_expiry)) if prior_expiry > now => {
                let mut active: MembershipActiveModel = current.into();
                active.plan_id = Set(prior_plan);
                active.expiry_date = Set(prior_expiry);
                active.prior_plan_id = Set(None);
                active.prior_expiry = Set(None);
                active.last_order_id = Set(None);
                active.updated_at = Set(now);
                active.update(&*self.db).await?;

                self.event_sender
                    .send(Event::MembershipReverted {
                        user_id: order.user_id,
                        plan_id: prior_plan,
                        expiry: prior_expiry,
                    })
                    .await;
                info!(user_id = %order.user_id, "membership reverted to prior term");
            }
            _ => {
                let mut active: MembershipActiveModel = current.into();
                active.status = Set(STATUS_CANCELLED.to_string());
                active.prior_plan_id = Set(None);
                active.prior_expiry = Set(None);
                active.last_order_id = Set(None);
                active.updated_at = Set(now);
                active.update(&*self.db).await?;

                self.event_sender
                    .send(Event::MembershipCancelled {
                        user_id: order.user_id,
                    })
                    .await;
                info!(user_id = %order.user_id, "membership cancelled after refund");
            }
        }
        Ok(())
    }

    /// Quote a plan change. Pure arithmetic over the stored rows; nothing is
    /// mutated until the resulting order is paid.
    #[instrument(skip(self))]
    pub async fn compute_change_price(
        &self,
        user_id: Uuid,
        target_plan_id: Uuid,
    ) -> Result<ChangeQuote, ServiceError> {
        let target = self.get_active_plan(target_plan_id).await?;
        let now = Utc::now();

        let Some(current) = self.get(user_id).await? else {
            return Ok(ChangeQuote {
                current_plan_id: None,
                target_plan_id,
                days_remaining: 0,
                remaining_value: Decimal::ZERO,
                charge_amount: target.price,
                refund_amount: Decimal::ZERO,
                is_upgrade: true,
            });
        };

        let current_plan = self.get_plan(current.plan_id).await?;
        if current.plan_id == target_plan_id {
            return Err(ServiceError::ValidationError(
                "already on the requested plan".into(),
            ));
        }

        let quote = change_quote(
            &current_plan,
            &target,
            current.expiry_date,
            current.status == STATUS_ACTIVE,
            now,
        );
        Ok(quote)
    }

    /// Flip the auto-renewal flag. Called by the renewal service through this
    /// contract; the membership row itself stays owned here.
    pub async fn set_auto_renewal(&self, user_id: Uuid, enabled: bool) -> Result<(), ServiceError> {
        let Some(current) = self.get(user_id).await? else {
            return Ok(());
        };
        let mut active: MembershipActiveModel = current.into();
        active.auto_renewal = Set(enabled);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(())
    }
}

/// Proration core. Whole days remaining are truncated toward zero; an
/// expired or inactive membership prorates to zero remaining value.
pub(crate) fn change_quote(
    current_plan: &PlanModel,
    target: &PlanModel,
    expiry: DateTime<Utc>,
    active: bool,
    now: DateTime<Utc>,
) -> ChangeQuote {
    let days_remaining = if active && expiry > now {
        (expiry - now).num_days().max(0)
    } else {
        0
    };

    let total_days = i64::from(current_plan.duration_days.max(1));
    let days_remaining = days_remaining.min(total_days);

    let remaining_value = (current_plan.price * Decimal::from(days_remaining)
        / Decimal::from(total_days))
    .round_dp(2)
    .min(current_plan.price);

    let is_upgrade = target.level >= current_plan.level;
    let charge_amount = (target.price - remaining_value).max(Decimal::ZERO).round_dp(2);
    let refund_amount = if !is_upgrade && remaining_value > target.price {
        (remaining_value - target.price).round_dp(2)
    } else {
        Decimal::ZERO
    };

    ChangeQuote {
        current_plan_id: Some(current_plan.id),
        target_plan_id: target.id,
        days_remaining,
        remaining_value,
        charge_amount,
        refund_amount,
        is_upgrade,
    }
}
