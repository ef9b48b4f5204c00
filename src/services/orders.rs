use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::payment_order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
    },
    errors::ServiceError,
};

/// Order lifecycle states. Transitions are forward-only and applied
/// exclusively through [`OrderStore::compare_and_set_status`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    utoipa::ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Pending,
    Paid,
    Failed,
    Cancelled,
    Closed,
    Refunded,
}

impl OrderStatus {
    /// Whether `self -> to` is a legal forward transition.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Created, Pending)
                | (Created, Closed)
                | (Pending, Paid)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Pending, Closed)
                | (Paid, Refunded)
        )
    }

    /// Monotone progress measure. Disagreeing status sources are resolved by
    /// trusting the higher rank; status never rolls back.
    pub fn rank(self) -> u8 {
        use OrderStatus::*;
        match self {
            Created => 0,
            Pending => 1,
            Paid | Failed | Cancelled | Closed => 2,
            Refunded => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        use OrderStatus::*;
        matches!(self, Failed | Cancelled | Closed | Refunded)
    }

    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        Self::from_str(value)
            .map_err(|_| ServiceError::InvalidStatus(format!("unknown order status: {value}")))
    }
}

/// Fields a status transition may set alongside the status itself.
#[derive(Debug, Default, Clone)]
pub struct StatusPatch {
    pub provider_reference: Option<String>,
    pub redirect_payload: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The stored status no longer matched the expected value.
    Conflict,
}

/// Input for creating an order row.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub provider: String,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub coupon_id: Option<Uuid>,
    pub renewal_subscription_id: Option<Uuid>,
}

/// Durable keyed storage for orders. The compare-and-set update is the only
/// mutation path, making concurrent webhook deliveries race-safe per order
/// without any global lock.
#[derive(Clone)]
pub struct OrderStore {
    db: Arc<DbPool>,
}

impl OrderStore {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Insert a new order in `created` state. `final_amount` is derived here
    /// and never recomputed afterwards.
    #[instrument(skip(self, order), fields(order_id = %order.id, user_id = %order.user_id))]
    pub async fn create(&self, order: NewOrder) -> Result<OrderModel, ServiceError> {
        let final_amount = order.original_amount - order.discount_amount;
        if final_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount exceeds order amount".into(),
            ));
        }

        let now = Utc::now();
        let model = OrderActiveModel {
            id: Set(order.id),
            user_id: Set(order.user_id),
            plan_id: Set(order.plan_id),
            provider: Set(order.provider),
            original_amount: Set(order.original_amount),
            discount_amount: Set(order.discount_amount),
            final_amount: Set(final_amount),
            coupon_id: Set(order.coupon_id),
            status: Set(OrderStatus::Created.to_string()),
            provider_reference: Set(None),
            redirect_payload: Set(None),
            renewal_subscription_id: Set(order.renewal_subscription_id),
            paid_at: Set(None),
            refunded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match model.insert(&*self.db).await {
            Ok(created) => Ok(created),
            Err(e) => {
                if matches!(
                    e.sql_err(),
                    Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
                ) {
                    warn!(order_id = %order.id, "duplicate order id");
                    Err(ServiceError::DuplicateOrder(order.id))
                } else {
                    error!(error = %e, order_id = %order.id, "failed to insert order");
                    Err(ServiceError::DatabaseError(e))
                }
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {id} not found")))
    }

    pub async fn find_by_provider_reference(
        &self,
        provider: &str,
        reference: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        let order = OrderEntity::find()
            .filter(payment_order::Column::Provider.eq(provider))
            .filter(payment_order::Column::ProviderReference.eq(reference))
            .one(&*self.db)
            .await?;
        Ok(order)
    }

    /// Atomically move `id` from `expected` to `new`, applying `patch` in the
    /// same statement. Zero affected rows means another writer got there
    /// first; the caller decides whether to re-read and retry.
    #[instrument(skip_all, fields(order_id = %id, expected = %expected, new = %new))]
    pub async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        new: OrderStatus,
        patch: StatusPatch,
    ) -> Result<CasOutcome, ServiceError> {
        let mut update = OrderEntity::update_many()
            .col_expr(
                payment_order::Column::Status,
                Expr::value(new.to_string()),
            )
            .col_expr(payment_order::Column::UpdatedAt, Expr::value(Utc::now()));

        if let Some(reference) = patch.provider_reference {
            update = update.col_expr(
                payment_order::Column::ProviderReference,
                Expr::value(reference),
            );
        }
        if let Some(redirect) = patch.redirect_payload {
            update = update.col_expr(
                payment_order::Column::RedirectPayload,
                Expr::value(redirect),
            );
        }
        if let Some(paid_at) = patch.paid_at {
            update = update.col_expr(payment_order::Column::PaidAt, Expr::value(paid_at));
        }
        if let Some(refunded_at) = patch.refunded_at {
            update = update.col_expr(payment_order::Column::RefundedAt, Expr::value(refunded_at));
        }

        let result = update
            .filter(payment_order::Column::Id.eq(id))
            .filter(payment_order::Column::Status.eq(expected.to_string()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            Ok(CasOutcome::Conflict)
        } else {
            metrics::counter!("order_status_transitions_total", 1);
            Ok(CasOutcome::Applied)
        }
    }

    /// Orders the user created since `since`, newest first. Feeds the risk
    /// assessor's rolling window.
    pub async fn recent_for_user(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(payment_order::Column::UserId.eq(user_id))
            .filter(payment_order::Column::CreatedAt.gte(since))
            .order_by_desc(payment_order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(payment_order::Column::UserId.eq(user_id))
            .order_by_desc(payment_order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }
}
