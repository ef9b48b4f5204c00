use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::payment_order::Model as OrderModel,
    entities::renewal_subscription::{
        self, ActiveModel as SubscriptionActiveModel, Entity as SubscriptionEntity,
        Model as SubscriptionModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    providers::ProviderId,
    services::memberships::MembershipService,
    services::orchestrator::{CreateOrderCommand, PaymentOrchestrator},
    services::risk::RequestContext,
    services::token_vault::TokenCipher,
};

const STATUS_ACTIVE: &str = "active";
const STATUS_DISABLED: &str = "disabled";

/// Result of one sweep run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SweepSummary {
    pub processed: u32,
    pub successful: u32,
    pub failed: u32,
}

/// Owns the renewal subscriptions: enable/disable from the API, the periodic
/// sweep that initiates charges, and the post-payment advance of the next
/// renewal date. The sweep only ever initiates; dates advance when the
/// webhook confirms payment.
#[derive(Clone)]
pub struct RenewalService {
    db: Arc<DbPool>,
    vault: Arc<dyn TokenCipher>,
    memberships: Arc<MembershipService>,
    event_sender: EventSender,
    reminder_days: i64,
}

impl RenewalService {
    pub fn new(
        db: Arc<DbPool>,
        vault: Arc<dyn TokenCipher>,
        memberships: Arc<MembershipService>,
        event_sender: EventSender,
        reminder_days: i64,
    ) -> Self {
        Self {
            db,
            vault,
            memberships,
            event_sender,
            reminder_days,
        }
    }

    pub async fn get_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionModel>, ServiceError> {
        Ok(SubscriptionEntity::find()
            .filter(renewal_subscription::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    /// Enroll (or re-enroll) a user. The payment token is sealed by the
    /// vault before it touches the database; the membership's auto-renewal
    /// flag flips through the lifecycle service's own contract.
    #[instrument(skip_all, fields(user_id = %user_id, plan_id = %plan_id))]
    pub async fn enable(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        provider: ProviderId,
        payment_token: &str,
    ) -> Result<SubscriptionModel, ServiceError> {
        let plan = self.memberships.get_active_plan(plan_id).await?;
        let token_enc = self.vault.encrypt(&user_id.to_string(), payment_token)?;

        let now = Utc::now();
        let next_renewal = match self.memberships.get(user_id).await? {
            Some(m) if m.expiry_date > now => m.expiry_date,
            _ => now + Duration::days(i64::from(plan.duration_days)),
        };

        let existing = self.get_for_user(user_id).await?;
        let model = match existing {
            Some(sub) => {
                let mut active: SubscriptionActiveModel = sub.into();
                active.plan_id = Set(plan_id);
                active.provider = Set(provider.to_string());
                active.payment_token_enc = Set(token_enc);
                active.status = Set(STATUS_ACTIVE.to_string());
                active.next_renewal_date = Set(next_renewal);
                active.reminder_sent_at = Set(None);
                active.updated_at = Set(now);
                active.update(&*self.db).await?
            }
            None => {
                let model = SubscriptionActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    plan_id: Set(plan_id),
                    provider: Set(provider.to_string()),
                    payment_token_enc: Set(token_enc),
                    status: Set(STATUS_ACTIVE.to_string()),
                    next_renewal_date: Set(next_renewal),
                    last_renewal_date: Set(None),
                    last_attempt_at: Set(None),
                    last_order_id: Set(None),
                    reminder_sent_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                model.insert(&*self.db).await?
            }
        };

        self.memberships.set_auto_renewal(user_id, true).await?;
        info!(subscription_id = %model.id, next_renewal = %next_renewal, "auto-renewal enabled");
        Ok(model)
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn disable(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let sub = self.get_for_user(user_id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("no renewal subscription for user {user_id}"))
        })?;

        let mut active: SubscriptionActiveModel = sub.into();
        active.status = Set(STATUS_DISABLED.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.memberships.set_auto_renewal(user_id, false).await?;
        info!(user_id = %user_id, "auto-renewal disabled");
        Ok(())
    }

    /// One sweep pass: initiate a charge for every active subscription due
    /// within `days_threshold` days, and emit one reminder per cycle for
    /// those inside the reminder window.
    ///
    /// Retry-safe by construction: each attempt creates a fresh order, the
    /// next renewal date only moves when a webhook confirms payment, and a
    /// failed charge simply leaves the subscription due for the next sweep.
    #[instrument(skip(self, orchestrator))]
    pub async fn sweep(
        &self,
        orchestrator: &PaymentOrchestrator,
        days_threshold: i64,
    ) -> Result<SweepSummary, ServiceError> {
        let now = Utc::now();
        let horizon = now + Duration::days(days_threshold);

        let due = SubscriptionEntity::find()
            .filter(renewal_subscription::Column::Status.eq(STATUS_ACTIVE))
            .filter(renewal_subscription::Column::NextRenewalDate.lte(horizon))
            .order_by_asc(renewal_subscription::Column::NextRenewalDate)
            .all(&*self.db)
            .await?;

        let mut summary = SweepSummary::default();
        for sub in due {
            summary.processed += 1;
            self.send_reminder_if_due(&sub, now).await;

            match self.charge_subscription(orchestrator, &sub).await {
                Ok(order_id) => {
                    summary.successful += 1;
                    self.event_sender
                        .send(Event::RenewalChargeInitiated {
                            subscription_id: sub.id,
                            order_id,
                        })
                        .await;
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        subscription_id = %sub.id,
                        user_id = %sub.user_id,
                        error = %err,
                        "renewal charge failed; will retry next sweep"
                    );
                }
            }
        }

        metrics::counter!("renewal_sweeps_total", 1);
        self.event_sender
            .send(Event::RenewalSweepCompleted {
                processed: summary.processed,
                successful: summary.successful,
                failed: summary.failed,
            })
            .await;
        info!(
            processed = summary.processed,
            successful = summary.successful,
            failed = summary.failed,
            "renewal sweep completed"
        );
        Ok(summary)
    }

    /// Advance bookkeeping once the webhook confirms a sweep-initiated
    /// payment. No-op when the next renewal date is already at or past the
    /// new expiry, which makes webhook redelivery harmless.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn on_renewal_confirmed(
        &self,
        order: &OrderModel,
        new_expiry: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let Some(subscription_id) = order.renewal_subscription_id else {
            return Ok(());
        };
        let Some(sub) = SubscriptionEntity::find_by_id(subscription_id)
            .one(&*self.db)
            .await?
        else {
            warn!(subscription_id = %subscription_id, "confirmed renewal for unknown subscription");
            return Ok(());
        };

        if sub.next_renewal_date >= new_expiry {
            return Ok(());
        }

        let mut active: SubscriptionActiveModel = sub.into();
        active.next_renewal_date = Set(new_expiry);
        active.last_renewal_date = Set(Some(Utc::now()));
        active.reminder_sent_at = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        info!(subscription_id = %subscription_id, next_renewal = %new_expiry, "renewal date advanced");
        Ok(())
    }

    async fn charge_subscription(
        &self,
        orchestrator: &PaymentOrchestrator,
        sub: &SubscriptionModel,
    ) -> Result<Uuid, ServiceError> {
        let token = self
            .vault
            .decrypt(&sub.user_id.to_string(), &sub.payment_token_enc)?;
        let provider = ProviderId::parse(&sub.provider).map_err(|e| e.into_service_error())?;

        let created = orchestrator
            .create_order(CreateOrderCommand {
                user_id: sub.user_id,
                plan_id: sub.plan_id,
                provider,
                coupon_code: None,
                ctx: RequestContext::internal(),
                renewal_subscription_id: Some(sub.id),
                off_session_token: Some(token),
            })
            .await;

        let now = Utc::now();
        let order_id = created.as_ref().map(|c| c.order_id).ok();
        let mut active: SubscriptionActiveModel = sub.clone().into();
        active.last_attempt_at = Set(Some(now));
        if let Some(order_id) = order_id {
            active.last_order_id = Set(Some(order_id));
        }
        active.updated_at = Set(now);
        active.update(&*self.db).await?;

        created.map(|c| c.order_id)
    }

    /// At most one reminder per renewal cycle; the flag clears when the
    /// renewal is confirmed.
    async fn send_reminder_if_due(&self, sub: &SubscriptionModel, now: DateTime<Utc>) {
        let within_window = sub.next_renewal_date - now <= Duration::days(self.reminder_days);
        if !within_window || sub.reminder_sent_at.is_some() {
            return;
        }

        self.event_sender
            .send(Event::RenewalReminder {
                subscription_id: sub.id,
                user_id: sub.user_id,
                due: sub.next_renewal_date,
            })
            .await;

        let mut active: SubscriptionActiveModel = sub.clone().into();
        active.reminder_sent_at = Set(Some(now));
        active.updated_at = Set(now);
        if let Err(err) = active.update(&*self.db).await {
            warn!(subscription_id = %sub.id, error = %err, "failed to record reminder");
        }
    }
}
