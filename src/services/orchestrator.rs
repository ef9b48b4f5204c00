use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use http::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::payment_order::Model as OrderModel,
    errors::ServiceError,
    events::{Event, EventSender},
    providers::{
        NormalizedStatus, ProviderAck, ProviderError, ProviderId, ProviderOrderSpec,
        ProviderRegistry, RedirectPayload,
    },
    services::coupons::CouponService,
    services::memberships::MembershipService,
    services::orders::{CasOutcome, NewOrder, OrderStatus, OrderStore, StatusPatch},
    services::renewals::RenewalService,
    services::risk::{RequestContext, RiskAssessor},
};

const CURRENCY: &str = "USD";

/// Inbound order-creation request, already reduced to an authenticated
/// principal by the handler layer.
#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub provider: ProviderId,
    pub coupon_code: Option<String>,
    pub ctx: RequestContext,
    /// Set when the auto-renewal sweep originates the charge.
    pub renewal_subscription_id: Option<Uuid>,
    /// Stored payment credential for off-session charges.
    pub off_session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub redirect: RedirectPayload,
    pub expires_at: DateTime<Utc>,
}

/// What became of one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The transition was applied and side effects ran.
    Applied(OrderStatus),
    /// Redelivery of an already-applied transition; side effects re-ran
    /// idempotently.
    AlreadyApplied,
    /// Stale or backward notification; absorbed without state change.
    Absorbed,
    /// Event type outside the payment lifecycle; acked and skipped.
    Ignored,
    /// Replay caught by the event-id cache.
    Duplicate,
}

/// The façade in front of the provider adapters, order store, risk gate,
/// coupon engine and membership lifecycle. All order state changes flow
/// through here.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    store: OrderStore,
    registry: Arc<ProviderRegistry>,
    memberships: Arc<MembershipService>,
    coupons: Arc<CouponService>,
    risk: Arc<RiskAssessor>,
    renewals: Arc<RenewalService>,
    redis: Option<Arc<redis::Client>>,
    event_sender: EventSender,
    order_expiry_minutes: i64,
}

impl PaymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: OrderStore,
        registry: Arc<ProviderRegistry>,
        memberships: Arc<MembershipService>,
        coupons: Arc<CouponService>,
        risk: Arc<RiskAssessor>,
        renewals: Arc<RenewalService>,
        redis: Option<Arc<redis::Client>>,
        event_sender: EventSender,
        order_expiry_minutes: i64,
    ) -> Self {
        Self {
            store,
            registry,
            memberships,
            coupons,
            risk,
            renewals,
            redis,
            event_sender,
            order_expiry_minutes,
        }
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    /// The provider-specific ack body for a webhook endpoint.
    pub fn webhook_ack(&self, provider: ProviderId) -> Result<ProviderAck, ServiceError> {
        Ok(self.registry.get(provider)?.success_ack())
    }

    /// Create an order: risk gate, coupon quote, durable insert, provider
    /// registration, activation to `pending`.
    ///
    /// A provider failure leaves the row terminally `closed`, never in an
    /// ambiguous half-created state; the caller retries with a fresh order.
    #[instrument(skip(self, cmd), fields(user_id = %cmd.user_id, plan_id = %cmd.plan_id, provider = %cmd.provider))]
    pub async fn create_order(&self, cmd: CreateOrderCommand) -> Result<OrderCreated, ServiceError> {
        let plan = self.memberships.get_active_plan(cmd.plan_id).await?;

        let assessment = self.risk.assess(cmd.user_id, plan.price, &cmd.ctx).await?;
        if !assessment.allow {
            metrics::counter!("orders_risk_denied_total", 1);
            return Err(ServiceError::RiskDenied {
                reasons: assessment.reasons,
            });
        }

        let quote = match &cmd.coupon_code {
            Some(code) => Some(
                self.coupons
                    .validate(code, cmd.user_id, plan.price, plan.id)
                    .await?,
            ),
            None => None,
        };
        let discount_amount = quote
            .as_ref()
            .map(|q| q.discount_amount)
            .unwrap_or(Decimal::ZERO);

        let order_id = Uuid::new_v4();
        let order = self
            .store
            .create(NewOrder {
                id: order_id,
                user_id: cmd.user_id,
                plan_id: cmd.plan_id,
                provider: cmd.provider.to_string(),
                original_amount: plan.price,
                discount_amount,
                coupon_id: quote.as_ref().map(|q| q.coupon_id),
                renewal_subscription_id: cmd.renewal_subscription_id,
            })
            .await?;

        if let Some(q) = &quote {
            // Sole writer of used_count, and only now that the order exists.
            if let Err(err) = self
                .coupons
                .apply(q.coupon_id, cmd.user_id, order_id, plan.price, q.discount_amount)
                .await
            {
                self.abandon_created_order(order_id).await;
                return Err(err);
            }
        }

        let adapter = self.registry.get(cmd.provider)?;
        let spec = ProviderOrderSpec {
            order_id,
            user_id: cmd.user_id,
            amount: order.final_amount,
            currency: CURRENCY.to_string(),
            subject: format!("{} membership", plan.name),
            off_session_token: cmd.off_session_token.clone(),
            expires_in_minutes: self.order_expiry_minutes,
        };

        let provider_order = match adapter.create_order(&spec).await {
            Ok(po) => po,
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "provider order registration failed");
                self.abandon_created_order(order_id).await;
                return Err(err.into_service_error());
            }
        };

        let redirect_json = serde_json::to_string(&provider_order.redirect)
            .map_err(|e| ServiceError::InternalError(format!("redirect encode: {e}")))?;
        let activation = self
            .store
            .compare_and_set_status(
                order_id,
                OrderStatus::Created,
                OrderStatus::Pending,
                StatusPatch {
                    provider_reference: Some(provider_order.provider_reference.clone()),
                    redirect_payload: Some(redirect_json),
                    ..Default::default()
                },
            )
            .await?;
        if activation == CasOutcome::Conflict {
            return Err(ServiceError::TransientError(format!(
                "order {order_id} raced during activation"
            )));
        }

        self.event_sender
            .send(Event::OrderCreated {
                order_id,
                user_id: cmd.user_id,
                provider: cmd.provider.to_string(),
                final_amount: order.final_amount,
            })
            .await;
        metrics::counter!("orders_created_total", 1);
        info!(order_id = %order_id, reference = %provider_order.provider_reference, "order activated");

        Ok(OrderCreated {
            order_id,
            status: OrderStatus::Pending,
            original_amount: order.original_amount,
            discount_amount: order.discount_amount,
            final_amount: order.final_amount,
            redirect: provider_order.redirect,
            expires_at: provider_order.expires_at,
        })
    }

    /// Verify, normalize and reconcile one webhook delivery. Duplicate and
    /// out-of-order deliveries are expected traffic: anything that cannot
    /// move the order forward is absorbed and acked, never an error to the
    /// provider.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn handle_webhook(
        &self,
        provider: ProviderId,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookOutcome, ServiceError> {
        let adapter = self.registry.get(provider)?;

        let notice = match adapter.verify_and_parse_webhook(payload, headers) {
            Ok(notice) => notice,
            Err(ProviderError::Unsupported(msg)) => {
                info!(provider = %provider, %msg, "webhook event outside payment lifecycle");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(err) => return Err(err.into_service_error()),
        };

        if let Some(event_id) = &notice.event_id {
            if self.is_duplicate_event(provider, event_id).await {
                info!(provider = %provider, event_id = %event_id, "webhook replay short-circuited");
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        let target = order_status_for(notice.status);
        self.reconcile(provider, &notice.provider_reference, target)
            .await
    }

    /// Privileged refund of a paid order.
    #[instrument(skip_all, fields(order_id = %order_id, amount = %amount))]
    pub async fn refund(
        &self,
        order_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.store.get(order_id).await?;
        let current = OrderStatus::parse(&order.status)?;
        if current != OrderStatus::Paid {
            return Err(ServiceError::Conflict(format!(
                "order {order_id} is {current}; only paid orders can be refunded"
            )));
        }
        if amount <= Decimal::ZERO || amount > order.final_amount {
            return Err(ServiceError::ValidationError(format!(
                "refund amount must be within (0, {}]",
                order.final_amount
            )));
        }

        let reference = order.provider_reference.clone().ok_or_else(|| {
            ServiceError::InternalError(format!("paid order {order_id} has no provider reference"))
        })?;
        let provider = ProviderId::parse(&order.provider).map_err(|e| e.into_service_error())?;
        let adapter = self.registry.get(provider)?;

        adapter
            .refund(&reference, amount, reason)
            .await
            .map_err(|e| e.into_service_error())?;

        let outcome = self
            .store
            .compare_and_set_status(
                order_id,
                OrderStatus::Paid,
                OrderStatus::Refunded,
                StatusPatch {
                    refunded_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        match outcome {
            CasOutcome::Applied => {
                self.event_sender
                    .send(Event::OrderStatusChanged {
                        order_id,
                        from: OrderStatus::Paid.to_string(),
                        to: OrderStatus::Refunded.to_string(),
                    })
                    .await;
                self.run_side_effects(&order, OrderStatus::Refunded).await?;
                self.store.get(order_id).await
            }
            CasOutcome::Conflict => Err(ServiceError::TransientError(format!(
                "order {order_id} changed state during refund"
            ))),
        }
    }

    /// Read the order, optionally reconciling against a provider status poll.
    /// A disagreement resolves toward whichever status is further along the
    /// state machine; status never rolls back.
    #[instrument(skip_all, fields(order_id = %order_id, refresh))]
    pub async fn get_order_status(
        &self,
        order_id: Uuid,
        refresh: bool,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.store.get(order_id).await?;
        let current = OrderStatus::parse(&order.status)?;

        if !refresh || current.is_terminal() || order.provider_reference.is_none() {
            return Ok(order);
        }

        let provider = ProviderId::parse(&order.provider).map_err(|e| e.into_service_error())?;
        let adapter = self.registry.get(provider)?;
        let reference = order.provider_reference.as_deref().unwrap_or_default();

        match adapter.query_status(reference).await {
            Ok(polled) => {
                let target = order_status_for(polled);
                if target.rank() > current.rank() && current.can_transition(target) {
                    self.reconcile(provider, reference, target).await?;
                    return self.store.get(order_id).await;
                }
                Ok(order)
            }
            Err(err) => {
                // Polling is best effort; the stored status stands.
                warn!(order_id = %order_id, error = %err, "provider status poll failed");
                Ok(order)
            }
        }
    }

    /// Close an unpaid order that outlived its payment window, both at the
    /// provider and locally.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn close_expired(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = self.store.get(order_id).await?;
        let current = OrderStatus::parse(&order.status)?;
        if current != OrderStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "order {order_id} is {current}; only pending orders can be closed"
            )));
        }
        let deadline = order.created_at + Duration::minutes(self.order_expiry_minutes);
        if Utc::now() < deadline {
            return Err(ServiceError::Conflict(format!(
                "order {order_id} is still inside its payment window"
            )));
        }

        if let Some(reference) = order.provider_reference.as_deref() {
            let provider =
                ProviderId::parse(&order.provider).map_err(|e| e.into_service_error())?;
            let adapter = self.registry.get(provider)?;
            if let Err(err) = adapter.close(reference).await {
                // A webhook may already have resolved it; the CAS below is
                // the arbiter either way.
                warn!(order_id = %order_id, error = %err, "provider close failed");
            }
        }

        match self
            .store
            .compare_and_set_status(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Closed,
                StatusPatch::default(),
            )
            .await?
        {
            CasOutcome::Applied => self.store.get(order_id).await,
            CasOutcome::Conflict => Err(ServiceError::Conflict(format!(
                "order {order_id} changed state while closing"
            ))),
        }
    }

    /// Look up the order by provider reference and push it to `target`,
    /// retrying the lookup-and-CAS exactly once on a race.
    async fn reconcile(
        &self,
        provider: ProviderId,
        reference: &str,
        target: OrderStatus,
    ) -> Result<WebhookOutcome, ServiceError> {
        for attempt in 0..2 {
            let order = self
                .store
                .find_by_provider_reference(&provider.to_string(), reference)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("no order for provider reference {reference}"))
                })?;
            let current = OrderStatus::parse(&order.status)?;

            if current == target {
                // Redelivery, possibly after a crash between the CAS and the
                // side effect; the side effects are idempotent, so re-run
                // them to repair that window.
                self.run_side_effects(&order, target).await?;
                return Ok(WebhookOutcome::AlreadyApplied);
            }

            if !current.can_transition(target) {
                warn!(
                    order_id = %order.id,
                    current = %current,
                    reported = %target,
                    "invariant violation: non-forward webhook transition absorbed"
                );
                self.event_sender
                    .send(Event::StaleWebhookIgnored {
                        order_id: order.id,
                        current: current.to_string(),
                        reported: target.to_string(),
                    })
                    .await;
                metrics::counter!("webhooks_stale_ignored_total", 1);
                return Ok(WebhookOutcome::Absorbed);
            }

            let patch = match target {
                OrderStatus::Paid => StatusPatch {
                    paid_at: Some(Utc::now()),
                    ..Default::default()
                },
                OrderStatus::Refunded => StatusPatch {
                    refunded_at: Some(Utc::now()),
                    ..Default::default()
                },
                _ => StatusPatch::default(),
            };

            match self
                .store
                .compare_and_set_status(order.id, current, target, patch)
                .await?
            {
                CasOutcome::Applied => {
                    self.event_sender
                        .send(Event::OrderStatusChanged {
                            order_id: order.id,
                            from: current.to_string(),
                            to: target.to_string(),
                        })
                        .await;
                    self.run_side_effects(&order, target).await?;
                    metrics::counter!("webhooks_applied_total", 1);
                    return Ok(WebhookOutcome::Applied(target));
                }
                CasOutcome::Conflict => {
                    if attempt == 0 {
                        continue;
                    }
                }
            }
        }
        Err(ServiceError::TransientError(format!(
            "order for reference {reference} raced twice during reconciliation"
        )))
    }

    /// Membership/renewal side effects for transitions into `paid` and
    /// `refunded`. Each callee detects reapplication itself, so running this
    /// again for the same order is harmless.
    async fn run_side_effects(
        &self,
        order: &OrderModel,
        target: OrderStatus,
    ) -> Result<(), ServiceError> {
        match target {
            OrderStatus::Paid => {
                let new_expiry = self.memberships.on_payment_confirmed(order).await?;
                if order.renewal_subscription_id.is_some() {
                    self.renewals.on_renewal_confirmed(order, new_expiry).await?;
                }
                self.event_sender
                    .send(Event::PaymentConfirmed {
                        order_id: order.id,
                        user_id: order.user_id,
                    })
                    .await;
            }
            OrderStatus::Refunded => {
                self.memberships.on_refund_confirmed(order).await?;
                self.event_sender
                    .send(Event::RefundConfirmed {
                        order_id: order.id,
                        user_id: order.user_id,
                        amount: order.final_amount,
                    })
                    .await;
            }
            _ => {}
        }
        Ok(())
    }

    /// Best-effort cleanup of a `created` row whose activation fell through.
    async fn abandon_created_order(&self, order_id: Uuid) {
        if let Err(err) = self
            .store
            .compare_and_set_status(
                order_id,
                OrderStatus::Created,
                OrderStatus::Closed,
                StatusPatch::default(),
            )
            .await
        {
            warn!(order_id = %order_id, error = %err, "failed to close abandoned order");
        }
    }

    /// Replay cache over the provider event id, best effort: the CAS remains
    /// the correctness backstop when Redis is absent or unreachable.
    async fn is_duplicate_event(&self, provider: ProviderId, event_id: &str) -> bool {
        let Some(client) = &self.redis else {
            return false;
        };
        match client.get_async_connection().await {
            Ok(mut conn) => {
                let key = format!("wh:{provider}:{event_id}");
                let set: Result<Option<String>, _> = redis::cmd("SET")
                    .arg(&key)
                    .arg("1")
                    .arg("NX")
                    .arg("EX")
                    .arg(24 * 3600)
                    .query_async(&mut conn)
                    .await;
                matches!(set, Ok(None))
            }
            Err(err) => {
                warn!(error = %err, "webhook replay cache unavailable");
                false
            }
        }
    }
}

/// Collapse the provider vocabulary into order states: an in-flight
/// (`processing`) payment keeps the order `pending`.
pub(crate) fn order_status_for(status: NormalizedStatus) -> OrderStatus {
    match status {
        NormalizedStatus::Pending | NormalizedStatus::Processing => OrderStatus::Pending,
        NormalizedStatus::Paid => OrderStatus::Paid,
        NormalizedStatus::Failed => OrderStatus::Failed,
        NormalizedStatus::Cancelled => OrderStatus::Cancelled,
        NormalizedStatus::Closed => OrderStatus::Closed,
        NormalizedStatus::Refunded => OrderStatus::Refunded,
    }
}
