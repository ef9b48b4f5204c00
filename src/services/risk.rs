use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::RiskConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::OrderStore,
};

/// Per-request context the policy consumes. Built by the handler from the
/// connection; internal callers (the renewal sweep) carry no address.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip: Option<String>,
}

impl RequestContext {
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
        }
    }

    /// Context for charges the system originates itself.
    pub fn internal() -> Self {
        Self { ip: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    High,
    Critical,
}

/// Outcome of a pre-flight assessment. Ephemeral: logged for audit and then
/// dropped; it never becomes mutable order state.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub allow: bool,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

/// Synchronous pre-flight gate in front of order creation. Pure policy over
/// the inputs plus a trailing-24h window of the user's orders; a store
/// failure fails the creation request, never silently allows it.
#[derive(Clone)]
pub struct RiskAssessor {
    store: OrderStore,
    config: RiskConfig,
    event_sender: EventSender,
}

impl RiskAssessor {
    pub fn new(store: OrderStore, config: RiskConfig, event_sender: EventSender) -> Self {
        Self {
            store,
            config,
            event_sender,
        }
    }

    #[instrument(skip_all, fields(user_id = %user_id, amount = %amount))]
    pub async fn assess(
        &self,
        user_id: Uuid,
        amount: Decimal,
        ctx: &RequestContext,
    ) -> Result<RiskAssessment, ServiceError> {
        let since = Utc::now() - Duration::hours(24);
        let recent = self
            .store
            .recent_for_user(user_id, since)
            .await
            .map_err(|e| {
                warn!(error = %e, "risk window query failed");
                ServiceError::RiskAssessmentUnavailable
            })?;

        let recent_count = recent.len() as u32;
        let recent_amount: Decimal = recent.iter().map(|o| o.final_amount).sum();

        let assessment = evaluate(&self.config, amount, recent_count, recent_amount, ctx);

        self.event_sender
            .send(Event::RiskAssessed {
                user_id,
                allowed: assessment.allow,
                level: assessment.level.to_string(),
                reasons: assessment.reasons.clone(),
            })
            .await;
        info!(
            allow = assessment.allow,
            level = %assessment.level,
            reasons = ?assessment.reasons,
            "risk assessment complete"
        );
        Ok(assessment)
    }
}

/// The policy itself, a pure function so it can be tested without storage.
pub(crate) fn evaluate(
    config: &RiskConfig,
    amount: Decimal,
    recent_count: u32,
    recent_amount: Decimal,
    ctx: &RequestContext,
) -> RiskAssessment {
    let mut level = RiskLevel::Low;
    let mut reasons = Vec::new();
    let mut allow = true;

    if amount > config.high_amount_threshold {
        level = level.max(RiskLevel::High);
        reasons.push(format!(
            "amount {amount} exceeds threshold {}",
            config.high_amount_threshold
        ));
    }

    if let Some(ip) = &ctx.ip {
        if config.ip_blocklist.iter().any(|blocked| blocked == ip) {
            level = RiskLevel::Critical;
            allow = false;
            reasons.push(format!("ip {ip} is blocklisted"));
        }
    }

    if recent_count >= config.daily_order_cap {
        level = RiskLevel::Critical;
        allow = false;
        reasons.push(format!(
            "trailing 24h order count {recent_count} reached cap {}",
            config.daily_order_cap
        ));
    }

    if recent_amount + amount > config.daily_amount_cap {
        level = RiskLevel::Critical;
        allow = false;
        reasons.push(format!(
            "trailing 24h amount {} plus this order exceeds cap {}",
            recent_amount, config.daily_amount_cap
        ));
    }

    RiskAssessment {
        allow,
        level,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> RiskConfig {
        RiskConfig {
            high_amount_threshold: dec!(1000),
            daily_order_cap: 5,
            daily_amount_cap: dec!(3000),
            ip_blocklist: vec!["203.0.113.7".into()],
        }
    }

    #[test]
    fn small_clean_order_is_low_risk() {
        let a = evaluate(
            &config(),
            dec!(30),
            0,
            Decimal::ZERO,
            &RequestContext::from_ip("198.51.100.1"),
        );
        assert!(a.allow);
        assert_eq!(a.level, RiskLevel::Low);
        assert!(a.reasons.is_empty());
    }

    #[test]
    fn large_amount_flags_high_but_allows() {
        let a = evaluate(
            &config(),
            dec!(1500),
            0,
            Decimal::ZERO,
            &RequestContext::internal(),
        );
        assert!(a.allow);
        assert_eq!(a.level, RiskLevel::High);
        assert_eq!(a.reasons.len(), 1);
    }

    #[test]
    fn blocklisted_ip_denies() {
        let a = evaluate(
            &config(),
            dec!(30),
            0,
            Decimal::ZERO,
            &RequestContext::from_ip("203.0.113.7"),
        );
        assert!(!a.allow);
        assert_eq!(a.level, RiskLevel::Critical);
    }

    #[test]
    fn velocity_cap_denies() {
        let a = evaluate(
            &config(),
            dec!(30),
            5,
            dec!(150),
            &RequestContext::internal(),
        );
        assert!(!a.allow);
        assert!(a.reasons.iter().any(|r| r.contains("order count")));
    }

    #[test]
    fn daily_amount_cap_counts_the_current_order() {
        let a = evaluate(
            &config(),
            dec!(100),
            1,
            dec!(2950),
            &RequestContext::internal(),
        );
        assert!(!a.allow);
        assert!(a.reasons.iter().any(|r| r.contains("amount")));
    }

    #[test]
    fn multiple_reasons_accumulate() {
        let a = evaluate(
            &config(),
            dec!(5000),
            9,
            dec!(2900),
            &RequestContext::from_ip("203.0.113.7"),
        );
        assert!(!a.allow);
        assert_eq!(a.level, RiskLevel::Critical);
        assert!(a.reasons.len() >= 3);
    }
}
