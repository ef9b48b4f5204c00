use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Auto-renewal enrollment. Written only by the renewal service; the sweep
/// reads it and records attempt bookkeeping after each charge.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "renewal_subscriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub provider: String,

    /// AES-GCM envelope, base64. Only the token vault reads the plaintext.
    pub payment_token_enc: String,

    /// active | disabled
    pub status: String,

    pub next_renewal_date: DateTime<Utc>,
    pub last_renewal_date: Option<DateTime<Utc>>,

    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_order_id: Option<Uuid>,
    pub reminder_sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
