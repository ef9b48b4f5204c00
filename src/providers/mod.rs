//! Payment network adapters.
//!
//! Each external network is wrapped in a stateless [`ProviderAdapter`] that
//! translates the generic order contract into provider calls and normalizes
//! provider vocabulary into [`NormalizedStatus`]. Adapters are registered in
//! a [`ProviderRegistry`] keyed by [`ProviderId`]; nothing outside this
//! module speaks a provider-specific dialect.

pub mod adapter;
pub mod alipay;
pub mod client;
pub mod error;
pub mod registry;
pub mod signature;
pub mod stripe;
pub mod types;
pub mod unionpay;
pub mod wechat;

pub use adapter::ProviderAdapter;
pub use error::ProviderError;
pub use registry::ProviderRegistry;
pub use types::{
    NormalizedStatus, ProviderAck, ProviderId, ProviderOrder, ProviderOrderSpec, RedirectPayload,
    RefundReference, WebhookNotice,
};
