//! Quake Delivery
//!
//! Outbound side of the alert engine: the messaging channel contract, a
//! shared token-bucket limiter, the gateway that applies it with timeouts,
//! and the handler that deactivates unreachable subscribers.
//!
//! # Error classes
//!
//! | Class | Examples | Effect |
//! |---|---|---|
//! | permanent | blocked, deactivated, chat not found | subscriber disabled and persisted |
//! | benign | message not modified | treated as success |
//! | transient | timeout, network, throttling | logged, retried by the next event |

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod channel;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod limiter;

#[cfg(any(test, feature = "testing"))]
pub use channel::MockDeliveryChannel;
pub use channel::{Attachment, DeliveryChannel, Image, OutboundMessage};
pub use error::DeliveryError;
pub use gateway::{BroadcastReport, DeliveryConfig, DeliveryGateway, DeliveryStats};
pub use lifecycle::SubscriberLifecycle;
pub use limiter::{RateLimiter, TokenBucket};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
