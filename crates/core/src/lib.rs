//! Domain types for order status notifications.
//!
//! Everything here is pure: the status table, the order record shape, and the
//! [`plan`](plan::plan) function deciding what to send for a status change.
pub mod plan;
pub mod status;
pub mod types;

pub use plan::{compose_body, plan, Plan};
pub use status::{lookup_template, OrderStatus, StatusTemplate};
pub use types::{
    MessageData, NotificationContent, Order, PresentationHints, PushMessage, SkipReason,
    StatusChange, WebpushConfig, WebpushFcmOptions, WebpushNotification,
};
