//! Order lifecycle state machine.
//!
//! Legal edges:
//!
//! ```text
//! WaitForPayment --System--> Pending --Admin--> Approved --Admin--> Shipping --Customer--> Received
//!       |                       |
//!       +--Customer--> Cancelled +--Admin--> Rejected
//! ```
//!
//! `Returning`, `Returned`, `WaitingForRefund` and `Completed` are recognised
//! when read back from storage but have no inbound edges yet.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum OrderStatus {
    WaitForPayment,
    Pending,
    Approved,
    Shipping,
    Received,
    Returning,
    Returned,
    WaitingForRefund,
    Completed,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 11] = [
        OrderStatus::WaitForPayment,
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Shipping,
        OrderStatus::Received,
        OrderStatus::Returning,
        OrderStatus::Returned,
        OrderStatus::WaitingForRefund,
        OrderStatus::Completed,
        OrderStatus::Rejected,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::WaitForPayment => "WaitForPayment",
            OrderStatus::Pending => "Pending",
            OrderStatus::Approved => "Approved",
            OrderStatus::Shipping => "Shipping",
            OrderStatus::Received => "Received",
            OrderStatus::Returning => "Returning",
            OrderStatus::Returned => "Returned",
            OrderStatus::WaitingForRefund => "WaitingForRefund",
            OrderStatus::Completed => "Completed",
            OrderStatus::Rejected => "Rejected",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Completed
        )
    }

    /// The forward edge taken by `advance`, if the status has one.
    pub fn forward(self) -> Option<Transition> {
        let (to, actor) = match self {
            OrderStatus::WaitForPayment => (OrderStatus::Pending, Actor::System),
            OrderStatus::Pending => (OrderStatus::Approved, Actor::Admin),
            OrderStatus::Approved => (OrderStatus::Shipping, Actor::Admin),
            OrderStatus::Shipping => (OrderStatus::Received, Actor::Customer),
            // TODO: wire Received -> Returning once the return request flow exists.
            OrderStatus::Received
            | OrderStatus::Returning
            | OrderStatus::Returned
            | OrderStatus::WaitingForRefund
            | OrderStatus::Completed
            | OrderStatus::Rejected
            | OrderStatus::Cancelled => return None,
        };
        Some(Transition {
            from: self,
            to,
            actor,
        })
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TransitionError::InvalidStatus(s.to_string()))
    }
}

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The payment confirmation handler.
    System,
    Admin,
    Customer,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::System => "system",
            Actor::Admin => "admin",
            Actor::Customer => "customer",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Advance,
    Reject,
    Cancel,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Advance => "advance",
            Action::Reject => "reject",
            Action::Cancel => "cancel",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
}

const REJECT: Transition = Transition {
    from: OrderStatus::Pending,
    to: OrderStatus::Rejected,
    actor: Actor::Admin,
};

const CANCEL: Transition = Transition {
    from: OrderStatus::WaitForPayment,
    to: OrderStatus::Cancelled,
    actor: Actor::Customer,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid order status '{0}'")]
    InvalidStatus(String),

    #[error("cannot {action} an order in status {actual}{}", required_hint(.required, .target))]
    IllegalTransition {
        action: Action,
        actual: OrderStatus,
        required: Option<OrderStatus>,
        target: Option<OrderStatus>,
    },

    #[error("{actor} is not allowed to move an order from {from} to {to}")]
    ActorNotAllowed {
        actor: Actor,
        from: OrderStatus,
        to: OrderStatus,
    },
}

fn required_hint(required: &Option<OrderStatus>, target: &Option<OrderStatus>) -> String {
    match (required, target) {
        (Some(required), Some(target)) => {
            format!(": status {required} is required before it can become {target}")
        }
        _ => String::new(),
    }
}

/// Audit record for one applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderStatusChanged {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Applies transitions to one order. A failed call leaves the status untouched.
#[derive(Debug, Clone)]
pub struct OrderStatusProcessor {
    order_id: Uuid,
    status: OrderStatus,
}

impl OrderStatusProcessor {
    pub fn new(order_id: Uuid, status: OrderStatus) -> Self {
        Self { order_id, status }
    }

    /// Builds a processor from the persisted status string, failing closed on unknown values.
    pub fn from_stored(order_id: Uuid, status: &str) -> Result<Self, TransitionError> {
        Ok(Self::new(order_id, status.parse()?))
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn advance(&mut self, actor: Actor) -> Result<OrderStatusChanged, TransitionError> {
        match self.status.forward() {
            Some(transition) => self.apply(Action::Advance, transition, actor),
            None => Err(TransitionError::IllegalTransition {
                action: Action::Advance,
                actual: self.status,
                required: None,
                target: None,
            }),
        }
    }

    pub fn reject(&mut self, actor: Actor) -> Result<OrderStatusChanged, TransitionError> {
        self.apply(Action::Reject, REJECT, actor)
    }

    pub fn cancel(&mut self, actor: Actor) -> Result<OrderStatusChanged, TransitionError> {
        self.apply(Action::Cancel, CANCEL, actor)
    }

    fn apply(
        &mut self,
        action: Action,
        transition: Transition,
        actor: Actor,
    ) -> Result<OrderStatusChanged, TransitionError> {
        if self.status != transition.from {
            return Err(TransitionError::IllegalTransition {
                action,
                actual: self.status,
                required: Some(transition.from),
                target: Some(transition.to),
            });
        }
        if actor != transition.actor {
            return Err(TransitionError::ActorNotAllowed {
                actor,
                from: transition.from,
                to: transition.to,
            });
        }

        self.status = transition.to;
        Ok(OrderStatusChanged {
            order_id: self.order_id,
            from: transition.from,
            to: transition.to,
            actor,
            at: Utc::now(),
        })
    }
}
