use std::fmt;

use serde::{Deserialize, Serialize};

/// Order status values written by the order management application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "Pendente")]
    Pending,
    #[serde(rename = "Em Preparo")]
    InPreparation,
    #[serde(rename = "Pronto")]
    Ready,
    #[serde(rename = "Saiu para Entrega")]
    OutForDelivery,
    #[serde(rename = "Entregue")]
    Delivered,
    #[serde(rename = "Cancelado")]
    Cancelled,
}

impl OrderStatus {
    /// Every status known to this build, in lifecycle order.
    pub const ALL: [OrderStatus; 6] = [
        Self::Pending,
        Self::InPreparation,
        Self::Ready,
        Self::OutForDelivery,
        Self::Delivered,
        Self::Cancelled,
    ];

    /// Parses the value stored in the database. Unknown values yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
    }

    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pendente",
            Self::InPreparation => "Em Preparo",
            Self::Ready => "Pronto",
            Self::OutForDelivery => "Saiu para Entrega",
            Self::Delivered => "Entregue",
            Self::Cancelled => "Cancelado",
        }
    }

    /// Returns the notification template for the status.
    pub fn template(self) -> &'static StatusTemplate {
        match self {
            Self::Pending => &PENDING,
            Self::InPreparation => &IN_PREPARATION,
            Self::Ready => &READY,
            Self::OutForDelivery => &OUT_FOR_DELIVERY,
            Self::Delivered => &DELIVERED,
            Self::Cancelled => &CANCELLED,
        }
    }

    /// Label used for metrics and structured logs.
    pub fn metric_label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InPreparation => "in_preparation",
            Self::Ready => "ready",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Title and body shown to the customer when an order reaches a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTemplate {
    pub title: &'static str,
    pub body: &'static str,
}

static PENDING: StatusTemplate = StatusTemplate {
    title: "✅ Pedido Recebido!",
    body: "Seu pedido foi recebido e está sendo processado.",
};

static IN_PREPARATION: StatusTemplate = StatusTemplate {
    title: "👨‍🍳 Preparando seu Pedido!",
    body: "Estamos preparando seu pedido com muito carinho!",
};

static READY: StatusTemplate = StatusTemplate {
    title: "✅ Pedido Pronto!",
    body: "Seu pedido está pronto e aguardando entrega!",
};

static OUT_FOR_DELIVERY: StatusTemplate = StatusTemplate {
    title: "🛵 Saiu para Entrega!",
    body: "Seu pedido está a caminho! O entregador já saiu.",
};

static DELIVERED: StatusTemplate = StatusTemplate {
    title: "🎉 Pedido Entregue!",
    body: "Seu pedido foi entregue! Bom apetite! 😋",
};

static CANCELLED: StatusTemplate = StatusTemplate {
    title: "❌ Pedido Cancelado",
    body: "Seu pedido foi cancelado. Entre em contato se tiver dúvidas.",
};

/// Resolves the template for a raw status value.
///
/// Statuses introduced upstream after this build return `None` and are
/// expected to be skipped by callers.
pub fn lookup_template(raw_status: &str) -> Option<(OrderStatus, &'static StatusTemplate)> {
    OrderStatus::from_wire(raw_status).map(|status| (status, status.template()))
}
