//! Order types for the Kite Connect order API.
//!
//! Enum spellings match the wire values the API expects in form-encoded
//! order requests.

use serde::{Deserialize, Serialize};

/// Order variety, selecting the `/orders/{variety}` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderVariety {
    Regular,
    Amo,
    Co,
    Iceberg,
    Auction,
}

impl OrderVariety {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderVariety::Regular => "regular",
            OrderVariety::Amo => "amo",
            OrderVariety::Co => "co",
            OrderVariety::Iceberg => "iceberg",
            OrderVariety::Auction => "auction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    Sl,
    SlM,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Sl => "SL",
            OrderType::SlM => "SL-M",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProductType {
    /// Normal F&O carry-forward.
    Nrml,
    /// Intraday.
    Mis,
    /// Cash and carry (equity delivery).
    Cnc,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Nrml => "NRML",
            ProductType::Mis => "MIS",
            ProductType::Cnc => "CNC",
        }
    }
}

/// Terminal and in-flight order states reported by the order API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Complete,
    Cancelled,
    Rejected,
    Pending,
}

impl OrderStatus {
    pub fn from_api(status: &str) -> Self {
        match status {
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            "OPEN" => OrderStatus::Open,
            _ => OrderStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// One order to be placed.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub tradingsymbol: String,
    pub exchange: String,
    pub transaction_type: TransactionType,
    pub order_type: OrderType,
    pub quantity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    pub product: ProductType,
    pub validity: String,
}

impl OrderRequest {
    /// A day-validity NRML limit order, the shape every box leg uses.
    pub fn limit(
        tradingsymbol: &str,
        exchange: &str,
        side: TransactionType,
        quantity: u64,
        price: f64,
    ) -> Self {
        Self {
            tradingsymbol: tradingsymbol.to_string(),
            exchange: exchange.to_string(),
            transaction_type: side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            trigger_price: None,
            product: ProductType::Nrml,
            validity: "DAY".to_string(),
        }
    }
}

/// Snapshot of an order's state from the order API.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub average_price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_spellings() {
        assert_eq!(OrderType::SlM.as_str(), "SL-M");
        assert_eq!(TransactionType::Sell.as_str(), "SELL");
        assert_eq!(OrderVariety::Regular.as_str(), "regular");
        assert_eq!(ProductType::Nrml.as_str(), "NRML");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(OrderStatus::from_api("COMPLETE"), OrderStatus::Complete);
        assert_eq!(OrderStatus::from_api("TRIGGER PENDING"), OrderStatus::Pending);
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
    }

    #[test]
    fn limit_order_defaults() {
        let req = OrderRequest::limit("NIFTY24JUN18000CE", "NFO", TransactionType::Buy, 50, 30.5);
        assert_eq!(req.order_type, OrderType::Limit);
        assert_eq!(req.price, Some(30.5));
        assert_eq!(req.validity, "DAY");
        assert_eq!(req.product, ProductType::Nrml);
    }
}
