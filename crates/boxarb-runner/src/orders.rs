//! # Order Manager
//!
//! Live routing for a ranked box: four limit orders at last price, one per
//! leg, then a polling wait for all legs to complete within a deadline.
//! Order endpoints go through the same rate-limited client as market data
//! (they land on the limiter's `default` cell).

use boxarb_connectors::{KiteClient, Result};
use boxarb_core::Settings;
use boxarb_models::order::{OrderRecord, OrderRequest, OrderStatus, OrderVariety, TransactionType};
use boxarb_models::BoxSpread;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How often the execution waiter re-polls order status.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct OrderManager {
    client: Arc<KiteClient>,
    #[allow(dead_code)]
    settings: Arc<Settings>,
}

impl OrderManager {
    pub fn new(client: Arc<KiteClient>, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// Places the four legs as limit orders at their last prices. Returns
    /// the order ids in leg order. Any leg failing fails the call.
    pub async fn place_box_spread(&self, spread: &BoxSpread, quantity: u64) -> Result<Vec<String>> {
        info!("placing box spread order for {} (q={})", spread.id, quantity);

        let legs = [
            (&spread.long_call_lower, TransactionType::Buy),
            (&spread.short_call_higher, TransactionType::Sell),
            (&spread.long_put_higher, TransactionType::Buy),
            (&spread.short_put_lower, TransactionType::Sell),
        ];

        let mut order_ids = Vec::with_capacity(4);
        for (leg, side) in legs {
            let request = OrderRequest::limit(
                &leg.tradingsymbol,
                &leg.exchange,
                side,
                quantity,
                leg.quote.last_price,
            );
            let order_id = self.place_order(OrderVariety::Regular, &request).await?;
            order_ids.push(order_id);
        }

        info!("box spread {}: all four legs placed", spread.id);
        Ok(order_ids)
    }

    pub async fn place_order(&self, variety: OrderVariety, order: &OrderRequest) -> Result<String> {
        let endpoint = format!("/orders/{}", variety.as_str());
        let mut form = vec![
            ("tradingsymbol".to_string(), order.tradingsymbol.clone()),
            ("exchange".to_string(), order.exchange.clone()),
            ("transaction_type".to_string(), order.transaction_type.as_str().to_string()),
            ("order_type".to_string(), order.order_type.as_str().to_string()),
            ("quantity".to_string(), order.quantity.to_string()),
            ("product".to_string(), order.product.as_str().to_string()),
            ("validity".to_string(), order.validity.clone()),
        ];
        if let Some(price) = order.price {
            form.push(("price".to_string(), format!("{price:.2}")));
        }
        if let Some(trigger) = order.trigger_price {
            form.push(("trigger_price".to_string(), format!("{trigger:.2}")));
        }

        let data = self.client.post_form(&endpoint, &form).await?;
        let order_id = data
            .get("order_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!(
            "order placed: {} {} x{} -> id {}",
            order.transaction_type.as_str(),
            order.tradingsymbol,
            order.quantity,
            order_id
        );
        Ok(order_id)
    }

    /// Latest state of one order (last entry of its history).
    pub async fn order_status(&self, order_id: &str) -> Result<OrderRecord> {
        let endpoint = format!("/orders/{order_id}");
        let data = self.client.get_json(&endpoint, &[]).await?;

        let last = data
            .as_array()
            .and_then(|entries| entries.last())
            .cloned()
            .unwrap_or(Value::Null);
        Ok(OrderRecord {
            order_id: order_id.to_string(),
            status: OrderStatus::from_api(
                last.get("status").and_then(Value::as_str).unwrap_or(""),
            ),
            filled_quantity: last.get("filled_quantity").and_then(Value::as_u64).unwrap_or(0),
            average_price: last.get("average_price").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }

    /// Polls until every order is COMPLETE, any order fails terminally, or
    /// the deadline passes. Returns whether all legs executed.
    pub async fn wait_for_execution(&self, order_ids: &[String], timeout_secs: u64) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);

        loop {
            let mut complete = 0usize;
            for order_id in order_ids {
                let record = self.order_status(order_id).await?;
                match record.status {
                    OrderStatus::Complete => complete += 1,
                    OrderStatus::Cancelled | OrderStatus::Rejected => {
                        error!("order {} ended {:?}", order_id, record.status);
                        return Ok(false);
                    }
                    _ => {}
                }
            }
            if complete == order_ids.len() {
                info!("all {} legs executed", order_ids.len());
                return Ok(true);
            }
            if Instant::now() >= deadline {
                warn!(
                    "execution wait timed out with {}/{} legs complete",
                    complete,
                    order_ids.len()
                );
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn cancel_order(&self, order_id: &str, variety: OrderVariety) -> Result<()> {
        let endpoint = format!("/orders/{}/{}", variety.as_str(), order_id);
        self.client.delete(&endpoint).await?;
        info!("order {} cancelled", order_id);
        Ok(())
    }
}
