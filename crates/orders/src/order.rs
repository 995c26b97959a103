use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradepost_core::{Aggregate, AggregateRoot, DomainError, OrderId, ProductId, UserId};
use tradepost_events::Event;

/// Order status lifecycle.
///
/// `pending -> processing -> shipped -> delivered`, with cancellation
/// allowed from `pending` and `processing`. `delivered` and `cancelled`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown order status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// Immutable snapshot of a product at order-creation time.
///
/// Never recomputed from the live catalog afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents), at placement time.
    pub unit_price: u64,
}

impl OrderLine {
    pub fn line_total(&self) -> Option<u64> {
        u64::try_from(self.quantity)
            .ok()
            .and_then(|q| self.unit_price.checked_mul(q))
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: Option<UserId>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    total_amount: u64,
    placed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            user_id: None,
            status: OrderStatus::Pending,
            lines: Vec::new(),
            total_amount: 0,
            placed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. The one write path that creates an order; the total
/// is computed here from the line snapshots, never taken from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartProcessing (pending -> processing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProcessing {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipped (processing -> shipped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipped {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered (shipped -> delivered, terminal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder ({pending, processing} -> cancelled, terminal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    StartProcessing(StartProcessing),
    MarkShipped(MarkShipped),
    MarkDelivered(MarkDelivered),
    CancelOrder(CancelOrder),
}

impl OrderCommand {
    /// Map a requested target status to the transition command that reaches
    /// it. `Pending` is not a transition target (it is the initial state).
    pub fn transition_to(
        order_id: OrderId,
        target: OrderStatus,
        occurred_at: DateTime<Utc>,
    ) -> Option<Self> {
        match target {
            OrderStatus::Pending => None,
            OrderStatus::Processing => Some(OrderCommand::StartProcessing(StartProcessing {
                order_id,
                occurred_at,
            })),
            OrderStatus::Shipped => Some(OrderCommand::MarkShipped(MarkShipped {
                order_id,
                occurred_at,
            })),
            OrderStatus::Delivered => Some(OrderCommand::MarkDelivered(MarkDelivered {
                order_id,
                occurred_at,
            })),
            OrderStatus::Cancelled => Some(OrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at,
            })),
        }
    }
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLine>,
    pub total_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderProcessingStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderProcessingStarted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderProcessingStarted(OrderProcessingStarted),
    OrderShipped(OrderShipped),
    OrderDelivered(OrderDelivered),
    OrderCancelled(OrderCancelled),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "order.placed",
            OrderEvent::OrderProcessingStarted(_) => "order.processing_started",
            OrderEvent::OrderShipped(_) => "order.shipped",
            OrderEvent::OrderDelivered(_) => "order.delivered",
            OrderEvent::OrderCancelled(_) => "order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderProcessingStarted(e) => e.occurred_at,
            OrderEvent::OrderShipped(e) => e.occurred_at,
            OrderEvent::OrderDelivered(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.user_id = Some(e.user_id);
                self.status = OrderStatus::Pending;
                self.lines = e.lines.clone();
                self.total_amount = e.total_amount;
                self.placed_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderProcessingStarted(_) => {
                self.status = OrderStatus::Processing;
            }
            OrderEvent::OrderShipped(_) => {
                self.status = OrderStatus::Shipped;
            }
            OrderEvent::OrderDelivered(_) => {
                self.status = OrderStatus::Delivered;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::StartProcessing(cmd) => self.handle_start_processing(cmd),
            OrderCommand::MarkShipped(cmd) => self.handle_mark_shipped(cmd),
            OrderCommand::MarkDelivered(cmd) => self.handle_mark_delivered(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.created && self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot place an order without lines"));
        }

        let mut total: u64 = 0;
        for line in &cmd.lines {
            if line.quantity < 1 {
                return Err(DomainError::validation("line quantity must be at least 1"));
            }
            if line.product_name.trim().is_empty() {
                return Err(DomainError::validation("line product name cannot be empty"));
            }
            let line_total = line
                .line_total()
                .ok_or_else(|| DomainError::validation("line total overflows"))?;
            total = total
                .checked_add(line_total)
                .ok_or_else(|| DomainError::validation("order total overflows"))?;
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            user_id: cmd.user_id,
            lines: cmd.lines.clone(),
            total_amount: total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_processing(
        &self,
        cmd: &StartProcessing,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant(
                "only pending orders can start processing",
            ));
        }

        Ok(vec![OrderEvent::OrderProcessingStarted(
            OrderProcessingStarted {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_mark_shipped(&self, cmd: &MarkShipped) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Processing {
            return Err(DomainError::invariant(
                "only processing orders can be shipped",
            ));
        }

        Ok(vec![OrderEvent::OrderShipped(OrderShipped {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_delivered(&self, cmd: &MarkDelivered) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Shipped {
            return Err(DomainError::invariant(
                "only shipped orders can be delivered",
            ));
        }

        Ok(vec![OrderEvent::OrderDelivered(OrderDelivered {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Processing) {
            return Err(DomainError::invariant(
                "only pending or processing orders can be cancelled",
            ));
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order_id() -> OrderId {
        OrderId::new()
    }

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn snapshot(name: &str, quantity: i64, unit_price: u64) -> OrderLine {
        OrderLine {
            product_id: ProductId::new(),
            product_name: name.to_string(),
            quantity,
            unit_price,
        }
    }

    fn placed_order(lines: Vec<OrderLine>) -> Order {
        let order_id = test_order_id();
        let mut order = Order::empty(order_id);
        let events = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: test_user_id(),
                lines,
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);
        order
    }

    fn transition(order: &mut Order, cmd: OrderCommand) -> Result<(), DomainError> {
        let events = order.handle(&cmd)?;
        for e in &events {
            order.apply(e);
        }
        Ok(())
    }

    #[test]
    fn place_order_computes_total_from_snapshots() {
        let order = placed_order(vec![
            snapshot("Walnut desk", 2, 12_900),
            snapshot("Brass lamp", 1, 4_500),
        ]);

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_amount(), 2 * 12_900 + 4_500);
        assert_eq!(order.lines().len(), 2);
        assert!(order.placed_at().is_some());
    }

    #[test]
    fn place_order_without_lines_is_rejected() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: test_user_id(),
                lines: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn place_order_rejects_non_positive_line_quantity() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: test_user_id(),
                lines: vec![snapshot("Walnut desk", 0, 100)],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn full_lifecycle_to_delivered() {
        let mut order = placed_order(vec![snapshot("Walnut desk", 1, 12_900)]);
        let order_id = order.id_typed();

        transition(
            &mut order,
            OrderCommand::StartProcessing(StartProcessing {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.status(), OrderStatus::Processing);

        transition(
            &mut order,
            OrderCommand::MarkShipped(MarkShipped {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);

        transition(
            &mut order,
            OrderCommand::MarkDelivered(MarkDelivered {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.status().is_terminal());
    }

    #[test]
    fn cancel_is_allowed_from_pending_and_processing_only() {
        let mut order = placed_order(vec![snapshot("Walnut desk", 1, 12_900)]);
        let order_id = order.id_typed();

        // pending -> cancelled
        transition(
            &mut order,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);

        // shipped orders cannot be cancelled
        let mut order = placed_order(vec![snapshot("Brass lamp", 1, 4_500)]);
        let order_id = order.id_typed();
        transition(
            &mut order,
            OrderCommand::StartProcessing(StartProcessing {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        transition(
            &mut order,
            OrderCommand::MarkShipped(MarkShipped {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let err = transition(
            &mut order,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        let mut order = placed_order(vec![snapshot("Walnut desk", 1, 12_900)]);
        let order_id = order.id_typed();
        transition(
            &mut order,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        for target in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            let cmd = OrderCommand::transition_to(order_id, target, test_time()).unwrap();
            assert!(order.handle(&cmd).is_err(), "{target:?} accepted from cancelled");
        }
    }

    #[test]
    fn skipping_a_lifecycle_step_is_rejected() {
        let order = placed_order(vec![snapshot("Walnut desk", 1, 12_900)]);
        let order_id = order.id_typed();

        let err = order
            .handle(&OrderCommand::MarkShipped(MarkShipped {
                order_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn transition_to_pending_is_not_a_command() {
        assert!(OrderCommand::transition_to(test_order_id(), OrderStatus::Pending, test_time()).is_none());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::parse("returned").is_err());
    }
}
