use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradepost_core::{Aggregate, AggregateRoot, CartId, DomainError, ProductId, UserId};
use tradepost_events::Event;

/// One product line within a cart. At most one line per product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    /// Always >= 1; a line that would drop below 1 is removed instead.
    pub quantity: i64,
}

/// Aggregate root: a user's shopping cart.
///
/// The cart is created lazily by the first add. Stock bounds are enforced at
/// decision time against the `available_stock` carried on the command (the
/// service reads it from the catalog); the cart itself never performs IO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    id: CartId,
    user_id: Option<UserId>,
    lines: Vec<CartLine>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Cart {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CartId) -> Self {
        Self {
            id,
            user_id: None,
            lines: Vec::new(),
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CartId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of all line quantities; 0 for an absent/empty cart.
    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn line_quantity(&self, product_id: ProductId) -> Option<i64> {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.quantity)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddItem. Merges into an existing line for the same product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Live stock of the product, read by the caller just before deciding.
    pub available_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetItemQuantity. Replaces the line's quantity; < 1 removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetItemQuantity {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub available_stock: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem. Idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClearCart. Empties all lines, keeping the cart record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCart {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    AddItem(AddItem),
    SetItemQuantity(SetItemQuantity),
    RemoveItem(RemoveItem),
    ClearCart(ClearCart),
}

/// Event: CartOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded. `quantity` is the delta merged into the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemQuantitySet. `quantity` is the line's new absolute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantitySet {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartCleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCleared {
    pub cart_id: CartId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartOpened(CartOpened),
    ItemAdded(ItemAdded),
    ItemQuantitySet(ItemQuantitySet),
    ItemRemoved(ItemRemoved),
    CartCleared(CartCleared),
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened(_) => "cart.opened",
            CartEvent::ItemAdded(_) => "cart.item_added",
            CartEvent::ItemQuantitySet(_) => "cart.item_quantity_set",
            CartEvent::ItemRemoved(_) => "cart.item_removed",
            CartEvent::CartCleared(_) => "cart.cleared",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartOpened(e) => e.occurred_at,
            CartEvent::ItemAdded(e) => e.occurred_at,
            CartEvent::ItemQuantitySet(e) => e.occurred_at,
            CartEvent::ItemRemoved(e) => e.occurred_at,
            CartEvent::CartCleared(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartOpened(e) => {
                self.id = e.cart_id;
                self.user_id = Some(e.user_id);
                self.lines.clear();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            CartEvent::ItemAdded(e) => {
                match self.lines.iter_mut().find(|l| l.product_id == e.product_id) {
                    Some(line) => line.quantity += e.quantity,
                    None => self.lines.push(CartLine {
                        product_id: e.product_id,
                        quantity: e.quantity,
                    }),
                }
            }
            CartEvent::ItemQuantitySet(e) => {
                match self.lines.iter_mut().find(|l| l.product_id == e.product_id) {
                    Some(line) => line.quantity = e.quantity,
                    None => self.lines.push(CartLine {
                        product_id: e.product_id,
                        quantity: e.quantity,
                    }),
                }
            }
            CartEvent::ItemRemoved(e) => {
                self.lines.retain(|l| l.product_id != e.product_id);
            }
            CartEvent::CartCleared(_) => {
                self.lines.clear();
            }
        }

        self.updated_at = Some(event.occurred_at());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::AddItem(cmd) => self.handle_add(cmd),
            CartCommand::SetItemQuantity(cmd) => self.handle_set_quantity(cmd),
            CartCommand::RemoveItem(cmd) => self.handle_remove(cmd),
            CartCommand::ClearCart(cmd) => self.handle_clear(cmd),
        }
    }
}

impl Cart {
    fn ensure_owner(&self, user_id: UserId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.user_id != Some(user_id) {
            return Err(DomainError::invariant("cart does not belong to this user"));
        }
        Ok(())
    }

    fn ensure_cart_id(&self, cart_id: CartId) -> Result<(), DomainError> {
        if self.created && self.id != cart_id {
            return Err(DomainError::invariant("cart_id mismatch"));
        }
        Ok(())
    }

    fn handle_add(&self, cmd: &AddItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.user_id)?;
        self.ensure_cart_id(cmd.cart_id)?;

        if cmd.quantity < 1 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }

        let merged = self
            .line_quantity(cmd.product_id)
            .unwrap_or(0)
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("merged quantity overflows"))?;
        if merged > cmd.available_stock {
            return Err(DomainError::stock_exceeded(
                cmd.product_id,
                merged,
                cmd.available_stock,
            ));
        }

        let mut events = Vec::with_capacity(2);
        if !self.created {
            events.push(CartEvent::CartOpened(CartOpened {
                cart_id: cmd.cart_id,
                user_id: cmd.user_id,
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(CartEvent::ItemAdded(ItemAdded {
            cart_id: cmd.cart_id,
            user_id: cmd.user_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_set_quantity(&self, cmd: &SetItemQuantity) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.user_id)?;
        self.ensure_cart_id(cmd.cart_id)?;

        let existing = self.created.then(|| self.line_quantity(cmd.product_id)).flatten();

        if cmd.quantity < 1 {
            // Removing an absent line is a no-op, not an error.
            return Ok(match existing {
                Some(_) => vec![CartEvent::ItemRemoved(ItemRemoved {
                    cart_id: cmd.cart_id,
                    user_id: cmd.user_id,
                    product_id: cmd.product_id,
                    occurred_at: cmd.occurred_at,
                })],
                None => vec![],
            });
        }

        if existing.is_none() {
            return Err(DomainError::not_found());
        }

        if cmd.quantity > cmd.available_stock {
            return Err(DomainError::stock_exceeded(
                cmd.product_id,
                cmd.quantity,
                cmd.available_stock,
            ));
        }

        Ok(vec![CartEvent::ItemQuantitySet(ItemQuantitySet {
            cart_id: cmd.cart_id,
            user_id: cmd.user_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.user_id)?;
        self.ensure_cart_id(cmd.cart_id)?;

        if !self.created || self.line_quantity(cmd.product_id).is_none() {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::ItemRemoved(ItemRemoved {
            cart_id: cmd.cart_id,
            user_id: cmd.user_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_clear(&self, cmd: &ClearCart) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_owner(cmd.user_id)?;
        self.ensure_cart_id(cmd.cart_id)?;

        if !self.created || self.lines.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::CartCleared(CartCleared {
            cart_id: cmd.cart_id,
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user_id() -> UserId {
        UserId::new()
    }

    fn test_cart_id() -> CartId {
        CartId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn apply_all(cart: &mut Cart, events: &[CartEvent]) {
        for e in events {
            cart.apply(e);
        }
    }

    fn add(
        cart: &Cart,
        cart_id: CartId,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
        available_stock: i64,
    ) -> Result<Vec<CartEvent>, DomainError> {
        cart.handle(&CartCommand::AddItem(AddItem {
            cart_id,
            user_id,
            product_id,
            quantity,
            available_stock,
            occurred_at: test_time(),
        }))
    }

    #[test]
    fn first_add_opens_the_cart() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, test_product_id(), 2, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CartEvent::CartOpened(_)));
        assert!(matches!(events[1], CartEvent::ItemAdded(_)));

        apply_all(&mut cart, &events);
        assert_eq!(cart.user_id(), Some(user_id));
        assert_eq!(cart.item_count(), 2);
        assert!(cart.created_at().is_some());
    }

    #[test]
    fn adding_same_product_merges_quantities() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let product_id = test_product_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, product_id, 2, 5).unwrap();
        apply_all(&mut cart, &events);
        let events = add(&cart, cart_id, user_id, product_id, 3, 5).unwrap();
        apply_all(&mut cart, &events);

        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.line_quantity(product_id), Some(5));
    }

    #[test]
    fn merged_quantity_above_stock_is_rejected_and_cart_unchanged() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let product_id = test_product_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, product_id, 2, 3).unwrap();
        apply_all(&mut cart, &events);

        let err = add(&cart, cart_id, user_id, product_id, 2, 3).unwrap_err();
        match err {
            DomainError::StockExceeded {
                product_id: p,
                requested,
                available,
            } => {
                assert_eq!(p, product_id);
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected StockExceeded, got {other:?}"),
        }
        assert_eq!(cart.line_quantity(product_id), Some(2));
    }

    #[test]
    fn add_above_stock_on_fresh_cart_is_rejected() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let cart = Cart::empty(cart_id);

        let err = add(&cart, cart_id, user_id, test_product_id(), 5, 3).unwrap_err();
        assert!(matches!(err, DomainError::StockExceeded { .. }));
    }

    #[test]
    fn zero_or_negative_add_quantity_is_rejected() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let cart = Cart::empty(cart_id);

        for quantity in [0, -3] {
            let err = add(&cart, cart_id, user_id, test_product_id(), quantity, 10).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn set_quantity_replaces_instead_of_adding() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let product_id = test_product_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, product_id, 2, 10).unwrap();
        apply_all(&mut cart, &events);

        let events = cart
            .handle(&CartCommand::SetItemQuantity(SetItemQuantity {
                cart_id,
                user_id,
                product_id,
                quantity: 7,
                available_stock: 10,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut cart, &events);

        assert_eq!(cart.line_quantity(product_id), Some(7));
    }

    #[test]
    fn set_quantity_below_one_removes_and_is_idempotent() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let product_id = test_product_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, product_id, 2, 10).unwrap();
        apply_all(&mut cart, &events);

        let set_zero = CartCommand::SetItemQuantity(SetItemQuantity {
            cart_id,
            user_id,
            product_id,
            quantity: 0,
            available_stock: 10,
            occurred_at: test_time(),
        });

        let events = cart.handle(&set_zero).unwrap();
        assert_eq!(events.len(), 1);
        apply_all(&mut cart, &events);
        assert_eq!(cart.line_quantity(product_id), None);

        // Second call: line is already absent, so no events at all.
        let events = cart.handle(&set_zero).unwrap();
        assert!(events.is_empty());
        assert_eq!(cart.line_quantity(product_id), None);
    }

    #[test]
    fn set_quantity_on_absent_line_is_not_found() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, test_product_id(), 1, 10).unwrap();
        apply_all(&mut cart, &events);

        let err = cart
            .handle(&CartCommand::SetItemQuantity(SetItemQuantity {
                cart_id,
                user_id,
                product_id: test_product_id(),
                quantity: 2,
                available_stock: 10,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn set_quantity_above_stock_is_rejected() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let product_id = test_product_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, product_id, 1, 3).unwrap();
        apply_all(&mut cart, &events);

        let err = cart
            .handle(&CartCommand::SetItemQuantity(SetItemQuantity {
                cart_id,
                user_id,
                product_id,
                quantity: 4,
                available_stock: 3,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StockExceeded { .. }));
        assert_eq!(cart.line_quantity(product_id), Some(1));
    }

    #[test]
    fn remove_is_idempotent() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let product_id = test_product_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, product_id, 2, 10).unwrap();
        apply_all(&mut cart, &events);

        let remove = CartCommand::RemoveItem(RemoveItem {
            cart_id,
            user_id,
            product_id,
            occurred_at: test_time(),
        });

        let events = cart.handle(&remove).unwrap();
        assert_eq!(events.len(), 1);
        apply_all(&mut cart, &events);

        let events = cart.handle(&remove).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn clear_empties_lines_but_keeps_the_cart() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, test_product_id(), 2, 10).unwrap();
        apply_all(&mut cart, &events);
        let events = add(&cart, cart_id, user_id, test_product_id(), 1, 10).unwrap();
        apply_all(&mut cart, &events);
        assert_eq!(cart.item_count(), 3);

        let events = cart
            .handle(&CartCommand::ClearCart(ClearCart {
                cart_id,
                user_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        apply_all(&mut cart, &events);

        assert!(cart.is_empty());
        assert_eq!(cart.item_count(), 0);
        assert_eq!(cart.user_id(), Some(user_id));
    }

    #[test]
    fn commands_from_another_user_are_rejected() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, test_product_id(), 1, 10).unwrap();
        apply_all(&mut cart, &events);

        let err = add(&cart, cart_id, test_user_id(), test_product_id(), 1, 10).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let cart_id = test_cart_id();
        let user_id = test_user_id();
        let product_id = test_product_id();
        let mut cart = Cart::empty(cart_id);

        let events = add(&cart, cart_id, user_id, product_id, 1, 10).unwrap();
        apply_all(&mut cart, &events);
        let before = cart.clone();

        let _ = add(&cart, cart_id, user_id, product_id, 2, 10).unwrap();
        let _ = cart.handle(&CartCommand::RemoveItem(RemoveItem {
            cart_id,
            user_id,
            product_id,
            occurred_at: test_time(),
        }));

        assert_eq!(cart, before);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Add { product: usize, quantity: i64 },
            Set { product: usize, quantity: i64 },
            Remove { product: usize },
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0usize..4, -1i64..6).prop_map(|(product, quantity)| Op::Add { product, quantity }),
                (0usize..4, -1i64..6).prop_map(|(product, quantity)| Op::Set { product, quantity }),
                (0usize..4).prop_map(|product| Op::Remove { product }),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of commands runs, the cart never
            /// holds a duplicate product line or a quantity below 1, and the
            /// item count always equals the sum of line quantities.
            #[test]
            fn invariants_hold_under_any_command_sequence(ops in prop::collection::vec(op_strategy(), 1..40)) {
                let cart_id = CartId::new();
                let user_id = UserId::new();
                let products: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
                let stock = 10i64;

                let mut cart = Cart::empty(cart_id);

                for op in ops {
                    let cmd = match op {
                        Op::Add { product, quantity } => CartCommand::AddItem(AddItem {
                            cart_id,
                            user_id,
                            product_id: products[product],
                            quantity,
                            available_stock: stock,
                            occurred_at: Utc::now(),
                        }),
                        Op::Set { product, quantity } => CartCommand::SetItemQuantity(SetItemQuantity {
                            cart_id,
                            user_id,
                            product_id: products[product],
                            quantity,
                            available_stock: stock,
                            occurred_at: Utc::now(),
                        }),
                        Op::Remove { product } => CartCommand::RemoveItem(RemoveItem {
                            cart_id,
                            user_id,
                            product_id: products[product],
                            occurred_at: Utc::now(),
                        }),
                    };

                    // Rejected commands must leave no events behind.
                    if let Ok(events) = cart.handle(&cmd) {
                        for e in &events {
                            cart.apply(e);
                        }
                    }

                    let mut seen = std::collections::HashSet::new();
                    for line in cart.lines() {
                        prop_assert!(seen.insert(line.product_id), "duplicate line for {:?}", line.product_id);
                        prop_assert!(line.quantity >= 1, "line below 1: {:?}", line);
                        prop_assert!(line.quantity <= stock, "line above stock: {:?}", line);
                    }
                    prop_assert_eq!(cart.item_count(), cart.lines().iter().map(|l| l.quantity).sum::<i64>());
                }
            }
        }
    }
}
