//! `tradepost-cart` — the shopping-cart aggregate.

pub mod cart;

pub use cart::{
    AddItem, Cart, CartCleared, CartCommand, CartEvent, CartLine, CartOpened, ClearCart, ItemAdded,
    ItemQuantitySet, ItemRemoved, RemoveItem, SetItemQuantity,
};
