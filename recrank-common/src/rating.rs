//! Rating record
//!
//! A single explicit-feedback observation: a user rated an item with a value.

use serde::{Deserialize, Serialize};

/// User/item/value triple used as training input
///
/// `item_id` accepts `product_id` on deserialization so exports from older
/// catalog tooling load unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: i32,
    #[serde(alias = "product_id")]
    pub item_id: i32,
    #[serde(alias = "rating")]
    pub value: f64,
}

impl Rating {
    pub fn new(user_id: i32, item_id: i32, value: f64) -> Self {
        Self {
            user_id,
            item_id,
            value,
        }
    }
}

impl From<(i32, i32, f64)> for Rating {
    fn from((user_id, item_id, value): (i32, i32, f64)) -> Self {
        Self::new(user_id, item_id, value)
    }
}
