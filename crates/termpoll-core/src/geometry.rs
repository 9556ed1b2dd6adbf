//! Terminal geometry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Dimensions of a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl Dimensions {
    /// The only geometry sessions currently run with.
    pub const FIXED: Dimensions = Dimensions { rows: 24, cols: 80 };

    /// Create new dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Whether sessions can be run at this geometry.
    pub fn is_supported(&self) -> bool {
        *self == Self::FIXED
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::FIXED
    }
}
