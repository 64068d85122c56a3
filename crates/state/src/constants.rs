//! Protocol constants for the account state layer.

use alloy_primitives::{uint, U256};

/// Energy generated per second by one whole token of balance, scaled by
/// [ENERGY_SCALE].
pub const ENERGY_GROWTH_RATE: U256 = uint!(5_000_000_000_U256);

/// The fixed-point scale of [ENERGY_GROWTH_RATE]: one whole token in its
/// smallest denomination.
pub const ENERGY_SCALE: U256 = uint!(1_000_000_000_000_000_000_U256);
