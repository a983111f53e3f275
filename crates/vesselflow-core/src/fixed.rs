use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Every amount, capacity, fraction and rate that flows through the exchange
/// uses this type so that settlement is bit-for-bit reproducible.
pub type Fixed64 = I32F32;

/// Seconds of simulated time covered by one exchange tick.
pub type Seconds = Fixed64;

/// Convert an f64 to Fixed64. Use only for initialization, never in the settlement loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in the settlement loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Checked division for Fixed64 that returns None on zero divisor or overflow.
#[inline]
pub fn checked_div_64(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_div(b)
}

/// Fraction of `demand` that `available` can cover, clamped to [0, 1].
///
/// A non-positive demand never constrains anything and yields 1.
#[inline]
pub fn coverage(available: Fixed64, demand: Fixed64) -> Fixed64 {
    if demand <= Fixed64::ZERO || available >= demand {
        Fixed64::ONE
    } else if available <= Fixed64::ZERO {
        Fixed64::ZERO
    } else {
        // available < demand here, so the quotient is below one and cannot overflow.
        checked_div_64(available, demand).unwrap_or(Fixed64::ZERO)
    }
}
