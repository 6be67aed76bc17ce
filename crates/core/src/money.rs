//! Money and quantity arithmetic in the smallest currency unit.
//!
//! No floats anywhere: amounts are `i64` minor units and intermediate products
//! are widened to `i128`.

/// Monetary amount in the smallest currency unit (e.g. paisa, cents).
pub type Amount = i64;

/// Signed item quantity. Negative quantities denote returns on an invoice.
pub type Quantity = i64;

/// `quantity × unit_price`, or `None` on overflow.
pub fn line_total(quantity: Quantity, unit_price: Amount) -> Option<Amount> {
    let total = (quantity as i128).checked_mul(unit_price as i128)?;
    Amount::try_from(total).ok()
}

/// Integer division rounding half away from zero.
///
/// For the non-negative values the cost engine works with this is plain
/// round-half-up. Returns `None` for a zero denominator or when the result
/// does not fit an [`Amount`].
pub fn div_round_half_up(numerator: i128, denominator: i128) -> Option<Amount> {
    if denominator == 0 {
        return None;
    }
    let negative = (numerator < 0) != (denominator < 0);
    let (n, d) = (numerator.unsigned_abs(), denominator.unsigned_abs());
    let mut q = n / d;
    if (n % d) * 2 >= d {
        q += 1;
    }
    let q = i128::try_from(q).ok()?;
    Amount::try_from(if negative { -q } else { q }).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_up() {
        assert_eq!(div_round_half_up(5, 2), Some(3));
        assert_eq!(div_round_half_up(4, 2), Some(2));
        assert_eq!(div_round_half_up(7, 3), Some(2));
        assert_eq!(div_round_half_up(8, 3), Some(3));
    }

    #[test]
    fn negative_rounds_away_from_zero() {
        assert_eq!(div_round_half_up(-5, 2), Some(-3));
    }

    #[test]
    fn zero_denominator_is_none() {
        assert_eq!(div_round_half_up(10, 0), None);
    }

    #[test]
    fn line_total_detects_overflow() {
        assert_eq!(line_total(3, 50), Some(150));
        assert_eq!(line_total(-2, 40), Some(-80));
        assert_eq!(line_total(i64::MAX, 2), None);
    }

    proptest::proptest! {
        #[test]
        fn quotient_is_within_half_a_unit(n in 0i128..1_000_000_000_000, d in 1i128..1_000_000) {
            let q = div_round_half_up(n, d).unwrap() as i128;
            let error = (q * d - n).abs();
            proptest::prop_assert!(error * 2 <= d);
        }
    }
}
