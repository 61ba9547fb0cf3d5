use crate::model::{Money, Pricing};

/// `nights * (base_price + service_fee) + cleaning_fee`.
///
/// The service fee is charged per night (per seat for capacity listings);
/// the cleaning fee once per reservation. Callers reject empty ranges before
/// getting here; this does not validate.
pub fn compute_total(nights: u32, base_price: Money, cleaning_fee: Money, service_fee: Money) -> Money {
    Money::from(nights) * (base_price + service_fee) + cleaning_fee
}

impl Pricing {
    /// Total for `units` nights (stays) or seats (events, experiences).
    pub fn total_for(&self, units: u32) -> Money {
        compute_total(units, self.base_price, self.cleaning_fee, self.service_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_nights_with_fees() {
        assert_eq!(compute_total(3, 45000, 5000, 2500), 147500);
    }

    #[test]
    fn single_night_no_fees() {
        assert_eq!(compute_total(1, 9900, 0, 0), 9900);
    }

    #[test]
    fn deterministic() {
        let a = compute_total(7, 12345, 678, 90);
        let b = compute_total(7, 12345, 678, 90);
        assert_eq!(a, b);
        assert_eq!(a, 7 * (12345 + 90) + 678);
    }

    #[test]
    fn pricing_total_for_units() {
        let p = Pricing {
            base_price: 2500,
            cleaning_fee: 0,
            service_fee: 300,
        };
        assert_eq!(p.total_for(4), 11_200);
    }

    #[test]
    fn limits_do_not_overflow() {
        use crate::limits::{MAX_CAPACITY, MAX_PRICE};
        let total = compute_total(MAX_CAPACITY, MAX_PRICE, MAX_PRICE, MAX_PRICE);
        assert!(total > 0);
    }
}
