//! Fee model for paper fills.
//!
//! The dynamic curve mirrors the venue's taker schedule: quadratic in
//! p(1-p), so fees peak at even odds and vanish near resolution.
//! Settlement pays out gross - only entries and early exits are charged.

/// Dynamic fee rate at a share price: `0.25 * (p * (1 - p))^2`.
pub fn dynamic_fee_rate(price: f64) -> f64 {
    let p = price.clamp(0.01, 0.99);
    0.25 * (p * (1.0 - p)).powi(2)
}

/// Fee on a notional at the given price under the configured model.
pub fn fee_for(notional: f64, price: f64, use_dynamic: bool, flat_fee_pct: f64) -> f64 {
    if notional <= 0.0 {
        return 0.0;
    }
    let rate = if use_dynamic {
        dynamic_fee_rate(price)
    } else {
        flat_fee_pct / 100.0
    };
    notional * rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_rate_peaks_at_even_odds() {
        assert!(dynamic_fee_rate(0.5) > dynamic_fee_rate(0.2));
        assert!(dynamic_fee_rate(0.5) > dynamic_fee_rate(0.9));
        // 0.25 * (0.25)^2 = 0.015625
        assert!((dynamic_fee_rate(0.5) - 0.015625).abs() < 1e-12);
    }

    #[test]
    fn flat_model_charges_percent() {
        assert!((fee_for(10.0, 0.5, false, 1.0) - 0.10).abs() < 1e-12);
    }

    #[test]
    fn zero_notional_is_free() {
        assert_eq!(fee_for(0.0, 0.5, true, 1.0), 0.0);
    }
}
