//! Kelly sizing for binary bets.
//!
//! For a bet at price `q` with model win probability `p`, the Kelly
//! fraction is `(p - q) / (1 - q)`. Stakes apply a conservatism factor
//! and clamp into a [min, max] bet band.

/// Raw Kelly fraction; negative when the model sees no edge.
pub fn kelly_fraction(probability: f64, price: f64) -> f64 {
    let q = price.clamp(0.01, 0.99);
    (probability - q) / (1.0 - q)
}

/// Stake in dollars: `balance * conservatism * f_k`, clamped to the bet band.
pub fn kelly_stake(
    balance: f64,
    probability: f64,
    price: f64,
    conservatism: f64,
    min_bet: f64,
    max_bet: f64,
) -> f64 {
    let raw = balance * conservatism * kelly_fraction(probability, price);
    raw.clamp(min_bet, max_bet)
}
