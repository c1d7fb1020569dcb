//! Risk-adjusted performance metrics
//!
//! All metrics are computed over an agent's ordered epoch-return history
//! (percentages) and feed the composite score used for promotion decisions.

/// High sentinel returned by Sortino when there are no negative samples
pub const SORTINO_SENTINEL: f64 = 10.0;

const W_CUMULATIVE: f64 = 0.30;
const W_SHARPE: f64 = 0.30;
const W_SORTINO: f64 = 0.20;
const W_WIN_RATE: f64 = 0.10;
const W_CALMAR: f64 = 0.10;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let sd = std_dev(returns);
    if sd == 0.0 {
        return 0.0;
    }
    mean(returns) / sd
}

/// Sortino penalizes downside deviation only. A history with no negative
/// returns yields the fixed sentinel instead of a division by zero.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return SORTINO_SENTINEL;
    }
    let sd = std_dev(&downside);
    if sd == 0.0 {
        return 0.0;
    }
    mean(returns) / sd
}

/// Maximum drawdown of the derived value series, as a percentage <= 0.
///
/// The value series compounds each epoch return onto a unit starting value.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut value = 1.0;
    let mut peak = 1.0;
    let mut worst = 0.0_f64;
    for r in returns {
        value *= 1.0 + r / 100.0;
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak * 100.0;
            if dd > worst {
                worst = dd;
            }
        }
    }
    -worst
}

pub fn calmar_ratio(cumulative_return: f64, max_drawdown_pct: f64) -> f64 {
    if max_drawdown_pct == 0.0 {
        return 0.0;
    }
    cumulative_return / max_drawdown_pct.abs()
}

/// Percentage of positive samples
pub fn win_rate_percent(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let wins = returns.iter().filter(|r| **r > 0.0).count();
    wins as f64 / returns.len() as f64 * 100.0
}

fn clip(value: f64, lo: f64, hi: f64) -> f64 {
    value.clamp(lo, hi)
}

/// Full metric set for one agent
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RiskMetrics {
    pub cumulative_return: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub calmar: f64,
    pub win_rate: f64,
    pub composite: f64,
}

impl RiskMetrics {
    /// `cumulative_return` is supplied by the caller: the epoch ledger tracks
    /// it across the full lifetime while the history itself is capped.
    pub fn from_returns(returns: &[f64], cumulative_return: f64) -> Self {
        let sharpe = sharpe_ratio(returns);
        let sortino = sortino_ratio(returns);
        let mdd = max_drawdown(returns);
        let calmar = calmar_ratio(cumulative_return, mdd);
        let win_rate = win_rate_percent(returns);

        let composite = W_CUMULATIVE * clip(cumulative_return, 0.0, 100.0)
            + W_SHARPE * clip(sharpe * 33.33, 0.0, 100.0)
            + W_SORTINO * clip(sortino * 25.0, 0.0, 100.0)
            + W_WIN_RATE * win_rate
            + W_CALMAR * clip(calmar * 20.0, 0.0, 100.0);

        Self {
            cumulative_return,
            sharpe,
            sortino,
            max_drawdown: mdd,
            calmar,
            win_rate,
            composite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharpe_needs_two_samples() {
        assert_eq!(sharpe_ratio(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[5.0]), 0.0);
        // Constant series has zero deviation
        assert_eq!(sharpe_ratio(&[2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn sortino_sentinel_on_all_positive_history() {
        assert_eq!(sortino_ratio(&[1.0, 2.0, 3.0]), SORTINO_SENTINEL);
        assert_eq!(sortino_ratio(&[0.0, 0.5]), SORTINO_SENTINEL);
    }

    #[test]
    fn sortino_uses_downside_only() {
        let s = sortino_ratio(&[4.0, -2.0, 6.0, -4.0]);
        assert!(s.is_finite());
        assert!(s > 0.0);
    }

    #[test]
    fn drawdown_is_zero_when_never_below_peak() {
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn drawdown_reported_negative() {
        // +100% then -50% back to the starting value: 50% drawdown
        let dd = max_drawdown(&[100.0, -50.0]);
        assert!((dd + 50.0).abs() < 1e-9);
    }

    #[test]
    fn calmar_zero_without_drawdown() {
        assert_eq!(calmar_ratio(40.0, 0.0), 0.0);
        assert!((calmar_ratio(40.0, -20.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn composite_is_bounded() {
        let strong = RiskMetrics::from_returns(&[5.0, 8.0, 4.0, 9.0], 120.0);
        assert!(strong.composite <= 100.0);
        assert!(strong.composite > 0.0);

        let flat = RiskMetrics::from_returns(&[], 0.0);
        assert_eq!(flat.composite, 0.0);
    }
}
