//! Order execution against cached reference prices
//!
//! Every order fills immediately at the reference price adjusted by a fixed
//! adverse slippage fraction. Execution is all-or-nothing: a rejected order
//! leaves its account untouched.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::Ledger;
use crate::types::{Fill, LeaderboardEntry, Position, Side};

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },
    #[error("insufficient position: held {held}, requested {requested}")]
    InsufficientPosition { held: Decimal, requested: Decimal },
}

/// Successful execution result, shaped for the wire response
#[derive(Debug, Clone)]
pub struct FillReceipt {
    pub fill: Fill,
    pub balance: Decimal,
    pub positions: Vec<Position>,
}

/// One shard's matching engine: a price cache plus the ledger it owns
pub struct MatchEngine {
    /// Symbols tradable on this shard
    symbols: Vec<String>,
    prices: HashMap<String, Decimal>,
    ledger: Ledger,
    slippage: Decimal,
}

impl MatchEngine {
    pub fn new(
        symbols: Vec<String>,
        slippage: Decimal,
        initial_balance: Decimal,
        history_cap: usize,
    ) -> Self {
        Self {
            symbols,
            prices: HashMap::new(),
            ledger: Ledger::new(initial_balance, history_cap),
            slippage,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Replace cached reference prices for snapshot symbols this shard
    /// trades; everything else in the snapshot is ignored. Never touches
    /// account state.
    pub fn update_prices(&mut self, snapshot: &HashMap<String, f64>) {
        for (symbol, price) in snapshot {
            if !self.symbols.contains(symbol) {
                continue;
            }
            if let Ok(p) = Decimal::try_from(*price) {
                if p > Decimal::ZERO {
                    self.prices.insert(symbol.clone(), p);
                }
            }
        }
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    pub fn price_snapshot(&self) -> HashMap<String, f64> {
        self.prices
            .iter()
            .map(|(s, p)| (s.clone(), p.to_f64().unwrap_or(0.0)))
            .collect()
    }

    /// Execute one order for one agent. Mutates exactly one account.
    pub fn execute_order(
        &mut self,
        agent_id: &str,
        symbol: &str,
        side: Side,
        amount: Decimal,
        tags: Vec<String>,
    ) -> Result<FillReceipt, OrderError> {
        if amount <= Decimal::ZERO {
            return Err(OrderError::InvalidAmount(amount));
        }
        let reference_price = self
            .price(symbol)
            .ok_or_else(|| OrderError::UnknownSymbol(symbol.to_string()))?;

        // Adverse adjustment: buys pay up, sells receive less
        let fill_price = match side {
            Side::Buy => reference_price * (Decimal::ONE + self.slippage),
            Side::Sell => reference_price * (Decimal::ONE - self.slippage),
        };

        let account = self.ledger.account_mut(agent_id);
        let realized = match side {
            Side::Buy => {
                // BUY amount is a USD notional
                if amount > account.balance {
                    return Err(OrderError::InsufficientFunds {
                        required: amount,
                        available: account.balance,
                    });
                }
                let qty = amount / fill_price;
                account.apply_buy(symbol, qty, fill_price, amount);
                None
            }
            Side::Sell => {
                // SELL amount is an asset quantity
                let (held, avg_price) = match account.position(symbol) {
                    Some(pos) => (pos.amount, pos.avg_price),
                    None => (Decimal::ZERO, Decimal::ZERO),
                };
                if amount > held {
                    return Err(OrderError::InsufficientPosition {
                        held,
                        requested: amount,
                    });
                }
                account.apply_sell(symbol, amount, amount * fill_price);
                let pct = if avg_price.is_zero() {
                    0.0
                } else {
                    ((fill_price - avg_price) / avg_price * Decimal::from(100))
                        .to_f64()
                        .unwrap_or(0.0)
                };
                Some(pct)
            }
        };

        let fill = Fill {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            requested: amount,
            reference_price,
            fill_price,
            tags,
            realized_pnl_percent: realized,
            executed_at: Utc::now(),
        };
        account.trade_log.push(fill.clone());

        Ok(FillReceipt {
            fill,
            balance: account.balance,
            positions: account.positions_vec(),
        })
    }

    /// Cash plus open positions marked at the current reference price.
    /// Positions without a cached price are marked at cost.
    pub fn total_value(&self, agent_id: &str) -> Decimal {
        let Some(account) = self.ledger.get(agent_id) else {
            return Decimal::ZERO;
        };
        let mut value = account.balance;
        for pos in account.positions.values() {
            let mark = self.price(&pos.symbol).unwrap_or(pos.avg_price);
            value += pos.amount * mark;
        }
        value
    }

    pub fn pnl_percent(&self, agent_id: &str) -> f64 {
        let initial = self.ledger.initial_balance();
        if initial.is_zero() {
            return 0.0;
        }
        let value = self.total_value(agent_id);
        ((value - initial) / initial * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Ranked descending by pnl; ties keep registration order (stable sort)
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .ledger
            .agent_ids()
            .iter()
            .map(|id| LeaderboardEntry {
                agent_id: id.clone(),
                pnl_percent: self.pnl_percent(id),
                total_value: self.total_value(id),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.pnl_percent
                .partial_cmp(&a.pnl_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries
    }
}
