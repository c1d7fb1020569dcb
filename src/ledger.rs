//! Per-shard account store
//!
//! Accounts are owned exclusively by the shard engine that holds them; every
//! mutation arrives through that shard's serialized execution path.

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{Fill, Position};

/// One agent's simulated capital
#[derive(Debug, Clone)]
pub struct Account {
    pub balance: Decimal,
    /// At most one entry per symbol; removed when amount reaches zero
    pub positions: HashMap<String, Position>,
    /// Append-only fill history
    pub trade_log: Vec<Fill>,
    /// Per-epoch pnl samples, oldest dropped past the cap
    pub return_history: Vec<f64>,
}

impl Account {
    fn new(balance: Decimal) -> Self {
        Self {
            balance,
            positions: HashMap::new(),
            trade_log: Vec::new(),
            return_history: Vec::new(),
        }
    }

    /// Apply a buy fill: debit cash, fold quantity into the cost basis
    pub fn apply_buy(&mut self, symbol: &str, qty: Decimal, fill_price: Decimal, cost: Decimal) {
        self.balance -= cost;
        match self.positions.get_mut(symbol) {
            Some(pos) => {
                let old_notional = pos.amount * pos.avg_price;
                let new_amount = pos.amount + qty;
                pos.avg_price = (old_notional + qty * fill_price) / new_amount;
                pos.amount = new_amount;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        amount: qty,
                        avg_price: fill_price,
                    },
                );
            }
        }
    }

    /// Apply a sell fill: credit proceeds, shrink or remove the position.
    /// The cost basis is untouched by sells.
    pub fn apply_sell(&mut self, symbol: &str, qty: Decimal, proceeds: Decimal) {
        self.balance += proceeds;
        let emptied = match self.positions.get_mut(symbol) {
            Some(pos) => {
                pos.amount -= qty;
                pos.amount.is_zero()
            }
            None => false,
        };
        if emptied {
            self.positions.remove(symbol);
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions_vec(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.positions.values().cloned().collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }
}

/// Account store for one shard, keyed by agent id.
///
/// Registration order is preserved and used as the stable leaderboard
/// tie-break.
#[derive(Debug)]
pub struct Ledger {
    accounts: HashMap<String, Account>,
    order: Vec<String>,
    initial_balance: Decimal,
    history_cap: usize,
}

impl Ledger {
    pub fn new(initial_balance: Decimal, history_cap: usize) -> Self {
        Self {
            accounts: HashMap::new(),
            order: Vec::new(),
            initial_balance,
            history_cap,
        }
    }

    /// Fetch an account, creating it on first contact
    pub fn account_mut(&mut self, agent_id: &str) -> &mut Account {
        if !self.accounts.contains_key(agent_id) {
            self.order.push(agent_id.to_string());
        }
        self.accounts
            .entry(agent_id.to_string())
            .or_insert_with(|| Account::new(self.initial_balance))
    }

    pub fn get(&self, agent_id: &str) -> Option<&Account> {
        self.accounts.get(agent_id)
    }

    /// Administrative removal only
    pub fn remove(&mut self, agent_id: &str) -> Option<Account> {
        self.order.retain(|id| id != agent_id);
        self.accounts.remove(agent_id)
    }

    /// Agent ids in registration order
    pub fn agent_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    /// Append an epoch return, dropping the oldest sample past the cap
    pub fn push_return(&mut self, agent_id: &str, pnl_percent: f64) {
        let cap = self.history_cap;
        let account = self.account_mut(agent_id);
        account.return_history.push(pnl_percent);
        if account.return_history.len() > cap {
            let excess = account.return_history.len() - cap;
            account.return_history.drain(..excess);
        }
    }

    /// Recreate an account from a snapshot, preserving registration order
    pub fn import(
        &mut self,
        agent_id: &str,
        balance: Decimal,
        positions: Vec<Position>,
        return_history: Vec<f64>,
    ) {
        let account = self.account_mut(agent_id);
        account.balance = balance;
        account.positions = positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        account.return_history = return_history;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn avg_price_is_volume_weighted() {
        let mut ledger = Ledger::new(dec!(10000), 50);
        let account = ledger.account_mut("a1");

        account.apply_buy("X", dec!(10), dec!(1.0), dec!(10));
        account.apply_buy("X", dec!(10), dec!(2.0), dec!(20));

        let pos = account.position("X").unwrap();
        assert_eq!(pos.amount, dec!(20));
        assert_eq!(pos.avg_price, dec!(1.5));
    }

    #[test]
    fn position_removed_at_exactly_zero() {
        let mut ledger = Ledger::new(dec!(10000), 50);
        let account = ledger.account_mut("a1");

        account.apply_buy("X", dec!(5), dec!(2.0), dec!(10));
        account.apply_sell("X", dec!(5), dec!(10));

        assert!(account.position("X").is_none());
    }

    #[test]
    fn sells_leave_cost_basis_unchanged() {
        let mut ledger = Ledger::new(dec!(10000), 50);
        let account = ledger.account_mut("a1");

        account.apply_buy("X", dec!(10), dec!(3.0), dec!(30));
        account.apply_sell("X", dec!(4), dec!(20));

        let pos = account.position("X").unwrap();
        assert_eq!(pos.amount, dec!(6));
        assert_eq!(pos.avg_price, dec!(3.0));
    }

    #[test]
    fn registration_order_is_stable() {
        let mut ledger = Ledger::new(dec!(10000), 50);
        ledger.account_mut("b");
        ledger.account_mut("a");
        ledger.account_mut("b");

        assert_eq!(ledger.agent_ids(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn return_history_caps_and_drops_oldest() {
        let mut ledger = Ledger::new(dec!(10000), 3);
        for i in 0..5 {
            ledger.push_return("a1", i as f64);
        }
        let account = ledger.get("a1").unwrap();
        assert_eq!(account.return_history, vec![2.0, 3.0, 4.0]);
    }
}
