use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::settings::Currency;
use crate::transactions::{Transaction, TransactionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub income: Decimal,
    pub expense: Decimal,
    pub balance: Decimal,
}

/// Expense total for one category and its share of all expenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub name: String,
    pub amount: Decimal,
    /// 0-100
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub books: usize,
    pub transactions: usize,
    pub balance: Decimal,
}

pub fn summarize(transactions: &[Transaction]) -> Totals {
    let mut totals = Totals::default();
    for tx in transactions {
        match tx.kind {
            TransactionType::Income => totals.income += tx.amount,
            TransactionType::Expense => totals.expense += tx.amount,
        }
    }
    totals.balance = totals.income - totals.expense;
    totals
}

/// Expenses grouped by category name, largest first. Ties keep name order.
pub fn expense_breakdown(transactions: &[Transaction]) -> Vec<CategoryShare> {
    let mut by_category: HashMap<&str, Decimal> = HashMap::new();
    for tx in transactions
        .iter()
        .filter(|tx| tx.kind == TransactionType::Expense)
    {
        *by_category.entry(tx.category.as_str()).or_default() += tx.amount;
    }

    let total: Decimal = by_category.values().copied().sum();
    let mut shares: Vec<CategoryShare> = by_category
        .into_iter()
        .map(|(name, amount)| CategoryShare {
            name: name.to_string(),
            amount,
            percentage: if total.is_zero() {
                Decimal::ZERO
            } else {
                (amount * Decimal::ONE_HUNDRED / total).round_dp(2)
            },
        })
        .collect();
    shares.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.name.cmp(&b.name)));
    shares
}

pub fn profile_stats(ledger_count: usize, transactions: &[Transaction]) -> ProfileStats {
    ProfileStats {
        books: ledger_count,
        transactions: transactions.len(),
        balance: summarize(transactions).balance,
    }
}

/// Renders `amount` with the currency symbol and two decimals, e.g. `$ -12.50`.
pub fn format_amount(amount: Decimal, currency: &Currency) -> String {
    format!("{} {:.2}", currency.symbol, amount.round_dp(2))
}
