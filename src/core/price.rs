//! Price records emitted by a run, and reconciliation against existing ones.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    pub number: Decimal,
    pub currency: String,
}

/// A dated price of one unit of `currency`, in ledger price-directive form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub currency: String,
    pub amount: Amount,
}

impl PriceRecord {
    pub fn new(date: NaiveDate, currency: &str, number: Decimal, quote: &str) -> Self {
        Self {
            date,
            currency: currency.to_string(),
            amount: Amount {
                number,
                currency: quote.to_string(),
            },
        }
    }
}

impl Display for PriceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} price {:<12} {:>16} {}",
            self.date,
            self.currency,
            self.amount.number.to_string(),
            self.amount.currency
        )
    }
}

/// Splits `records` into those to keep and those already on file.
///
/// Records are matched on `(date, currency)`. With `keep_diffs`, a match is
/// only dropped when its amount is identical, so differing same-day quotes
/// surface for manual reconciliation.
pub fn filter_redundant_prices(
    records: Vec<PriceRecord>,
    existing: &[PriceRecord],
    keep_diffs: bool,
) -> (Vec<PriceRecord>, Vec<PriceRecord>) {
    let existing_prices: HashMap<(NaiveDate, &str), &PriceRecord> = existing
        .iter()
        .map(|record| ((record.date, record.currency.as_str()), record))
        .collect();

    records.into_iter().partition(|record| {
        match existing_prices.get(&(record.date, record.currency.as_str())) {
            None => true,
            Some(existing) => keep_diffs && existing.amount != record.amount,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn hdv(date: (i32, u32, u32), number: &str) -> PriceRecord {
        PriceRecord::new(
            NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            "HDV",
            Decimal::from_str(number).unwrap(),
            "USD",
        )
    }

    fn existing() -> Vec<PriceRecord> {
        vec![
            hdv((2015, 1, 26), "76.82"),
            hdv((2015, 8, 11), "74.19"),
            hdv((2015, 9, 1), "75.00"),
        ]
    }

    fn fetched() -> Vec<PriceRecord> {
        vec![
            hdv((2015, 1, 27), "76.83"),
            hdv((2015, 6, 19), "76"),
            hdv((2015, 8, 11), "74.20"),
            hdv((2015, 9, 1), "75.0"),
        ]
    }

    #[test]
    fn test_clobber_nodiffs() {
        let (kept, ignored) = filter_redundant_prices(fetched(), &existing(), false);
        assert_eq!(
            kept,
            vec![hdv((2015, 1, 27), "76.83"), hdv((2015, 6, 19), "76")]
        );
        assert_eq!(
            ignored,
            vec![hdv((2015, 8, 11), "74.20"), hdv((2015, 9, 1), "75.0")]
        );
    }

    #[test]
    fn test_clobber_diffs() {
        let (kept, ignored) = filter_redundant_prices(fetched(), &existing(), true);
        assert_eq!(
            kept,
            vec![
                hdv((2015, 1, 27), "76.83"),
                hdv((2015, 6, 19), "76"),
                hdv((2015, 8, 11), "74.20"),
            ]
        );
        // 75.0 and 75.00 are the same amount.
        assert_eq!(ignored, vec![hdv((2015, 9, 1), "75.0")]);
    }

    #[test]
    fn test_other_currency_same_day_is_kept() {
        let mut other = hdv((2015, 8, 11), "74.19");
        other.currency = "QQQ".to_string();
        let (kept, ignored) = filter_redundant_prices(vec![other.clone()], &existing(), false);
        assert_eq!(kept, vec![other]);
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_display_as_price_directive() {
        let record = hdv((2015, 8, 11), "74.20");
        let expected = format!("2015-08-11 price HDV{}74.20 USD", " ".repeat(21));
        assert_eq!(record.to_string(), expected);
    }
}
