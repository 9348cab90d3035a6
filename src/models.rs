use crate::dates::MonthKey;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Largest amount a single expense may carry (10^15).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA4C6_8000, 0x0003_8D7E, 0, false, 0);
pub const MAX_AMOUNT_SCALE: u32 = 4;

fn check_amount(amount: Decimal) -> Result<(), String> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(format!("expense amount must not be negative: {}", amount));
    }
    if amount > MAX_AMOUNT {
        return Err(format!("expense amount {} exceeds the maximum of {}", amount, MAX_AMOUNT));
    }
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(format!(
            "expense amount {} has more than {} decimal places",
            amount, MAX_AMOUNT_SCALE
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
}

impl ExpenseRecord {
    pub fn new(amount: Decimal, description: impl Into<String>, date: NaiveDate) -> AppResult<Self> {
        check_amount(amount).map_err(AppError::InvalidInput)?;
        Ok(Self {
            amount,
            description: description.into().trim().to_string(),
            date,
        })
    }
}

pub fn checked_sum(amounts: impl IntoIterator<Item = Decimal>) -> AppResult<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| AppError::Malformed("expense total exceeds the decimal range".to_string()))
    })
}

pub fn new_expense_id(date: NaiveDate) -> String {
    let short = Uuid::new_v4().simple().to_string();
    format!("exp_{}_{}", date.format("%Y%m%d"), &short[..8])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthPartition {
    pub month: MonthKey,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expenses: BTreeMap<String, ExpenseRecord>,
}

impl MonthPartition {
    pub fn empty(month: MonthKey) -> Self {
        Self {
            month,
            updated_at: None,
            expenses: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.expenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ExpenseRecord> {
        self.expenses.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExpenseRecord)> {
        self.expenses.iter()
    }

    pub fn insert(&mut self, id: impl Into<String>, record: ExpenseRecord) -> AppResult<()> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AppError::InvalidInput("expense id must not be empty".to_string()));
        }
        self.check_in_month(&record)?;
        if self.expenses.contains_key(&id) {
            return Err(AppError::InvalidInput(format!(
                "expense {} already exists in {}",
                id, self.month
            )));
        }
        self.expenses.insert(id, record);
        Ok(())
    }

    pub fn insert_new(&mut self, record: ExpenseRecord) -> AppResult<String> {
        let mut id = new_expense_id(record.date);
        while self.expenses.contains_key(&id) {
            id = new_expense_id(record.date);
        }
        self.insert(id.clone(), record)?;
        Ok(id)
    }

    pub fn replace(&mut self, id: &str, record: ExpenseRecord) -> AppResult<ExpenseRecord> {
        self.check_in_month(&record)?;
        let Some(slot) = self.expenses.get_mut(id) else {
            return Err(AppError::NotFound(format!("expense {} in {}", id, self.month)));
        };
        Ok(std::mem::replace(slot, record))
    }

    pub fn remove(&mut self, id: &str) -> AppResult<ExpenseRecord> {
        self.expenses
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("expense {} in {}", id, self.month)))
    }

    pub fn total(&self) -> AppResult<Decimal> {
        checked_sum(self.expenses.values().map(|record| record.amount))
    }

    pub fn validate(&self) -> Result<(), String> {
        for (id, record) in &self.expenses {
            if !self.month.contains(record.date) {
                return Err(format!(
                    "expense {} dated {} lies outside {}",
                    id, record.date, self.month
                ));
            }
            check_amount(record.amount).map_err(|reason| format!("expense {}: {}", id, reason))?;
        }
        Ok(())
    }

    fn check_in_month(&self, record: &ExpenseRecord) -> AppResult<()> {
        if !self.month.contains(record.date) {
            return Err(AppError::InvalidInput(format!(
                "expense dated {} does not belong to {}",
                record.date, self.month
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Total,
    Count,
    CountToDate,
    MonthToDate,
    WeekToDate,
    DailyAverage,
    WeeklyAverage,
    WeeklyPace,
    Median,
    Largest,
    PreviousMonthTrend,
    Recurring,
}

impl AggregateKind {
    pub const ALL: [Self; 12] = [
        Self::Total,
        Self::Count,
        Self::CountToDate,
        Self::MonthToDate,
        Self::WeekToDate,
        Self::DailyAverage,
        Self::WeeklyAverage,
        Self::WeeklyPace,
        Self::Median,
        Self::Largest,
        Self::PreviousMonthTrend,
        Self::Recurring,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Count => "count",
            Self::CountToDate => "count_to_date",
            Self::MonthToDate => "month_to_date",
            Self::WeekToDate => "week_to_date",
            Self::DailyAverage => "daily_average",
            Self::WeeklyAverage => "weekly_average",
            Self::WeeklyPace => "weekly_pace",
            Self::Median => "median",
            Self::Largest => "largest",
            Self::PreviousMonthTrend => "previous_month_trend",
            Self::Recurring => "recurring",
        }
    }
}

impl FromStr for AggregateKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown aggregate kind: {}", value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub amount: Decimal,
    pub basis: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargestExpense {
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Similar,
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendIndicator {
    pub direction: TrendDirection,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyTrend {
    pub previous_month: MonthKey,
    pub previous_total: Decimal,
    pub indicator: Option<TrendIndicator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSignal {
    pub description: String,
    pub occurrences: u32,
    pub total: Decimal,
    pub seen_last_month: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthAggregates {
    pub total: Decimal,
    pub count: u64,
    pub count_to_date: u64,
    pub month_to_date: Decimal,
    pub week_to_date: Decimal,
    pub daily_average: Measure,
    pub weekly_average: Measure,
    pub weekly_pace: Measure,
    pub median: Measure,
    pub largest: LargestExpense,
    pub trend: MonthlyTrend,
    pub recurring: Vec<RecurringSignal>,
}

impl MonthAggregates {
    pub fn value(&self, kind: AggregateKind) -> AggregateValue {
        match kind {
            AggregateKind::Total => AggregateValue::Amount(self.total),
            AggregateKind::Count => AggregateValue::Count(self.count),
            AggregateKind::CountToDate => AggregateValue::Count(self.count_to_date),
            AggregateKind::MonthToDate => AggregateValue::Amount(self.month_to_date),
            AggregateKind::WeekToDate => AggregateValue::Amount(self.week_to_date),
            AggregateKind::DailyAverage => AggregateValue::Measure(self.daily_average),
            AggregateKind::WeeklyAverage => AggregateValue::Measure(self.weekly_average),
            AggregateKind::WeeklyPace => AggregateValue::Measure(self.weekly_pace),
            AggregateKind::Median => AggregateValue::Measure(self.median),
            AggregateKind::Largest => AggregateValue::Largest(self.largest.clone()),
            AggregateKind::PreviousMonthTrend => AggregateValue::Trend(self.trend.clone()),
            AggregateKind::Recurring => AggregateValue::Recurring(self.recurring.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AggregateValue {
    Amount(Decimal),
    Count(u64),
    Measure(Measure),
    Largest(LargestExpense),
    Trend(MonthlyTrend),
    Recurring(Vec<RecurringSignal>),
}

impl AggregateValue {
    pub fn as_amount(&self) -> Option<Decimal> {
        match self {
            Self::Amount(amount) => Some(*amount),
            Self::Measure(measure) => Some(measure.amount),
            Self::Largest(largest) => Some(largest.amount),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(count) => Some(*count),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;

    fn november() -> MonthKey {
        MonthKey::new(2025, 11).expect("month key")
    }

    fn record(amount: &str, description: &str, date: &str) -> ExpenseRecord {
        ExpenseRecord::new(
            Decimal::from_str(amount).expect("decimal"),
            description,
            parse_date(date).expect("date"),
        )
        .expect("record")
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let error = ExpenseRecord::new(
            Decimal::from_str("-1.00").expect("decimal"),
            "refund",
            parse_date("2025-11-01").expect("date"),
        )
        .expect_err("negative amount");
        assert!(error.to_string().starts_with("INVALID_INPUT"));
    }

    #[test]
    fn amounts_are_bounded_in_size_and_precision() {
        let day = parse_date("2025-11-01").expect("date");
        assert_eq!(MAX_AMOUNT, Decimal::from_str("1000000000000000").expect("decimal"));
        assert!(ExpenseRecord::new(MAX_AMOUNT, "house", day).is_ok());
        assert!(matches!(
            ExpenseRecord::new(Decimal::MAX, "everything", day),
            Err(AppError::InvalidInput(_))
        ));
        assert!(ExpenseRecord::new(Decimal::from_str("0.1250").expect("decimal"), "fee", day).is_ok());
        assert!(matches!(
            ExpenseRecord::new(Decimal::from_str("0.00001").expect("decimal"), "dust", day),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn validate_rejects_oversized_amounts_read_from_disk() {
        let mut partition = MonthPartition::empty(november());
        partition.insert("a1", record("1.00", "tea", "2025-11-02")).expect("insert");
        if let Some(stored) = partition.expenses.get_mut("a1") {
            stored.amount = Decimal::MAX;
        }
        let reason = partition.validate().expect_err("oversized");
        assert!(reason.contains("exceeds the maximum"));
    }

    #[test]
    fn checked_sum_reports_overflow() {
        assert!(matches!(
            checked_sum([Decimal::MAX, Decimal::MAX]),
            Err(AppError::Malformed(_))
        ));
        assert_eq!(checked_sum(Vec::new()).expect("empty"), Decimal::ZERO);
    }

    #[test]
    fn partition_rejects_records_from_other_months() {
        let mut partition = MonthPartition::empty(november());
        let error = partition
            .insert("a1", record("3.00", "tea", "2025-12-01"))
            .expect_err("wrong month");
        assert!(error.to_string().contains("does not belong to 2025-11"));
        assert!(partition.is_empty());
    }

    #[test]
    fn partition_insert_replace_remove() {
        let mut partition = MonthPartition::empty(november());
        partition.insert("a1", record("12.50", "coffee", "2025-11-03")).expect("insert");
        assert!(partition.insert("a1", record("1.00", "dup", "2025-11-03")).is_err());

        let generated = partition.insert_new(record("7.25", "bagel", "2025-11-04")).expect("insert new");
        assert!(generated.starts_with("exp_20251104_"));
        assert_eq!(partition.total().expect("total"), Decimal::from_str("19.75").expect("decimal"));

        let previous = partition
            .replace("a1", record("10.00", "coffee", "2025-11-03"))
            .expect("replace");
        assert_eq!(previous.amount, Decimal::from_str("12.50").expect("decimal"));
        partition.remove(&generated).expect("remove");
        assert_eq!(partition.len(), 1);
        assert!(matches!(partition.remove("missing"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn aggregate_kinds_parse_from_names() {
        for kind in AggregateKind::ALL {
            assert_eq!(kind.as_str().parse::<AggregateKind>().expect("kind"), kind);
        }
        assert!("sum".parse::<AggregateKind>().is_err());
    }
}
