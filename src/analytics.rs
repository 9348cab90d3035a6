use crate::dates::{week_start, MonthKey};
use crate::errors::{AppError, AppResult};
use crate::models::{
    checked_sum, ExpenseRecord, LargestExpense, Measure, MonthAggregates, MonthPartition, MonthlyTrend, RecurringSignal,
    TrendDirection, TrendIndicator,
};
use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const SIMILAR_TREND_PERCENT: i64 = 5;

#[derive(Debug, Clone, Copy)]
pub struct AnalyticsInput<'a> {
    pub partition: &'a MonthPartition,
    pub previous: Option<&'a MonthPartition>,
    pub as_of: NaiveDate,
}

pub fn compute(input: &AnalyticsInput<'_>) -> AppResult<MonthAggregates> {
    let partition = input.partition;
    let as_of = input.as_of;
    let month = partition.month;

    let past: Vec<(&String, &ExpenseRecord)> = partition
        .iter()
        .filter(|(_, record)| record.date <= as_of)
        .collect();
    let month_to_date = checked_sum(past.iter().map(|(_, record)| record.amount))?;
    let monday = week_start(as_of);
    let week_to_date = checked_sum(
        past.iter()
            .filter(|(_, record)| record.date >= monday)
            .map(|(_, record)| record.amount),
    )?;

    let day = elapsed_day(month, as_of);
    let weeks = if day == 0 { 0 } else { (day - 1) / 7 + 1 };
    let week_days = as_of.weekday().num_days_from_monday() + 1;

    let (daily_average, weekly_average, weekly_pace) = if partition.is_empty() {
        let zero = Measure {
            amount: Decimal::ZERO,
            basis: 0,
        };
        (zero, zero, zero)
    } else {
        (
            average(month_to_date, day)?,
            average(month_to_date, weeks)?,
            average(week_to_date, week_days)?,
        )
    };

    let total = partition.total()?;
    Ok(MonthAggregates {
        total,
        count: partition.len() as u64,
        count_to_date: past.len() as u64,
        month_to_date,
        week_to_date,
        daily_average,
        weekly_average,
        weekly_pace,
        median: median(past.iter().map(|(_, record)| record.amount).collect())?,
        largest: largest(&past),
        trend: trend(month, total, input.previous)?,
        recurring: recurring(partition, input.previous)?,
    })
}

fn overflow(what: &str) -> AppError {
    AppError::Malformed(format!("{} exceeds the decimal range", what))
}

fn elapsed_day(month: MonthKey, as_of: NaiveDate) -> u32 {
    if as_of < month.first_day() {
        0
    } else if as_of > month.last_day() {
        month.days_in_month()
    } else {
        as_of.day()
    }
}

fn average(amount: Decimal, basis: u32) -> AppResult<Measure> {
    let amount = if basis == 0 {
        Decimal::ZERO
    } else {
        round_cents(
            amount
                .checked_div(Decimal::from(basis))
                .ok_or_else(|| overflow("average"))?,
        )
    };
    Ok(Measure { amount, basis })
}

fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn median(mut amounts: Vec<Decimal>) -> AppResult<Measure> {
    if amounts.is_empty() {
        return Ok(Measure {
            amount: Decimal::ZERO,
            basis: 0,
        });
    }
    amounts.sort();
    let count = amounts.len();
    let amount = if count % 2 == 0 {
        amounts[count / 2 - 1]
            .checked_add(amounts[count / 2])
            .and_then(|pair| pair.checked_div(Decimal::TWO))
            .ok_or_else(|| overflow("median"))?
    } else {
        amounts[count / 2]
    };
    Ok(Measure {
        amount,
        basis: count as u32,
    })
}

fn largest(past: &[(&String, &ExpenseRecord)]) -> LargestExpense {
    let mut best: Option<&ExpenseRecord> = None;
    for (_, record) in past {
        if best.map_or(true, |current| record.amount > current.amount) {
            best = Some(*record);
        }
    }
    match best {
        Some(record) => LargestExpense {
            amount: record.amount,
            description: Some(record.description.clone()),
        },
        None => LargestExpense {
            amount: Decimal::ZERO,
            description: None,
        },
    }
}

fn trend(month: MonthKey, total: Decimal, previous: Option<&MonthPartition>) -> AppResult<MonthlyTrend> {
    let previous_total = match previous {
        Some(previous) => previous.total()?,
        None => Decimal::ZERO,
    };
    let indicator = if previous_total > Decimal::ZERO {
        let difference = total
            .checked_sub(previous_total)
            .ok_or_else(|| overflow("month difference"))?;
        let percentage = difference
            .checked_div(previous_total)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| overflow("trend percentage"))?
            .abs();
        let direction = if percentage < Decimal::from(SIMILAR_TREND_PERCENT) {
            TrendDirection::Similar
        } else if difference > Decimal::ZERO {
            TrendDirection::Increase
        } else {
            TrendDirection::Decrease
        };
        Some(TrendIndicator {
            direction,
            percentage: percentage.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero),
        })
    } else {
        None
    };
    Ok(MonthlyTrend {
        previous_month: month.previous(),
        previous_total,
        indicator,
    })
}

fn normalize_description(description: &str) -> String {
    description.trim().to_lowercase()
}

fn recurring(partition: &MonthPartition, previous: Option<&MonthPartition>) -> AppResult<Vec<RecurringSignal>> {
    let last_month: HashSet<String> = previous
        .map(|partition| {
            partition
                .iter()
                .map(|(_, record)| normalize_description(&record.description))
                .filter(|text| !text.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut groups: BTreeMap<String, RecurringSignal> = BTreeMap::new();
    for (_, record) in partition.iter() {
        let normalized = normalize_description(&record.description);
        if normalized.is_empty() {
            continue;
        }
        let seen_last_month = last_month.contains(&normalized);
        let entry = groups.entry(normalized).or_insert_with(|| RecurringSignal {
            description: record.description.trim().to_string(),
            occurrences: 0,
            total: Decimal::ZERO,
            seen_last_month,
        });
        entry.occurrences += 1;
        entry.total = entry
            .total
            .checked_add(record.amount)
            .ok_or_else(|| overflow("recurring total"))?;
    }

    let mut signals: Vec<RecurringSignal> = groups
        .into_values()
        .filter(|signal| signal.occurrences >= 2 || signal.seen_last_month)
        .collect();
    signals.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.description.cmp(&b.description))
    });
    Ok(signals)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "difference", rename_all = "snake_case")]
pub enum BudgetStatus {
    NotSet,
    Under(Decimal),
    Over(Decimal),
}

pub fn budget_status(total: Decimal, threshold: Decimal) -> BudgetStatus {
    if threshold <= Decimal::ZERO {
        return BudgetStatus::NotSet;
    }
    let difference = threshold - total;
    if difference >= Decimal::ZERO {
        BudgetStatus::Under(difference)
    } else {
        BudgetStatus::Over(-difference)
    }
}

pub fn day_progress(date: NaiveDate) -> (u32, u32) {
    (date.day(), MonthKey::of(date).days_in_month())
}

pub fn week_progress(date: NaiveDate) -> (Decimal, u32) {
    let day = date.day();
    let base_week = (day - 1) / 7 + 1;
    let day_in_week = (day - 1) % 7;
    let precise = Decimal::new(i64::from(base_week * 10 + day_in_week), 1);
    let total_days = MonthKey::of(date).days_in_month();
    (precise, total_days.div_ceil(7))
}
