use std::collections::HashMap;

use chrono::{Datelike, Months, NaiveDate};

use super::types::{DepositMatching, RecurringDepositChange, SimulationRequest};
use crate::error::{SimError, SimResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(raw: &str) -> SimResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| SimError::invalid(format!("malformed date '{raw}': {e}")))
}

/// Advances `start` by whole calendar months. A day past the end of the
/// target month is clamped to that month's last day (Jan 31 + 1 = Feb 28/29).
pub fn add_months(start: NaiveDate, months: u32) -> SimResult<NaiveDate> {
    start
        .checked_add_months(Months::new(months))
        .ok_or_else(|| SimError::invalid(format!("{start} + {months} months is out of range")))
}

/// Month 0 of the projection: explicit override, else the earliest deposit or
/// recurring-change date, else the fallback.
pub fn resolve_start_date(request: &SimulationRequest) -> NaiveDate {
    if let Some(start) = request.start_date {
        return start;
    }

    request
        .one_time_deposits
        .iter()
        .map(|d| d.date)
        .chain(request.recurring_changes.iter().map(|c| c.effective_date))
        .min()
        .unwrap_or(request.fallback_start_date)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthStep {
    pub date: NaiveDate,
    /// Sum of one-time deposits landing this month.
    pub one_time: f64,
    /// Recurring amount in force this month; only added when positive.
    pub recurring: f64,
}

impl MonthStep {
    pub fn contribution(&self) -> f64 {
        if self.recurring > 0.0 {
            self.one_time + self.recurring
        } else {
            self.one_time
        }
    }
}

/// Deposit inflows for every simulated month. Deposits are identical across
/// paths, so this is computed once per run and shared read-only by workers.
#[derive(Debug, Clone)]
pub struct DepositSchedule {
    pub start_date: NaiveDate,
    pub steps: Vec<MonthStep>,
    pub unmatched_deposits: usize,
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
enum DepositKey {
    Day(NaiveDate),
    Month(i32, u32),
}

impl DepositKey {
    fn for_date(date: NaiveDate, matching: DepositMatching) -> Self {
        match matching {
            DepositMatching::Exact => DepositKey::Day(date),
            DepositMatching::CalendarMonth => DepositKey::Month(date.year(), date.month()),
        }
    }
}

impl DepositSchedule {
    pub fn build(request: &SimulationRequest) -> SimResult<Self> {
        let start_date = resolve_start_date(request);
        let total_months = request.total_months();
        // Reject horizons past chrono's range before reserving for them.
        add_months(start_date, total_months)?;

        let mut pending: HashMap<DepositKey, (f64, bool)> = HashMap::new();
        for deposit in &request.one_time_deposits {
            let key = DepositKey::for_date(deposit.date, request.deposit_matching);
            pending.entry(key).or_insert((0.0, false)).0 += deposit.amount;
        }

        let changes = sorted_changes(&request.recurring_changes);
        let mut next_change = 0;
        let mut active = 0.0;

        let mut steps = Vec::with_capacity(total_months as usize + 1);
        for month in 0..=total_months {
            let date = add_months(start_date, month)?;

            while next_change < changes.len() && changes[next_change].effective_date <= date {
                active = changes[next_change].monthly_amount;
                next_change += 1;
            }

            let key = DepositKey::for_date(date, request.deposit_matching);
            let one_time = match pending.get_mut(&key) {
                Some((amount, used)) if !*used => {
                    *used = true;
                    *amount
                }
                _ => 0.0,
            };

            steps.push(MonthStep {
                date,
                one_time,
                recurring: active,
            });
        }

        let unmatched_deposits = request
            .one_time_deposits
            .iter()
            .filter(|d| {
                let key = DepositKey::for_date(d.date, request.deposit_matching);
                !pending.get(&key).is_some_and(|(_, used)| *used)
            })
            .count();

        Ok(Self {
            start_date,
            steps,
            unmatched_deposits,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.steps.iter().map(|s| s.date).collect()
    }
}

// Stable sort: among changes sharing a date the later one in the input wins.
fn sorted_changes(changes: &[RecurringDepositChange]) -> Vec<RecurringDepositChange> {
    let mut sorted = changes.to_vec();
    sorted.sort_by_key(|c| c.effective_date);
    sorted
}
