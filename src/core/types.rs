use chrono::NaiveDate;
use serde::Serialize;

pub const DEFAULT_CYCLES: u32 = 15_000;
pub const DEFAULT_YEARS: u32 = 15;

pub fn default_fallback_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// One asset's share of the portfolio together with its return model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetAllocation {
    /// Percentage of portfolio value, 0..=100. Weights need not sum to 100.
    pub weight_percent: f64,
    /// Expected annual growth as a fraction (0.08 = 8%).
    pub annual_return: f64,
    /// Annualised standard deviation of returns as a fraction.
    pub annual_volatility: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deposit {
    pub date: NaiveDate,
    pub amount: f64,
}

/// From `effective_date` onward the monthly deposit becomes `monthly_amount`,
/// until a later change supersedes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecurringDepositChange {
    pub effective_date: NaiveDate,
    pub monthly_amount: f64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DepositMatching {
    /// Deposit lands only when its date equals a simulated month's date.
    #[default]
    Exact,
    /// Deposit lands in the simulated month sharing its year and month.
    CalendarMonth,
}

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub allocations: Vec<AssetAllocation>,
    pub one_time_deposits: Vec<Deposit>,
    pub recurring_changes: Vec<RecurringDepositChange>,
    pub cycles: u32,
    pub years: u32,
    pub seed: Option<u64>,
    pub start_date: Option<NaiveDate>,
    pub fallback_start_date: NaiveDate,
    pub deposit_matching: DepositMatching,
    /// Report the calendar date of every month alongside the statistics.
    pub include_dates: bool,
}

impl SimulationRequest {
    pub fn new(allocations: Vec<AssetAllocation>) -> Self {
        Self {
            allocations,
            one_time_deposits: Vec::new(),
            recurring_changes: Vec::new(),
            cycles: DEFAULT_CYCLES,
            years: DEFAULT_YEARS,
            seed: None,
            start_date: None,
            fallback_start_date: default_fallback_start_date(),
            deposit_matching: DepositMatching::Exact,
            include_dates: false,
        }
    }

    pub fn total_months(&self) -> u32 {
        self.years.saturating_mul(12)
    }
}

/// Cross-path statistics for one month before rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthStats {
    pub mean: f64,
    pub median: f64,
    pub percentile10: f64,
    pub percentile90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    #[serde(rename = "simulationStartDate")]
    pub start_date: NaiveDate,
    pub months: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<NaiveDate>,
    pub mean: Vec<i64>,
    pub median: Vec<i64>,
    pub percentile10: Vec<i64>,
    pub percentile90: Vec<i64>,
}

impl SimulationResult {
    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }
}
