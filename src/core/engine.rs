use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use super::rng::{Rng, derive_path_seed, entropy_seed};
use super::schedule::{DepositSchedule, MonthStep};
use super::types::{AssetAllocation, MonthStats, SimulationRequest, SimulationResult};
use crate::error::{SimError, SimResult};

const MONTHS_PER_YEAR: f64 = 12.0;

/// Longest horizon a single run accepts.
pub const MAX_SIMULATION_YEARS: u32 = 1_000;

// 2^63; every f64 in [-I64_BOUND, I64_BOUND) converts to i64 exactly.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Shared flag that stops in-flight path workers.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Monthly return parameters for one allocation.
#[derive(Debug, Clone, Copy)]
struct MonthlyReturnModel {
    drift: f64,
    sigma: f64,
    weight: f64,
}

impl From<&AssetAllocation> for MonthlyReturnModel {
    fn from(asset: &AssetAllocation) -> Self {
        Self {
            drift: asset.annual_return / MONTHS_PER_YEAR,
            sigma: asset.annual_volatility / MONTHS_PER_YEAR.sqrt(),
            weight: asset.weight_percent / 100.0,
        }
    }
}

pub fn simulate(request: &SimulationRequest) -> SimResult<SimulationResult> {
    simulate_with_cancel(request, &CancelFlag::new())
}

pub fn simulate_with_cancel(
    request: &SimulationRequest,
    cancel: &CancelFlag,
) -> SimResult<SimulationResult> {
    validate_request(request)?;

    let started = Instant::now();
    let schedule = DepositSchedule::build(request)?;
    if schedule.unmatched_deposits > 0 {
        tracing::warn!(
            unmatched = schedule.unmatched_deposits,
            "one-time deposits fall outside the simulated month grid and will never be applied"
        );
    }

    let models = request
        .allocations
        .iter()
        .map(MonthlyReturnModel::from)
        .collect::<Vec<_>>();
    let base_seed = request.seed.unwrap_or_else(entropy_seed);

    let paths = run_paths(&models, &schedule.steps, request.cycles, base_seed, cancel)?;
    let stats = aggregate(&paths, schedule.len());
    let result = build_result(&schedule, &stats, request.include_dates)?;

    tracing::debug!(
        cycles = request.cycles,
        months = result.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );
    Ok(result)
}

fn validate_request(request: &SimulationRequest) -> SimResult<()> {
    if request.allocations.is_empty() {
        return Err(SimError::invalid("No allocations provided"));
    }

    if request.years > MAX_SIMULATION_YEARS {
        return Err(SimError::invalid(format!(
            "years must be <= {MAX_SIMULATION_YEARS}"
        )));
    }

    for (idx, asset) in request.allocations.iter().enumerate() {
        if !(0.0..=100.0).contains(&asset.weight_percent) {
            return Err(SimError::invalid(format!(
                "allocations[{idx}].allocation must be between 0 and 100"
            )));
        }
        if !asset.annual_return.is_finite() {
            return Err(SimError::invalid(format!(
                "allocations[{idx}].cagr must be a finite number"
            )));
        }
        if !asset.annual_volatility.is_finite() || asset.annual_volatility < 0.0 {
            return Err(SimError::invalid(format!(
                "allocations[{idx}].volatility must be a finite number >= 0"
            )));
        }
    }

    for (idx, deposit) in request.one_time_deposits.iter().enumerate() {
        if !deposit.amount.is_finite() || deposit.amount < 0.0 {
            return Err(SimError::invalid(format!(
                "oneTimeDeposits[{idx}].amount must be a finite number >= 0"
            )));
        }
    }

    for (idx, change) in request.recurring_changes.iter().enumerate() {
        if !change.monthly_amount.is_finite() {
            return Err(SimError::invalid(format!(
                "monthlyChanges[{idx}].amount must be a finite number"
            )));
        }
    }

    Ok(())
}

fn run_paths(
    models: &[MonthlyReturnModel],
    steps: &[MonthStep],
    cycles: u32,
    base_seed: u64,
    cancel: &CancelFlag,
) -> SimResult<Vec<Vec<f64>>> {
    (0..cycles)
        .into_par_iter()
        .map(|path_id| {
            if cancel.is_cancelled() {
                return Err(SimError::Cancelled);
            }
            let mut rng = Rng::new(derive_path_seed(base_seed, path_id));
            Ok(simulate_path(models, steps, &mut rng))
        })
        .collect()
}

fn simulate_path(models: &[MonthlyReturnModel], steps: &[MonthStep], rng: &mut Rng) -> Vec<f64> {
    let mut path = Vec::with_capacity(steps.len());
    let mut value = 0.0;

    for (month, step) in steps.iter().enumerate() {
        value += step.contribution();

        // Month 0 only books deposits.
        if month > 0 && value > 0.0 {
            value = apply_monthly_growth(value, models, rng);
        }

        path.push(value);
    }

    path
}

/// Allocations compound one after another on the running value, each with
/// its own independent draw.
fn apply_monthly_growth(value: f64, models: &[MonthlyReturnModel], rng: &mut Rng) -> f64 {
    models.iter().fold(value, |acc, model| {
        let monthly_return = model.drift + rng.standard_normal() * model.sigma;
        acc * (1.0 + monthly_return * model.weight)
    })
}

/// Per-month cross-path mean, median, 10th and 90th percentile. `paths` is
/// path-major; every path must hold at least `months` values.
pub fn aggregate(paths: &[Vec<f64>], months: usize) -> Vec<MonthStats> {
    (0..months)
        .into_par_iter()
        .map(|month| {
            let mut values = paths.iter().map(|path| path[month]).collect::<Vec<_>>();
            month_stats(&mut values)
        })
        .collect()
}

fn month_stats(values: &mut [f64]) -> MonthStats {
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;

    MonthStats {
        mean: zero_if_nan(mean),
        median: rank_value(values, n / 2),
        percentile10: rank_value(values, (n as f64 * 0.1).floor() as usize),
        percentile90: rank_value(values, (n as f64 * 0.9).floor() as usize),
    }
}

fn rank_value(sorted: &[f64], index: usize) -> f64 {
    sorted.get(index).copied().map(zero_if_nan).unwrap_or(0.0)
}

fn zero_if_nan(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x }
}

/// Nearest integer with halves rounded up, as currency figures are reported.
/// `None` when the value is not finite or does not fit in an `i64`.
pub fn round_currency(x: f64) -> Option<i64> {
    let rounded = (x + 0.5).floor();
    if !rounded.is_finite() || !(-I64_BOUND..I64_BOUND).contains(&rounded) {
        return None;
    }
    Some(rounded as i64)
}

fn build_result(
    schedule: &DepositSchedule,
    stats: &[MonthStats],
    include_dates: bool,
) -> SimResult<SimulationResult> {
    let len = stats.len();
    let mut result = SimulationResult {
        start_date: schedule.start_date,
        months: (0..len as u32).collect(),
        dates: if include_dates {
            schedule.dates()
        } else {
            Vec::new()
        },
        mean: Vec::with_capacity(len),
        median: Vec::with_capacity(len),
        percentile10: Vec::with_capacity(len),
        percentile90: Vec::with_capacity(len),
    };

    for (month, s) in stats.iter().enumerate() {
        let round = |x: f64| round_currency(x).ok_or(SimError::NonFinite { month });
        result.mean.push(round(s.mean)?);
        result.median.push(round(s.median)?);
        result.percentile10.push(round(s.percentile10)?);
        result.percentile90.push(round(s.percentile90)?);
    }

    Ok(result)
}
