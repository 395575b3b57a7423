mod engine;
mod rng;
mod schedule;
mod summary;
mod types;

pub use engine::{
    CancelFlag, MAX_SIMULATION_YEARS, aggregate, round_currency, simulate, simulate_with_cancel,
};
pub use schedule::{DATE_FORMAT, DepositSchedule, MonthStep, add_months, parse_date, resolve_start_date};
pub use summary::{
    DEFAULT_PENSION_TAX_RATE, DEFAULT_SAFE_WITHDRAWAL_RATE, PortfolioSummary, Projection,
    ProjectionSeries, SummaryOptions, combine, safe_monthly_income,
};
pub use types::{
    AssetAllocation, DEFAULT_CYCLES, DEFAULT_YEARS, Deposit, DepositMatching, MonthStats,
    RecurringDepositChange, SimulationRequest, SimulationResult, default_fallback_start_date,
};
