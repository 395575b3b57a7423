//! Combined view over several independently simulated portfolios.
//!
//! Percentile series are summed element-wise. Summing percentiles is not the
//! percentile of the summed portfolio; the view is an envelope, not a joint
//! distribution.

use serde::{Deserialize, Serialize};

use super::engine::round_currency;
use super::types::SimulationResult;
use crate::error::{SimError, SimResult};

pub const DEFAULT_PENSION_TAX_RATE: f64 = 0.35;
pub const DEFAULT_SAFE_WITHDRAWAL_RATE: f64 = 0.04;

/// The series of a finished projection that the summary consumes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSeries {
    pub months: Vec<u32>,
    pub median: Vec<i64>,
    #[serde(alias = "p10")]
    pub percentile10: Vec<i64>,
    #[serde(alias = "p90")]
    pub percentile90: Vec<i64>,
}

impl From<&SimulationResult> for ProjectionSeries {
    fn from(result: &SimulationResult) -> Self {
        Self {
            months: result.months.clone(),
            median: result.median.clone(),
            percentile10: result.percentile10.clone(),
            percentile90: result.percentile90.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub result: ProjectionSeries,
    #[serde(default)]
    pub is_pension: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SummaryOptions {
    pub pension_tax_rate: f64,
    pub safe_withdrawal_rate: f64,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            pension_tax_rate: DEFAULT_PENSION_TAX_RATE,
            safe_withdrawal_rate: DEFAULT_SAFE_WITHDRAWAL_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub months: Vec<u32>,
    pub percentile10: Vec<i64>,
    pub median: Vec<i64>,
    pub percentile90: Vec<i64>,
    pub percentile10_after_tax: Vec<i64>,
    pub median_after_tax: Vec<i64>,
    pub percentile90_after_tax: Vec<i64>,
    pub has_tax: bool,
    /// Monthly income the after-tax median supports at the safe withdrawal rate.
    pub safe_monthly_income: Vec<i64>,
}

pub fn combine(projections: &[Projection], options: SummaryOptions) -> SimResult<PortfolioSummary> {
    validate_options(options)?;

    let first = projections
        .first()
        .ok_or_else(|| SimError::invalid("No projections provided"))?;
    let len = first.result.months.len();

    for (idx, p) in projections.iter().enumerate() {
        let series = &p.result;
        if series.months != first.result.months
            || series.median.len() != len
            || series.percentile10.len() != len
            || series.percentile90.len() != len
        {
            return Err(SimError::invalid(format!(
                "projections[{idx}] does not share the month grid of projections[0]"
            )));
        }
    }

    let mut summary = PortfolioSummary {
        months: first.result.months.clone(),
        percentile10: vec![0; len],
        median: vec![0; len],
        percentile90: vec![0; len],
        percentile10_after_tax: vec![0; len],
        median_after_tax: vec![0; len],
        percentile90_after_tax: vec![0; len],
        has_tax: projections.iter().any(|p| p.is_pension),
        safe_monthly_income: Vec::with_capacity(len),
    };

    for p in projections {
        let keep = if p.is_pension {
            1.0 - options.pension_tax_rate
        } else {
            1.0
        };
        add_series(&mut summary.percentile10, &p.result.percentile10, 1.0)?;
        add_series(&mut summary.median, &p.result.median, 1.0)?;
        add_series(&mut summary.percentile90, &p.result.percentile90, 1.0)?;
        add_series(&mut summary.percentile10_after_tax, &p.result.percentile10, keep)?;
        add_series(&mut summary.median_after_tax, &p.result.median, keep)?;
        add_series(&mut summary.percentile90_after_tax, &p.result.percentile90, keep)?;
    }

    for &total in &summary.median_after_tax {
        summary
            .safe_monthly_income
            .push(safe_monthly_income(total, options.safe_withdrawal_rate)?);
    }

    Ok(summary)
}

/// `total * rate / 12`, rounded to a whole currency unit.
pub fn safe_monthly_income(total: i64, withdrawal_rate: f64) -> SimResult<i64> {
    round_currency(total as f64 * withdrawal_rate / 12.0)
        .ok_or_else(|| SimError::invalid("safe monthly income is not finite"))
}

fn add_series(acc: &mut [i64], series: &[i64], factor: f64) -> SimResult<()> {
    for (slot, &v) in acc.iter_mut().zip(series) {
        let scaled = if factor == 1.0 {
            v
        } else {
            round_currency(v as f64 * factor)
                .ok_or_else(|| SimError::invalid("after-tax value is not finite"))?
        };
        *slot = slot
            .checked_add(scaled)
            .ok_or_else(|| SimError::invalid("summed projection overflows"))?;
    }
    Ok(())
}

fn validate_options(options: SummaryOptions) -> SimResult<()> {
    if !(0.0..=1.0).contains(&options.pension_tax_rate) {
        return Err(SimError::invalid("pensionTaxRate must be between 0 and 1"));
    }
    if !(0.0..=1.0).contains(&options.safe_withdrawal_rate) {
        return Err(SimError::invalid("safeWithdrawalRate must be between 0 and 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(median: &[i64], p10: &[i64], p90: &[i64]) -> ProjectionSeries {
        ProjectionSeries {
            months: (0..median.len() as u32).collect(),
            median: median.to_vec(),
            percentile10: p10.to_vec(),
            percentile90: p90.to_vec(),
        }
    }

    #[test]
    fn combine_sums_series_and_taxes_only_pensions() {
        let projections = vec![
            Projection {
                result: series(&[1_000, 2_000], &[900, 1_500], &[1_100, 2_500]),
                is_pension: false,
            },
            Projection {
                result: series(&[1_000, 3_000], &[500, 2_001], &[1_500, 4_000]),
                is_pension: true,
            },
        ];
        let summary = combine(&projections, SummaryOptions::default()).unwrap();

        assert_eq!(summary.months, vec![0, 1]);
        assert_eq!(summary.median, vec![2_000, 5_000]);
        assert_eq!(summary.percentile10, vec![1_400, 3_501]);
        assert_eq!(summary.percentile90, vec![2_600, 6_500]);
        assert!(summary.has_tax);

        // 65% of the pension, rounded per element before summing.
        assert_eq!(summary.median_after_tax, vec![1_650, 3_950]);
        assert_eq!(summary.percentile10_after_tax, vec![900 + 325, 1_500 + 1_301]);
        assert_eq!(summary.percentile90_after_tax, vec![1_100 + 975, 2_500 + 2_600]);

        // 4% rule: 1650 * 0.04 / 12 = 5.5 -> 6
        assert_eq!(summary.safe_monthly_income, vec![6, 13]);
    }

    #[test]
    fn combine_without_pensions_has_identical_after_tax_series() {
        let projections = vec![Projection {
            result: series(&[120_000], &[90_000], &[150_000]),
            is_pension: false,
        }];
        let summary = combine(&projections, SummaryOptions::default()).unwrap();
        assert!(!summary.has_tax);
        assert_eq!(summary.median_after_tax, summary.median);
        assert_eq!(summary.safe_monthly_income, vec![400]);
    }

    #[test]
    fn combine_rejects_empty_and_mismatched_input() {
        let err = combine(&[], SummaryOptions::default()).expect_err("must reject empty");
        assert!(err.is_invalid_input());

        let projections = vec![
            Projection {
                result: series(&[1, 2], &[1, 2], &[1, 2]),
                is_pension: false,
            },
            Projection {
                result: series(&[1, 2, 3], &[1, 2, 3], &[1, 2, 3]),
                is_pension: false,
            },
        ];
        let err = combine(&projections, SummaryOptions::default()).expect_err("must reject");
        assert!(err.to_string().contains("projections[1]"));
    }

    #[test]
    fn combine_rejects_out_of_range_rates() {
        let projections = vec![Projection {
            result: series(&[1], &[1], &[1]),
            is_pension: true,
        }];
        let options = SummaryOptions {
            pension_tax_rate: 1.5,
            ..SummaryOptions::default()
        };
        assert!(combine(&projections, options).is_err());
    }

    #[test]
    fn projection_series_accepts_short_percentile_keys() {
        let json = r#"{"months":[0],"median":[5],"p10":[4],"p90":[6]}"#;
        let parsed: ProjectionSeries = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.percentile10, vec![4]);
        assert_eq!(parsed.percentile90, vec![6]);
    }
}
