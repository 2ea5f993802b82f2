use log::{debug, info};

use super::rebalance::Rebalancer;
use super::tax::TaxRegime;
use super::types::{
    FundBucket, FundYearResult, MonthlyDetail, Plan, Projection, TaxCategory, YearResult,
};
use super::validate::PlanError;

const MONTHS_PER_YEAR: u32 = 12;
const DUST_BALANCE: f64 = 0.01;

/// Running state of one bucket across the whole projection.
#[derive(Debug, Clone, Copy)]
pub(super) struct BucketState {
    pub balance: f64,
    pub cost_basis: f64,
    /// Current year's withdrawal target, inflated once per year after the first.
    pub annual_target: f64,
}

impl BucketState {
    fn opening(fund: &FundBucket) -> Self {
        Self {
            balance: fund.allocation_amount,
            cost_basis: fund.allocation_amount,
            annual_target: fund.initial_annual_withdrawal(),
        }
    }

    /// Share of the balance that is still unrealised principal.
    pub fn basis_ratio(&self) -> f64 {
        let denominator = if self.balance > 0.0 { self.balance } else { 1.0 };
        self.cost_basis / denominator
    }

    pub fn clamp_basis(&mut self) {
        self.cost_basis = self.cost_basis.max(0.0).min(self.balance.max(0.0));
    }
}

/// Gains realised during one simulated year, split by how they are taxed.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct RealizedGains {
    pub equity: f64,
    pub slab: f64,
}

impl RealizedGains {
    pub fn record(&mut self, category: TaxCategory, gain: f64) {
        if gain <= 0.0 {
            return;
        }
        if category.is_slab_taxed() {
            self.slab += gain;
        } else {
            self.equity += gain;
        }
    }
}

pub fn run_projection(plan: &Plan) -> Result<Projection, PlanError> {
    run_projection_with_tax(plan, &TaxRegime::default())
}

pub fn run_projection_with_tax(plan: &Plan, regime: &TaxRegime) -> Result<Projection, PlanError> {
    plan.validate()?;

    let inflation = plan.inflation_rate / 100.0;
    let mut buckets: Vec<BucketState> = plan.funds.iter().map(BucketState::opening).collect();
    let mut rebalancer = Rebalancer::new(&plan.rebalancing_rules);
    let mut years = Vec::with_capacity(plan.year_count());

    for age in plan.start_age..=plan.end_age {
        let year_index = age - plan.start_age + 1;
        if year_index > 1 {
            for bucket in &mut buckets {
                bucket.annual_target *= 1.0 + inflation;
            }
        }

        let mut gains = RealizedGains::default();
        let mut fund_results: Vec<FundYearResult> = plan
            .funds
            .iter()
            .zip(buckets.iter_mut())
            .map(|(fund, bucket)| run_fund_year(fund, bucket, &mut gains))
            .collect();

        rebalancer.run_year(
            year_index,
            inflation,
            &plan.funds,
            &mut buckets,
            &mut fund_results,
            &mut gains,
        );

        for (result, bucket) in fund_results.iter_mut().zip(&buckets) {
            result.closing_balance = bucket.balance;
            result.cost_basis = bucket.cost_basis;
        }

        let year = plan.calendar_year(age).ok_or(PlanError::YearOverflow {
            start_year: plan.start_year,
        })?;
        years.push(build_year_result(year, age, fund_results, gains, regime));
    }

    let projection = Projection { years };
    info!(
        "projected plan '{}' over {} years: final balance {:.2}, total tax {:.2}",
        plan.name,
        projection.years.len(),
        projection.final_balance(),
        projection.total_tax()
    );
    Ok(projection)
}

/// Withdrawal-then-growth monthly loop for one bucket. Buckets that open the
/// year empty are reported as zeros and left untouched.
fn run_fund_year(
    fund: &FundBucket,
    bucket: &mut BucketState,
    gains: &mut RealizedGains,
) -> FundYearResult {
    let opening_balance = bucket.balance;
    if opening_balance <= 0.0 {
        return FundYearResult::empty(&fund.name);
    }

    let monthly_growth_rate = fund.expected_growth_rate / 100.0 / MONTHS_PER_YEAR as f64;
    let monthly_withdrawal = bucket.annual_target / MONTHS_PER_YEAR as f64;

    let mut total_withdrawal = 0.0;
    let mut total_growth = 0.0;
    let mut monthly_details = Vec::with_capacity(MONTHS_PER_YEAR as usize);

    for month in 1..=MONTHS_PER_YEAR {
        let month_opening = bucket.balance;
        let withdrawal = monthly_withdrawal.min(month_opening).max(0.0);

        let principal = withdrawal * bucket.basis_ratio();
        gains.record(fund.tax_category, withdrawal - principal);
        bucket.cost_basis -= principal;

        let after_withdrawal = month_opening - withdrawal;
        let growth = after_withdrawal * monthly_growth_rate;
        bucket.balance = after_withdrawal + growth;
        if bucket.balance < DUST_BALANCE {
            bucket.balance = 0.0;
        }
        bucket.clamp_basis();

        monthly_details.push(MonthlyDetail {
            month,
            opening_balance: month_opening,
            withdrawal,
            growth,
            closing_balance: bucket.balance,
        });
        total_withdrawal += withdrawal;
        total_growth += growth;
    }

    if bucket.balance == 0.0 {
        debug!("fund '{}' depleted during the year", fund.name);
    }

    FundYearResult {
        fund_name: fund.name.clone(),
        opening_balance,
        total_withdrawal,
        growth: total_growth,
        rebalancing_in: 0.0,
        rebalancing_out: 0.0,
        closing_balance: bucket.balance,
        cost_basis: bucket.cost_basis,
        effective_return_rate: total_growth / opening_balance * 100.0,
        monthly_details,
        events: Vec::new(),
    }
}

fn sum_funds(results: &[FundYearResult], field: impl Fn(&FundYearResult) -> f64) -> f64 {
    results.iter().map(field).sum()
}

fn build_year_result(
    year: i32,
    age: u32,
    fund_results: Vec<FundYearResult>,
    gains: RealizedGains,
    regime: &TaxRegime,
) -> YearResult {
    let total_opening_balance = sum_funds(&fund_results, |r| r.opening_balance);
    let total_withdrawal = sum_funds(&fund_results, |r| r.total_withdrawal);
    let total_growth = sum_funds(&fund_results, |r| r.growth);
    let total_rebalancing_in = sum_funds(&fund_results, |r| r.rebalancing_in);
    let total_rebalancing_out = sum_funds(&fund_results, |r| r.rebalancing_out);
    let total_closing_balance = sum_funds(&fund_results, |r| r.closing_balance);

    let tax = regime.year_tax(gains.equity, gains.slab);
    let total_tax = tax.total();

    YearResult {
        year,
        age,
        total_opening_balance,
        total_withdrawal,
        total_growth,
        total_rebalancing_in,
        total_rebalancing_out,
        equity_gains: gains.equity,
        slab_gains: gains.slab,
        equity_tax: tax.equity_tax,
        slab_tax: tax.slab_tax,
        total_tax,
        net_income: total_withdrawal - total_tax,
        total_closing_balance,
        fund_results,
    }
}
