use chrono::Datelike;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaxCategory {
    Equity,
    Debt,
    Other,
}

impl TaxCategory {
    /// Debt and Other gains are both taxed on the slab schedule.
    pub fn is_slab_taxed(self) -> bool {
        !matches!(self, TaxCategory::Equity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundBucket {
    pub name: String,
    pub allocation_amount: f64,
    /// Annual nominal growth in percent.
    pub expected_growth_rate: f64,
    /// Annual withdrawal in percent of the opening allocation.
    pub withdrawal_rate: f64,
    pub tax_category: TaxCategory,
}

impl FundBucket {
    pub fn initial_annual_withdrawal(&self) -> f64 {
        self.allocation_amount * self.withdrawal_rate / 100.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum TransferAmount {
    Fixed(f64),
    /// Percent of the source bucket's balance at the time the rule runs.
    Percentage(f64),
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RuleTrigger {
    Scheduled {
        frequency: u32,
        amount: TransferAmount,
    },
    Shortfall {
        years: u32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalancingRule {
    pub source_index: usize,
    pub destination_index: usize,
    pub trigger: RuleTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub name: String,
    #[serde(default = "current_year")]
    pub start_year: i32,
    pub start_age: u32,
    pub end_age: u32,
    /// Annual inflation applied to withdrawal targets, in percent.
    pub inflation_rate: f64,
    pub funds: Vec<FundBucket>,
    #[serde(default)]
    pub rebalancing_rules: Vec<RebalancingRule>,
}

pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

impl Plan {
    pub fn total_allocation(&self) -> f64 {
        self.funds.iter().map(|f| f.allocation_amount).sum()
    }

    pub fn initial_annual_withdrawal(&self) -> f64 {
        self.funds.iter().map(FundBucket::initial_annual_withdrawal).sum()
    }

    pub fn initial_monthly_withdrawal(&self) -> f64 {
        self.initial_annual_withdrawal() / 12.0
    }

    pub fn year_count(&self) -> usize {
        self.end_age.saturating_sub(self.start_age) as usize + 1
    }

    /// Calendar year of `age`, or `None` when it falls outside the plan or `i32`.
    pub fn calendar_year(&self, age: u32) -> Option<i32> {
        let offset = i32::try_from(age.checked_sub(self.start_age)?).ok()?;
        self.start_year.checked_add(offset)
    }

    pub fn final_year(&self) -> Option<i32> {
        self.calendar_year(self.end_age)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyDetail {
    pub month: u32,
    pub opening_balance: f64,
    pub withdrawal: f64,
    pub growth: f64,
    pub closing_balance: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalancingEventKind {
    In,
    Out,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalancingEvent {
    pub kind: RebalancingEventKind,
    pub amount: f64,
    pub counterparty: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundYearResult {
    pub fund_name: String,
    pub opening_balance: f64,
    pub total_withdrawal: f64,
    pub growth: f64,
    pub rebalancing_in: f64,
    pub rebalancing_out: f64,
    pub closing_balance: f64,
    pub cost_basis: f64,
    /// Growth over the opening balance, in percent.
    pub effective_return_rate: f64,
    pub monthly_details: Vec<MonthlyDetail>,
    pub events: Vec<RebalancingEvent>,
}

impl FundYearResult {
    pub(crate) fn empty(fund_name: &str) -> Self {
        Self {
            fund_name: fund_name.to_string(),
            opening_balance: 0.0,
            total_withdrawal: 0.0,
            growth: 0.0,
            rebalancing_in: 0.0,
            rebalancing_out: 0.0,
            closing_balance: 0.0,
            cost_basis: 0.0,
            effective_return_rate: 0.0,
            monthly_details: Vec::new(),
            events: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MonthlyField {
    Withdrawal,
    ClosingBalance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub year: i32,
    pub age: u32,
    pub total_opening_balance: f64,
    pub total_withdrawal: f64,
    pub total_growth: f64,
    pub total_rebalancing_in: f64,
    pub total_rebalancing_out: f64,
    pub equity_gains: f64,
    pub slab_gains: f64,
    pub equity_tax: f64,
    pub slab_tax: f64,
    pub total_tax: f64,
    pub net_income: f64,
    pub total_closing_balance: f64,
    pub fund_results: Vec<FundYearResult>,
}

impl YearResult {
    /// Sum of one month's value across every fund. `month` is 1-based.
    pub fn monthly_aggregate(&self, month: u32, field: MonthlyField) -> f64 {
        self.fund_results
            .iter()
            .filter_map(|fund| fund.monthly_details.iter().find(|d| d.month == month))
            .map(|detail| match field {
                MonthlyField::Withdrawal => detail.withdrawal,
                MonthlyField::ClosingBalance => detail.closing_balance,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub years: Vec<YearResult>,
}

impl Projection {
    pub fn total_tax(&self) -> f64 {
        self.years.iter().map(|y| y.total_tax).sum()
    }

    pub fn total_net_income(&self) -> f64 {
        self.years.iter().map(|y| y.net_income).sum()
    }

    pub fn total_withdrawal(&self) -> f64 {
        self.years.iter().map(|y| y.total_withdrawal).sum()
    }

    pub fn final_balance(&self) -> f64 {
        self.years
            .last()
            .map(|y| y.total_closing_balance)
            .unwrap_or(0.0)
    }

    /// First age at which every bucket has run dry.
    pub fn depletion_age(&self) -> Option<u32> {
        self.years
            .iter()
            .find(|y| y.total_closing_balance <= 0.0)
            .map(|y| y.age)
    }
}
