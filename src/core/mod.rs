mod engine;
mod rebalance;
mod tax;
mod types;
mod validate;

pub use engine::{run_projection, run_projection_with_tax};
pub use tax::{TaxRegime, TaxSlab, YearTax};
pub use types::{
    FundBucket, FundYearResult, MonthlyDetail, MonthlyField, Plan, Projection, RebalancingEvent,
    RebalancingEventKind, RebalancingRule, RuleTrigger, TaxCategory, TransferAmount, YearResult,
    current_year,
};
pub use validate::{MAX_END_AGE, PlanError};
