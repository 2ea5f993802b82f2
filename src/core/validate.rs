use thiserror::Error;

use super::types::{Plan, RuleTrigger, TransferAmount};

/// Oldest age a plan may project to.
pub const MAX_END_AGE: u32 = 150;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("endAge ({end}) must be >= startAge ({start})")]
    AgeRange { start: u32, end: u32 },

    #[error("endAge ({end}) must be <= {max}")]
    AgeLimit { end: u32, max: u32 },

    #[error("startYear ({start_year}) leaves no room for the projected years")]
    YearOverflow { start_year: i32 },

    #[error("{field} must be a finite number")]
    NonFinite { field: String },

    #[error("{field} must be >= 0")]
    Negative { field: String },

    #[error("rule {rule}: fund index {index} is out of range ({funds} funds)")]
    RuleIndexOutOfRange {
        rule: usize,
        index: usize,
        funds: usize,
    },

    #[error("rule {rule}: source and destination are both fund {index}")]
    SelfTransfer { rule: usize, index: usize },

    #[error("rule {rule}: frequency must be >= 1 year")]
    ZeroFrequency { rule: usize },

    #[error("rule {rule}: shortfall years must be >= 1")]
    ZeroShortfallYears { rule: usize },

    #[error("rule {rule}: {reason}")]
    InvalidTransferAmount { rule: usize, reason: String },
}

fn check_non_negative(field: impl Into<String>, value: f64) -> Result<(), PlanError> {
    let field = field.into();
    if !value.is_finite() {
        return Err(PlanError::NonFinite { field });
    }
    if value < 0.0 {
        return Err(PlanError::Negative { field });
    }
    Ok(())
}

impl Plan {
    /// Rejects plan shapes that would otherwise produce a meaningless projection.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.end_age < self.start_age {
            return Err(PlanError::AgeRange {
                start: self.start_age,
                end: self.end_age,
            });
        }
        if self.end_age > MAX_END_AGE {
            return Err(PlanError::AgeLimit {
                end: self.end_age,
                max: MAX_END_AGE,
            });
        }
        if self.final_year().is_none() {
            return Err(PlanError::YearOverflow {
                start_year: self.start_year,
            });
        }

        check_non_negative("inflationRate", self.inflation_rate)?;

        for (idx, fund) in self.funds.iter().enumerate() {
            check_non_negative(
                format!("funds[{idx}].allocationAmount"),
                fund.allocation_amount,
            )?;
            check_non_negative(
                format!("funds[{idx}].expectedGrowthRate"),
                fund.expected_growth_rate,
            )?;
            check_non_negative(format!("funds[{idx}].withdrawalRate"), fund.withdrawal_rate)?;
        }

        let funds = self.funds.len();
        for (rule_idx, rule) in self.rebalancing_rules.iter().enumerate() {
            for index in [rule.source_index, rule.destination_index] {
                if index >= funds {
                    return Err(PlanError::RuleIndexOutOfRange {
                        rule: rule_idx,
                        index,
                        funds,
                    });
                }
            }
            if rule.source_index == rule.destination_index {
                return Err(PlanError::SelfTransfer {
                    rule: rule_idx,
                    index: rule.source_index,
                });
            }

            match rule.trigger {
                RuleTrigger::Scheduled { frequency, amount } => {
                    if frequency == 0 {
                        return Err(PlanError::ZeroFrequency { rule: rule_idx });
                    }
                    match amount {
                        TransferAmount::Fixed(value) => {
                            if !value.is_finite() || value < 0.0 {
                                return Err(PlanError::InvalidTransferAmount {
                                    rule: rule_idx,
                                    reason: "fixed amount must be a finite value >= 0"
                                        .to_string(),
                                });
                            }
                        }
                        TransferAmount::Percentage(pct) => {
                            if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
                                return Err(PlanError::InvalidTransferAmount {
                                    rule: rule_idx,
                                    reason: "percentage must be in (0, 100]".to_string(),
                                });
                            }
                        }
                    }
                }
                RuleTrigger::Shortfall { years } => {
                    if years == 0 {
                        return Err(PlanError::ZeroShortfallYears { rule: rule_idx });
                    }
                }
            }
        }

        Ok(())
    }
}
