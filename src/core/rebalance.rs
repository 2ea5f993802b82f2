use log::debug;

use super::engine::{BucketState, RealizedGains};
use super::types::{
    FundBucket, FundYearResult, RebalancingEvent, RebalancingEventKind, RebalancingRule,
    RuleTrigger, TransferAmount,
};

/// Applies the plan's rebalancing rules once per simulated year, after every
/// bucket has finished its monthly loop.
pub(super) struct Rebalancer<'a> {
    rules: &'a [RebalancingRule],
    /// 1-based year index at which each scheduled rule next runs.
    next_due_year: Vec<u32>,
}

impl<'a> Rebalancer<'a> {
    pub fn new(rules: &'a [RebalancingRule]) -> Self {
        let next_due_year = rules
            .iter()
            .map(|rule| match rule.trigger {
                RuleTrigger::Scheduled { frequency, .. } => frequency.max(1),
                RuleTrigger::Shortfall { .. } => 1,
            })
            .collect();
        Self {
            rules,
            next_due_year,
        }
    }

    pub fn run_year(
        &mut self,
        year_index: u32,
        inflation: f64,
        funds: &[FundBucket],
        buckets: &mut [BucketState],
        results: &mut [FundYearResult],
        gains: &mut RealizedGains,
    ) {
        for (rule_idx, rule) in self.rules.iter().enumerate() {
            let (src, dst) = (rule.source_index, rule.destination_index);
            if src >= buckets.len() || dst >= buckets.len() || src == dst {
                continue;
            }

            match rule.trigger {
                RuleTrigger::Scheduled { frequency, amount } => {
                    if year_index < self.next_due_year[rule_idx] {
                        continue;
                    }
                    self.next_due_year[rule_idx] = year_index + frequency.max(1);

                    let source_balance = buckets[src].balance;
                    let (requested, reason) = match amount {
                        TransferAmount::Fixed(value) => {
                            (value, format!("scheduled transfer every {frequency} year(s)"))
                        }
                        TransferAmount::Percentage(pct) => (
                            source_balance * pct / 100.0,
                            format!("scheduled {pct}% transfer every {frequency} year(s)"),
                        ),
                    };
                    let amount = requested.min(source_balance).max(0.0);
                    if amount <= 0.0 {
                        results[src].events.push(RebalancingEvent {
                            kind: RebalancingEventKind::Skip,
                            amount: 0.0,
                            counterparty: funds[dst].name.clone(),
                            reason: format!("{reason}: nothing available to move"),
                        });
                        continue;
                    }
                    transfer(amount, src, dst, &reason, funds, buckets, results, gains);
                }
                RuleTrigger::Shortfall { years } => {
                    let need = projected_need(buckets[dst].annual_target, inflation, years);
                    let dest_balance = buckets[dst].balance;
                    if dest_balance >= need {
                        debug!(
                            "year {year_index}: '{}' covers {years} years of need ({dest_balance:.2} >= {need:.2})",
                            funds[dst].name
                        );
                        results[dst].events.push(RebalancingEvent {
                            kind: RebalancingEventKind::Skip,
                            amount: 0.0,
                            counterparty: funds[src].name.clone(),
                            reason: format!(
                                "balance covers {years} years of projected withdrawals ({need:.2})"
                            ),
                        });
                        continue;
                    }

                    let shortfall = need - dest_balance;
                    let amount = shortfall.min(buckets[src].balance).max(0.0);
                    if amount <= 0.0 {
                        results[dst].events.push(RebalancingEvent {
                            kind: RebalancingEventKind::Skip,
                            amount: 0.0,
                            counterparty: funds[src].name.clone(),
                            reason: format!("shortfall of {shortfall:.2} but source is empty"),
                        });
                        continue;
                    }
                    let reason = format!("refill shortfall of {shortfall:.2} for {years} years");
                    transfer(amount, src, dst, &reason, funds, buckets, results, gains);
                }
            }
        }
    }
}

/// Withdrawal need of the next `years` years, each inflated forward from the
/// current year's target.
fn projected_need(annual_target: f64, inflation: f64, years: u32) -> f64 {
    let mut need = 0.0;
    let mut target = annual_target;
    for _ in 0..years {
        target *= 1.0 + inflation;
        need += target;
    }
    need
}

/// Moves `amount` between buckets. The gain share is realised under the
/// source's tax category and the destination books the full amount as basis.
#[allow(clippy::too_many_arguments)]
fn transfer(
    amount: f64,
    src: usize,
    dst: usize,
    reason: &str,
    funds: &[FundBucket],
    buckets: &mut [BucketState],
    results: &mut [FundYearResult],
    gains: &mut RealizedGains,
) {
    let principal = amount * buckets[src].basis_ratio();
    gains.record(funds[src].tax_category, amount - principal);

    let source = &mut buckets[src];
    source.balance -= amount;
    source.cost_basis -= principal;
    source.clamp_basis();

    let destination = &mut buckets[dst];
    destination.balance += amount;
    destination.cost_basis += amount;
    destination.clamp_basis();

    debug!(
        "moved {amount:.2} from '{}' to '{}' ({reason})",
        funds[src].name, funds[dst].name
    );

    results[src].rebalancing_out += amount;
    results[src].events.push(RebalancingEvent {
        kind: RebalancingEventKind::Out,
        amount,
        counterparty: funds[dst].name.clone(),
        reason: reason.to_string(),
    });
    results[dst].rebalancing_in += amount;
    results[dst].events.push(RebalancingEvent {
        kind: RebalancingEventKind::In,
        amount,
        counterparty: funds[src].name.clone(),
        reason: reason.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_projection;
    use crate::core::types::{Plan, TaxCategory};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn fund(name: &str, amount: f64, withdrawal: f64, cat: TaxCategory) -> FundBucket {
        FundBucket {
            name: name.to_string(),
            allocation_amount: amount,
            expected_growth_rate: 0.0,
            withdrawal_rate: withdrawal,
            tax_category: cat,
        }
    }

    fn bucket_plan(liquid: f64, rule: RuleTrigger) -> Plan {
        Plan {
            name: "buckets".to_string(),
            start_year: 2030,
            start_age: 60,
            end_age: 62,
            inflation_rate: 0.0,
            funds: vec![
                fund("Long Term", 5_000_000.0, 0.0, TaxCategory::Equity),
                fund("Liquid", liquid, 10.0, TaxCategory::Debt),
            ],
            rebalancing_rules: vec![RebalancingRule {
                source_index: 0,
                destination_index: 1,
                trigger: rule,
            }],
        }
    }

    #[test]
    fn projected_need_inflates_each_future_year() {
        assert_approx(projected_need(100.0, 0.0, 3), 300.0);
        assert_approx(projected_need(100.0, 0.10, 2), 110.0 + 121.0);
        assert_approx(projected_need(100.0, 0.05, 0), 0.0);
    }

    #[test]
    fn shortfall_rule_skips_when_destination_is_covered() {
        // 1M liquid at 10% => 100k/yr; after year one 900k still covers 3 years.
        let plan = bucket_plan(1_000_000.0, RuleTrigger::Shortfall { years: 3 });
        let projection = run_projection(&plan).expect("valid plan");
        let year = &projection.years[0];

        let liquid = &year.fund_results[1];
        assert_eq!(liquid.events.len(), 1);
        assert_eq!(liquid.events[0].kind, RebalancingEventKind::Skip);
        assert_eq!(liquid.events[0].counterparty, "Long Term");
        assert_approx(liquid.rebalancing_in, 0.0);
        assert!(year.fund_results[0].events.is_empty());
        assert_approx(year.fund_results[0].closing_balance, 5_000_000.0);
    }

    #[test]
    fn shortfall_rule_tops_up_exactly_the_gap() {
        // 1M liquid at 10% => 100k/yr; after year one 900k but 10 years need 1M.
        let plan = bucket_plan(1_000_000.0, RuleTrigger::Shortfall { years: 10 });
        let projection = run_projection(&plan).expect("valid plan");
        let year = &projection.years[0];

        assert_approx(year.fund_results[1].rebalancing_in, 100_000.0);
        assert_approx(year.fund_results[1].closing_balance, 1_000_000.0);
        assert_approx(year.fund_results[0].rebalancing_out, 100_000.0);
        assert_approx(year.fund_results[0].closing_balance, 4_900_000.0);
        assert_eq!(year.fund_results[0].events[0].kind, RebalancingEventKind::Out);
    }

    #[test]
    fn shortfall_transfer_is_capped_by_source_balance() {
        let mut plan = bucket_plan(1_000_000.0, RuleTrigger::Shortfall { years: 10 });
        plan.funds[0].allocation_amount = 40_000.0;
        let projection = run_projection(&plan).expect("valid plan");

        let first = &projection.years[0];
        assert_approx(first.fund_results[1].rebalancing_in, 40_000.0);
        assert_approx(first.fund_results[0].closing_balance, 0.0);

        let second = &projection.years[1].fund_results[1];
        assert_eq!(second.events[0].kind, RebalancingEventKind::Skip);
        assert!(second.events[0].reason.contains("source is empty"));
    }

    #[test]
    fn scheduled_rule_runs_on_its_frequency() {
        let plan = bucket_plan(
            1_000_000.0,
            RuleTrigger::Scheduled {
                frequency: 2,
                amount: TransferAmount::Fixed(250_000.0),
            },
        );
        let projection = run_projection(&plan).expect("valid plan");
        let moved: Vec<f64> = projection
            .years
            .iter()
            .map(|y| y.fund_results[1].rebalancing_in)
            .collect();
        assert_approx(moved[0], 0.0);
        assert_approx(moved[1], 250_000.0);
        assert_approx(moved[2], 0.0);
    }

    #[test]
    fn fixed_transfer_is_clamped_to_source_balance() {
        let mut plan = bucket_plan(
            100_000.0,
            RuleTrigger::Scheduled {
                frequency: 1,
                amount: TransferAmount::Fixed(9_000_000.0),
            },
        );
        plan.end_age = 61;
        let projection = run_projection(&plan).expect("valid plan");

        assert_approx(projection.years[0].fund_results[0].rebalancing_out, 5_000_000.0);
        let second_source = &projection.years[1].fund_results[0];
        assert_eq!(second_source.events[0].kind, RebalancingEventKind::Skip);
    }

    #[test]
    fn malformed_rules_are_skipped_without_touching_buckets() {
        let funds = vec![
            fund("Equity", 0.0, 0.0, TaxCategory::Equity),
            fund("Debt", 0.0, 0.0, TaxCategory::Debt),
        ];
        let scheduled = RuleTrigger::Scheduled {
            frequency: 1,
            amount: TransferAmount::Fixed(50.0),
        };
        let rules = vec![
            RebalancingRule {
                source_index: 0,
                destination_index: 5,
                trigger: scheduled,
            },
            RebalancingRule {
                source_index: 1,
                destination_index: 1,
                trigger: RuleTrigger::Shortfall { years: 2 },
            },
            RebalancingRule {
                source_index: 0,
                destination_index: 1,
                trigger: scheduled,
            },
        ];
        let mut buckets = vec![
            BucketState {
                balance: 100.0,
                cost_basis: 100.0,
                annual_target: 0.0,
            },
            BucketState {
                balance: 10.0,
                cost_basis: 10.0,
                annual_target: 40.0,
            },
        ];
        let mut results = vec![FundYearResult::empty("Equity"), FundYearResult::empty("Debt")];
        let mut gains = RealizedGains::default();

        let mut rebalancer = Rebalancer::new(&rules);
        rebalancer.run_year(1, 0.0, &funds, &mut buckets, &mut results, &mut gains);

        assert_eq!(results[0].events.len(), 1);
        assert_eq!(results[0].events[0].kind, RebalancingEventKind::Out);
        assert_eq!(results[1].events.len(), 1);
        assert_eq!(results[1].events[0].kind, RebalancingEventKind::In);
        assert_approx(buckets[0].balance, 50.0);
        assert_approx(buckets[1].balance, 60.0);
        assert_approx(gains.equity + gains.slab, 0.0);
    }

    #[test]
    fn transfer_realises_gain_and_resets_destination_basis() {
        let funds = vec![
            fund("Equity", 0.0, 0.0, TaxCategory::Equity),
            fund("Debt", 0.0, 0.0, TaxCategory::Debt),
        ];
        let mut buckets = vec![
            BucketState {
                balance: 200.0,
                cost_basis: 50.0,
                annual_target: 0.0,
            },
            BucketState {
                balance: 10.0,
                cost_basis: 10.0,
                annual_target: 0.0,
            },
        ];
        let mut results = vec![FundYearResult::empty("Equity"), FundYearResult::empty("Debt")];
        let mut gains = RealizedGains::default();

        transfer(100.0, 0, 1, "test", &funds, &mut buckets, &mut results, &mut gains);

        assert_approx(gains.equity, 75.0);
        assert_approx(gains.slab, 0.0);
        assert_approx(buckets[0].balance, 100.0);
        assert_approx(buckets[0].cost_basis, 25.0);
        assert_approx(buckets[1].balance, 110.0);
        assert_approx(buckets[1].cost_basis, 110.0);
        assert_approx(results[0].rebalancing_out, 100.0);
        assert_approx(results[1].rebalancing_in, 100.0);
    }
}
