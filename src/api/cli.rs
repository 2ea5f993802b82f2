use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};

use crate::core::{Projection, TaxRegime, run_projection_with_tax};

use super::{build_simulate_response, plan_from_json};

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Multi-bucket retirement drawdown simulator (inflation-linked withdrawals, rebalancing, capital-gains tax)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(
            long,
            help = "JSON file used to persist saved plans; plans are kept in memory when omitted"
        )]
        store: Option<PathBuf>,
        #[command(flatten)]
        tax: TaxArgs,
    },
    /// Project a plan document and print the yearly table
    Simulate {
        plan: PathBuf,
        #[arg(long, help = "Print the full projection as JSON instead of a table")]
        json: bool,
        #[command(flatten)]
        tax: TaxArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TaxArgs {
    #[arg(
        long,
        default_value_t = 12.5,
        help = "Flat tax rate on equity gains above the exemption, in percent"
    )]
    pub equity_tax_rate: f64,
    #[arg(
        long,
        default_value_t = 125_000.0,
        help = "Annual equity gains exempt from tax"
    )]
    pub equity_exemption: f64,
    #[arg(
        long,
        default_value_t = 700_000.0,
        help = "Slab-taxed income at or below which slab tax is fully rebated"
    )]
    pub rebate_threshold: f64,
}

impl TaxArgs {
    pub fn into_regime(self) -> anyhow::Result<TaxRegime> {
        if !(0.0..=100.0).contains(&self.equity_tax_rate) {
            bail!("--equity-tax-rate must be between 0 and 100");
        }
        if !self.equity_exemption.is_finite() || self.equity_exemption < 0.0 {
            bail!("--equity-exemption must be >= 0");
        }
        if !self.rebate_threshold.is_finite() || self.rebate_threshold < 0.0 {
            bail!("--rebate-threshold must be >= 0");
        }

        Ok(TaxRegime {
            equity_rate: self.equity_tax_rate / 100.0,
            equity_exemption: self.equity_exemption,
            rebate_threshold: self.rebate_threshold,
            ..TaxRegime::default()
        })
    }
}

pub fn run_simulate(plan_path: &Path, json: bool, tax: TaxArgs) -> anyhow::Result<()> {
    let regime = tax.into_regime()?;
    let raw = fs::read_to_string(plan_path)
        .with_context(|| format!("reading plan file {}", plan_path.display()))?;
    let plan = plan_from_json(&raw)?;
    let projection = run_projection_with_tax(&plan, &regime)?;

    if json {
        let response = build_simulate_response(&plan, None, projection);
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render_table(&projection));
    }
    Ok(())
}

pub fn render_table(projection: &Projection) -> String {
    let mut out = format!(
        "{:>6} {:>4} {:>16} {:>14} {:>14} {:>12} {:>14} {:>16}\n",
        "Year", "Age", "Opening", "Withdrawal", "Growth", "Tax", "Net Income", "Closing"
    );
    out.push_str(&"-".repeat(105));
    out.push('\n');

    for row in &projection.years {
        out.push_str(&format!(
            "{:>6} {:>4} {:>16.2} {:>14.2} {:>14.2} {:>12.2} {:>14.2} {:>16.2}\n",
            row.year,
            row.age,
            row.total_opening_balance,
            row.total_withdrawal,
            row.total_growth,
            row.total_tax,
            row.net_income,
            row.total_closing_balance,
        ));
    }

    out.push_str(&format!(
        "\nTotal withdrawn: {:.2}  Total tax: {:.2}  Final balance: {:.2}\n",
        projection.total_withdrawal(),
        projection.total_tax(),
        projection.final_balance()
    ));
    if let Some(age) = projection.depletion_age() {
        out.push_str(&format!("Corpus depleted at age {age}\n"));
    }
    out
}
