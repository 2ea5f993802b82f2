use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxSlab {
    /// Upper bound of the slab; `None` for the open-ended top slab.
    pub upper_limit: Option<f64>,
    pub rate: f64,
}

/// Yearly capital-gains regime: flat equity rate above an exemption, and a
/// progressive slab schedule with a full rebate at low incomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRegime {
    pub equity_rate: f64,
    pub equity_exemption: f64,
    pub slabs: Vec<TaxSlab>,
    pub rebate_threshold: f64,
}

impl Default for TaxRegime {
    fn default() -> Self {
        let slab = |upper_limit: Option<f64>, rate: f64| TaxSlab { upper_limit, rate };
        Self {
            equity_rate: 0.125,
            equity_exemption: 125_000.0,
            slabs: vec![
                slab(Some(300_000.0), 0.0),
                slab(Some(700_000.0), 0.05),
                slab(Some(1_000_000.0), 0.10),
                slab(Some(1_200_000.0), 0.15),
                slab(Some(1_500_000.0), 0.20),
                slab(None, 0.30),
            ],
            rebate_threshold: 700_000.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct YearTax {
    pub equity_tax: f64,
    pub slab_tax: f64,
}

impl YearTax {
    pub fn total(self) -> f64 {
        self.equity_tax + self.slab_tax
    }
}

impl TaxRegime {
    pub fn equity_tax(&self, gains: f64) -> f64 {
        (gains - self.equity_exemption).max(0.0) * self.equity_rate.clamp(0.0, 1.0)
    }

    pub fn slab_tax(&self, income: f64) -> f64 {
        let income = income.max(0.0);
        if income <= self.rebate_threshold {
            return 0.0;
        }

        let mut tax = 0.0;
        let mut lower = 0.0;
        for slab in &self.slabs {
            let upper = slab.upper_limit.unwrap_or(f64::INFINITY);
            if income <= lower {
                break;
            }
            let taxable_in_slab = (income.min(upper) - lower).max(0.0);
            tax += taxable_in_slab * slab.rate.clamp(0.0, 1.0);
            lower = upper;
        }
        tax
    }

    pub fn year_tax(&self, equity_gains: f64, slab_gains: f64) -> YearTax {
        YearTax {
            equity_tax: self.equity_tax(equity_gains),
            slab_tax: self.slab_tax(slab_gains),
        }
    }
}
