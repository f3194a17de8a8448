use serde::{Deserialize, Serialize};

use crate::error::SettlementError;
use crate::fixed::{InterestRate, Ratio};
use crate::types::Moment;
use crate::SettlementResult;

/// One risk bucket of a pool's valuation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScore {
    /// Lower days-past-due boundary of this bucket
    pub days_past_due: u32,
    /// Share of principal paid out when a loan is financed
    pub advance_rate: Ratio,
    /// Extra annual rate accrued during the grace period
    pub penalty_rate: InterestRate,
    /// Fallback accrual rate for loans whose terms carry none
    pub interest_rate: InterestRate,
    pub probability_of_default: Ratio,
    pub loss_given_default: Ratio,
    /// Annual rate used to discount expected cash flows
    pub discount_rate: InterestRate,
    /// Seconds after maturity before a write-off is allowed
    pub grace_period: Moment,
    /// Seconds after grace before the full write-off applies
    pub collection_period: Moment,
    /// Share of outstanding debt still recognised after grace
    pub write_off_after_grace_period: Ratio,
    /// Share of outstanding debt still recognised after collection
    pub write_off_after_collection_period: Ratio,
}

impl RiskScore {
    /// Expected loss over the loan's life, `PD x LGD`, capped at 100%.
    pub fn expected_loss(&self) -> Ratio {
        let product = u64::from(self.probability_of_default.0)
            * u64::from(self.loss_given_default.0)
            / u64::from(Ratio::ONE.0);
        Ratio(product.min(u64::from(Ratio::ONE.0)) as u32)
    }
}

/// Buckets sorted by strictly ascending days past due.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RiskScore>", into = "Vec<RiskScore>")]
pub struct RiskScoreTable {
    scores: Vec<RiskScore>,
}

impl RiskScoreTable {
    pub fn new(scores: Vec<RiskScore>) -> SettlementResult<Self> {
        validate_scores(&scores)?;
        Ok(Self { scores })
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RiskScore> {
        self.scores.iter()
    }

    /// Look up a 1-based risk score.
    pub fn get(&self, score: u8) -> SettlementResult<&RiskScore> {
        if score == 0 {
            return Err(SettlementError::InvalidRiskScore { score });
        }
        self.scores
            .get(usize::from(score) - 1)
            .ok_or(SettlementError::InvalidRiskScore { score })
    }

    /// Bucket with the greatest boundary not above `days`, as a 1-based score.
    pub fn bucket_for_days_past_due(&self, days: u32) -> Option<(u8, &RiskScore)> {
        self.scores
            .iter()
            .enumerate()
            .take_while(|(_, s)| s.days_past_due <= days)
            .last()
            .map(|(idx, s)| ((idx + 1) as u8, s))
    }
}

impl TryFrom<Vec<RiskScore>> for RiskScoreTable {
    type Error = SettlementError;

    fn try_from(scores: Vec<RiskScore>) -> Result<Self, Self::Error> {
        RiskScoreTable::new(scores)
    }
}

impl From<RiskScoreTable> for Vec<RiskScore> {
    fn from(table: RiskScoreTable) -> Self {
        table.scores
    }
}

fn validate_scores(scores: &[RiskScore]) -> SettlementResult<()> {
    if scores.len() > usize::from(u8::MAX) {
        return Err(SettlementError::invalid(
            "risk_scores",
            "at most 255 buckets are supported",
        ));
    }

    for (idx, score) in scores.iter().enumerate() {
        if idx > 0 && score.days_past_due <= scores[idx - 1].days_past_due {
            return Err(SettlementError::UnsortedRiskScores { index: idx });
        }

        let ratios = [
            ("advance_rate", score.advance_rate),
            ("probability_of_default", score.probability_of_default),
            ("loss_given_default", score.loss_given_default),
            ("write_off_after_grace_period", score.write_off_after_grace_period),
            (
                "write_off_after_collection_period",
                score.write_off_after_collection_period,
            ),
        ];
        for (name, ratio) in ratios {
            if !ratio.is_valid() {
                return Err(SettlementError::invalid(
                    format!("risk_scores[{idx}].{name}"),
                    "ratio cannot exceed 100%",
                ));
            }
        }

        if score.write_off_after_collection_period > score.write_off_after_grace_period {
            return Err(SettlementError::invalid(
                format!("risk_scores[{idx}].write_off_after_collection_period"),
                "must not recognise more value than the grace-period write-off",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(dpd: u32) -> RiskScore {
        RiskScore {
            days_past_due: dpd,
            advance_rate: Ratio(950_000),
            penalty_rate: InterestRate::ZERO,
            interest_rate: InterestRate(80_000),
            probability_of_default: Ratio(100_000),
            loss_given_default: Ratio(500_000),
            discount_rate: InterestRate(40_000),
            grace_period: 2 * 86_400,
            collection_period: 30 * 86_400,
            write_off_after_grace_period: Ratio(600_000),
            write_off_after_collection_period: Ratio::ZERO,
        }
    }

    #[test]
    fn test_sorted_table_accepted() {
        let table = RiskScoreTable::new(vec![bucket(0), bucket(30), bucket(60)]).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(2).unwrap().days_past_due, 30);
    }

    #[test]
    fn test_unsorted_table_rejected() {
        let err = RiskScoreTable::new(vec![bucket(0), bucket(60), bucket(30)]).unwrap_err();
        assert_eq!(err, SettlementError::UnsortedRiskScores { index: 2 });

        // equal boundaries are not strictly ascending either
        let err = RiskScoreTable::new(vec![bucket(10), bucket(10)]).unwrap_err();
        assert_eq!(err, SettlementError::UnsortedRiskScores { index: 1 });
    }

    #[test]
    fn test_ratio_bounds_and_write_off_order() {
        let mut b = bucket(0);
        b.advance_rate = Ratio(1_000_001);
        assert!(RiskScoreTable::new(vec![b]).is_err());

        let mut b = bucket(0);
        b.write_off_after_collection_period = Ratio(700_000);
        assert!(RiskScoreTable::new(vec![b]).is_err());
    }

    #[test]
    fn test_score_lookup_is_one_based() {
        let table = RiskScoreTable::new(vec![bucket(0)]).unwrap();
        assert!(table.get(0).is_err());
        assert!(table.get(1).is_ok());
        assert_eq!(table.get(2), Err(SettlementError::InvalidRiskScore { score: 2 }));
    }

    #[test]
    fn test_bucket_for_days_past_due() {
        let table = RiskScoreTable::new(vec![bucket(0), bucket(30), bucket(90)]).unwrap();
        assert_eq!(table.bucket_for_days_past_due(0).map(|b| b.0), Some(1));
        assert_eq!(table.bucket_for_days_past_due(45).map(|b| b.0), Some(2));
        assert_eq!(table.bucket_for_days_past_due(365).map(|b| b.0), Some(3));

        let late_start = RiskScoreTable::new(vec![bucket(5)]).unwrap();
        assert!(late_start.bucket_for_days_past_due(1).is_none());
    }

    #[test]
    fn test_expected_loss() {
        assert_eq!(bucket(0).expected_loss(), Ratio(50_000));
    }

    #[test]
    fn test_deserialize_validates() {
        let json = serde_json::to_string(&vec![bucket(30), bucket(0)]).unwrap();
        assert!(serde_json::from_str::<RiskScoreTable>(&json).is_err());
    }
}
