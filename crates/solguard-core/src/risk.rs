//! Fallback risk score derived from finding severities alone.

use crate::model::Vulnerability;

pub const MIN_RISK_SCORE: f64 = 1.0;
pub const MAX_RISK_SCORE: f64 = 10.0;

/// Sums severity weights and maps the total onto `1..=10`, rounded to one decimal (half up).
///
/// No findings scores exactly `1.0`.
pub fn score(findings: &[Vulnerability]) -> f64 {
    if findings.is_empty() {
        return MIN_RISK_SCORE;
    }
    let total: f64 = findings.iter().map(|finding| finding.severity.weight()).sum();
    round_tenths((MIN_RISK_SCORE + total / 2.0).min(MAX_RISK_SCORE))
}

/// Brings an externally supplied score into range; non-finite values become the midpoint.
pub fn clamp(score: f64) -> f64 {
    if !score.is_finite() {
        return 5.0;
    }
    round_tenths(score.clamp(MIN_RISK_SCORE, MAX_RISK_SCORE))
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeLocation, Severity};
    use proptest::prelude::*;

    fn finding(severity: Severity) -> Vulnerability {
        Vulnerability {
            id: "T-01".into(),
            name: "Test".into(),
            severity,
            description: String::new(),
            location: CodeLocation::unknown("contract.sol"),
            technical_explanation: String::new(),
            exploit_scenario: String::new(),
            recommendation: String::new(),
            code_snippet: String::new(),
            references: Vec::new(),
            confidence: 0.5,
        }
    }

    fn severity() -> impl Strategy<Value = Severity> {
        prop::sample::select(Severity::ALL.to_vec())
    }

    #[test]
    fn empty_findings_score_one() {
        assert_eq!(score(&[]), 1.0);
    }

    #[test]
    fn critical_plus_high_scores_four_and_a_half() {
        let findings = [finding(Severity::Critical), finding(Severity::High)];
        assert_eq!(score(&findings), 4.5);
    }

    #[test]
    fn rounds_half_up_and_caps_at_ten() {
        assert_eq!(score(&[finding(Severity::Info)]), 1.3);
        assert_eq!(score(&vec![finding(Severity::Critical); 6]), 10.0);
    }

    #[test]
    fn clamp_handles_out_of_range_values() {
        assert_eq!(clamp(0.0), 1.0);
        assert_eq!(clamp(42.0), 10.0);
        assert_eq!(clamp(7.25), 7.3);
        assert_eq!(clamp(f64::NAN), 5.0);
    }

    proptest! {
        #[test]
        fn score_stays_in_range(severities in prop::collection::vec(severity(), 0..40)) {
            let findings: Vec<_> = severities.into_iter().map(finding).collect();
            let value = score(&findings);
            prop_assert!((MIN_RISK_SCORE..=MAX_RISK_SCORE).contains(&value));
        }

        #[test]
        fn adding_a_finding_never_lowers_the_score(
            severities in prop::collection::vec(severity(), 0..30),
            extra in severity(),
        ) {
            let mut findings: Vec<_> = severities.into_iter().map(finding).collect();
            let before = score(&findings);
            findings.push(finding(extra));
            prop_assert!(score(&findings) >= before);
        }
    }
}
