//! crates/posture_core/src/score.rs
//!
//! The wellness score: a pure, saturating function of lifetime totals.
//! Recomputed over the full history after every ledger mutation, so the
//! persisted value is always exactly reproducible from session rows.

/// Minutes constant of the exponential saturation term.
const SATURATION_MINUTES: f64 = 220.0;

/// Penalty per weighted quality failure.
const FAILURE_PENALTY: f64 = 0.7;

/// Computes the bounded wellness score in `[0, 100]`.
///
/// A floor of 20 rewards any engagement; tracked minutes approach the
/// remaining 80 points asymptotically; too-close incidents weigh twice as
/// heavily as generic bad-posture incidents.
pub fn compute_score(total_minutes: i64, bad_posture_total: i64, too_close_total: i64) -> u8 {
    let quality_failures = bad_posture_total as f64 + 2.0 * too_close_total as f64;
    let minutes = total_minutes.max(0) as f64;
    let raw = 20.0 + 80.0 * (1.0 - (-minutes / SATURATION_MINUTES).exp())
        - FAILURE_PENALTY * quality_failures;
    raw.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_always_bounded() {
        assert_eq!(compute_score(0, 0, 0), 20);
        assert_eq!(compute_score(i64::MAX / 2, 0, 0), 100);
        assert_eq!(compute_score(0, 10_000, 10_000), 0);
        for minutes in [0, 1, 59, 220, 10_000] {
            for failures in [0, 1, 7, 500] {
                let score = compute_score(minutes, failures, failures);
                assert!(score <= 100, "score {score} out of range");
            }
        }
    }

    #[test]
    fn score_is_non_increasing_in_failures() {
        for minutes in [0, 30, 220, 2_000] {
            let mut previous = compute_score(minutes, 0, 0);
            for failures in 1..50 {
                let score = compute_score(minutes, failures, 0);
                assert!(score <= previous);
                previous = score;
            }
        }
    }

    #[test]
    fn score_is_non_decreasing_in_minutes() {
        for failures in [0, 3, 40] {
            let mut previous = compute_score(0, failures, failures);
            for minutes in (0..3_000).step_by(37) {
                let score = compute_score(minutes, failures, failures);
                assert!(score >= previous);
                previous = score;
            }
        }
    }

    #[test]
    fn too_close_weighs_twice_as_much_as_bad_posture() {
        // Two bad-posture incidents cost as much as one too-close incident.
        assert_eq!(compute_score(500, 2, 0), compute_score(500, 0, 1));
    }

    #[test]
    fn ten_minute_session_with_four_weighted_failures() {
        // 20 + 80 * (1 - e^(-10/220)) - 0.7 * (2 + 2*1) = 20.75...
        assert_eq!(compute_score(10, 2, 1), 21);
    }

    #[test]
    fn saturation_approaches_but_never_exceeds_one_hundred() {
        let day = compute_score(1_440, 0, 0);
        assert!(day > 90 && day <= 100);
        assert_eq!(compute_score(100_000, 0, 0), 100);
    }
}
