//! Fitness scoring
//!
//! Maps a probe outcome plus genome complexity to a scalar score, and
//! imposes a deterministic total order on evaluated strategies.

use std::cmp::Ordering;

use crate::protocol::WorkerResult;
use crate::types::ScoredStrategy;

/// Scalar fitness: success percentage minus a weighted complexity penalty.
///
/// Zero probes means zero score. Higher is better; the penalty only decides
/// between strategies with comparable success.
pub fn score(result: &WorkerResult, complexity: u32, alpha: f64) -> f64 {
    if result.total_count == 0 {
        return 0.0;
    }
    let success_rate = (result.success_count as f64 / result.total_count as f64) * 100.0;
    success_rate - alpha * f64::from(complexity)
}

/// Sort evaluated strategies best-first.
///
/// Ties break on lower duration, then lower complexity, then lexicographic
/// argv, so a fully tied batch still ranks deterministically.
pub fn rank(results: &mut [ScoredStrategy], alpha: f64) {
    results.sort_by(|a, b| compare(a, b, alpha));
}

fn compare(a: &ScoredStrategy, b: &ScoredStrategy, alpha: f64) -> Ordering {
    let sa = score(&a.result, a.complexity, alpha);
    let sb = score(&b.result, b.complexity, alpha);
    sb.partial_cmp(&sa)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.duration.cmp(&b.duration))
        .then_with(|| a.complexity.cmp(&b.complexity))
        .then_with(|| a.raw_args.cmp(&b.raw_args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Mode, Strategy};
    use std::time::Duration;

    fn scored(args: &str, success: usize, total: usize, complexity: u32, ms: u64) -> ScoredStrategy {
        ScoredStrategy {
            strategy: Strategy::new(Mode::Fake),
            raw_args: args.to_string(),
            duration: Duration::from_millis(ms),
            result: WorkerResult {
                success: success > 0,
                success_count: success,
                total_count: total,
                ..WorkerResult::default()
            },
            complexity,
        }
    }

    #[test]
    fn test_score_zero_total() {
        let res = WorkerResult::default();
        assert_eq!(score(&res, 10, 0.5), 0.0);
    }

    #[test]
    fn test_score_formula() {
        let res = WorkerResult {
            success: true,
            success_count: 20,
            total_count: 25,
            ..WorkerResult::default()
        };
        // 80% minus 0.5 * 4
        assert!((score(&res, 4, 0.5) - 78.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rank_prefers_success_rate() {
        let mut results = vec![
            scored("b", 10, 25, 2, 100),
            scored("a", 20, 25, 2, 100),
        ];
        rank(&mut results, 0.5);
        assert_eq!(results[0].raw_args, "a");
    }

    #[test]
    fn test_rank_tie_breaks_on_duration_then_complexity_then_args() {
        let mut results = vec![
            scored("z", 10, 25, 2, 200),
            scored("y", 10, 25, 2, 100),
            scored("x", 10, 25, 1, 100),
        ];
        // x and y differ in complexity, which also shifts the score, so use
        // alpha 0 to isolate the tie-break chain.
        rank(&mut results, 0.0);
        assert_eq!(results[0].raw_args, "x");
        assert_eq!(results[1].raw_args, "y");
        assert_eq!(results[2].raw_args, "z");

        let mut results = vec![
            scored("bbb", 10, 25, 2, 100),
            scored("aaa", 10, 25, 2, 100),
        ];
        rank(&mut results, 0.5);
        assert_eq!(results[0].raw_args, "aaa");
    }

    #[test]
    fn test_rank_failed_evaluations_sink() {
        let mut results = vec![
            scored("failed", 0, 0, 1, 50),
            scored("partial", 5, 25, 30, 100),
        ];
        rank(&mut results, 0.5);
        assert_eq!(results[0].raw_args, "partial");
    }
}
