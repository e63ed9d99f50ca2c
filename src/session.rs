// src/session.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::reps::Reps;

/// Rest period used when an exercise has no configured rest time.
pub const FALLBACK_REST_SECONDS: u32 = 60;

/// Lifecycle of a workout session. A discarded session has no row, so it
/// never shows up here: looking it up yields `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub const fn from_completed_at(completed_at: Option<&DateTime<Utc>>) -> Self {
        match completed_at {
            Some(_) => Self::Completed,
            None => Self::Active,
        }
    }
}

/// The set of fields the runner may change on a session exercise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionUpdate {
    SetActualSets(i64),
    SetActualReps(Reps),
    SetActualWeight(f64),
    SetCompleted(bool),
}

impl SessionUpdate {
    /// Column written by this update.
    pub const fn column(&self) -> &'static str {
        match self {
            Self::SetActualSets(_) => "actual_sets",
            Self::SetActualReps(_) => "actual_reps",
            Self::SetActualWeight(_) => "actual_weight",
            Self::SetCompleted(_) => "completed",
        }
    }

    /// Only marking an exercise done starts the rest countdown.
    pub const fn starts_rest_timer(&self) -> bool {
        matches!(self, Self::SetCompleted(true))
    }
}

/// One-shot rest countdown started when an exercise is marked completed.
///
/// It holds no thread or handle: remaining time is derived from the start
/// instant, and `skip` is the only cancellation signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestTimer {
    pub session_exercise_id: i64,
    pub duration_seconds: u32,
    pub started_at: DateTime<Utc>,
    dismissed: bool,
}

impl RestTimer {
    pub const fn start(
        session_exercise_id: i64,
        duration_seconds: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_exercise_id,
            duration_seconds,
            started_at,
            dismissed: false,
        }
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.started_at + Duration::seconds(i64::from(self.duration_seconds))
    }

    /// Whole seconds left, never negative. Zero once dismissed.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u32 {
        if self.dismissed {
            return 0;
        }
        let left = (self.ends_at() - now).num_seconds();
        u32::try_from(left.max(0)).unwrap_or(0)
    }

    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        self.dismissed || now >= self.ends_at()
    }

    pub fn skip(&mut self) {
        self.dismissed = true;
    }

    pub const fn is_dismissed(&self) -> bool {
        self.dismissed
    }
}

/// Most recent recorded performance of an exercise ("ghost set").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPerformance {
    pub session_id: i64,
    pub performed_at: DateTime<Utc>,
    pub weight: Option<f64>,
    pub reps: Option<Reps>,
    pub sets: Option<i64>,
}

impl LastPerformance {
    pub fn estimated_one_rep_max(&self) -> Option<f64> {
        let weight = self.weight?;
        let reps = self.reps.unwrap_or(Reps::Fixed(1));
        Some(estimate_one_rep_max(weight, &reps))
    }
}

/// Epley estimate: `round(w * (1 + r/30))`, or `w` itself for a single rep.
pub fn estimate_one_rep_max(weight: f64, reps: &Reps) -> f64 {
    let r = reps.effective_count();
    if r == 1 {
        return weight;
    }
    (weight * (1.0 + f64::from(r) / 30.0)).round()
}

/// `sets x reps x weight` for one logged exercise. Missing sets count as one
/// set; a missing rep count or weight gives no volume.
#[allow(clippy::cast_precision_loss)]
pub fn volume(sets: Option<i64>, reps: Option<&Reps>, weight: Option<f64>) -> f64 {
    let s = sets.unwrap_or(1).max(0) as f64;
    let r = reps.map_or(0.0, |r| f64::from(r.effective_count()));
    s * r * weight.unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn epley_matches_reference_values() {
        assert_eq!(estimate_one_rep_max(100.0, &Reps::Fixed(1)), 100.0);
        assert_eq!(estimate_one_rep_max(100.0, &Reps::Fixed(10)), 133.0);
        assert_eq!(estimate_one_rep_max(100.0, &Reps::Range(10, 12)), 133.0);
        assert_eq!(estimate_one_rep_max(80.0, &Reps::ToFailure), 80.0);
    }

    #[test]
    fn volume_treats_missing_values() {
        assert_eq!(volume(Some(3), Some(&Reps::Range(10, 12)), Some(50.0)), 1500.0);
        assert_eq!(volume(None, Some(&Reps::Fixed(5)), Some(100.0)), 500.0);
        assert_eq!(volume(Some(3), None, Some(100.0)), 0.0);
        assert_eq!(volume(Some(3), Some(&Reps::Fixed(5)), None), 0.0);
    }

    #[test]
    fn rest_timer_counts_down_and_can_be_skipped() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut timer = RestTimer::start(7, 90, start);

        assert_eq!(timer.remaining_seconds(start), 90);
        assert_eq!(timer.remaining_seconds(start + Duration::seconds(30)), 60);
        assert!(!timer.is_finished(start + Duration::seconds(89)));
        assert!(timer.is_finished(start + Duration::seconds(90)));
        assert_eq!(timer.remaining_seconds(start + Duration::seconds(500)), 0);

        timer.skip();
        assert!(timer.is_dismissed());
        assert!(timer.is_finished(start));
        assert_eq!(timer.remaining_seconds(start), 0);
    }

    #[test]
    fn only_completing_starts_rest() {
        assert!(SessionUpdate::SetCompleted(true).starts_rest_timer());
        assert!(!SessionUpdate::SetCompleted(false).starts_rest_timer());
        assert!(!SessionUpdate::SetActualWeight(80.0).starts_rest_timer());
        assert_eq!(SessionUpdate::SetActualReps(Reps::Fixed(8)).column(), "actual_reps");
    }
}
