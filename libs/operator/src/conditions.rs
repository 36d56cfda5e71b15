//! Shared condition bookkeeping for `Model` and `InferenceService`: sets
//! `observedGeneration` on every write (spec.md §6) and only bumps
//! `lastTransitionTime` when a condition's `status` actually flips, rather
//! than on every reconcile that happens to touch it.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub fn status_str(ok: bool) -> &'static str {
    if ok {
        "True"
    } else {
        "False"
    }
}

/// Insert or update `type_` in `conditions`, preserving `lastTransitionTime`
/// when the boolean `status` hasn't changed since the previous write.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    ok: bool,
    reason: &str,
    message: &str,
    observed_generation: i64,
) {
    let now = Time(Utc::now());
    let new_status = status_str(ok).to_owned();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != new_status {
            existing.last_transition_time = now;
        }
        existing.status = new_status;
        existing.reason = reason.to_owned();
        existing.message = message.to_owned();
        existing.observed_generation = Some(observed_generation);
        return;
    }

    conditions.push(Condition {
        type_: type_.to_owned(),
        status: new_status,
        reason: reason.to_owned(),
        message: message.to_owned(),
        last_transition_time: now,
        observed_generation: Some(observed_generation),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_condition_is_appended() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Available", true, "Ready", "ok", 1);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "True");
        assert_eq!(conditions[0].observed_generation, Some(1));
    }

    #[test]
    fn unchanged_status_preserves_transition_time() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Available", true, "Ready", "ok", 1);
        let first_transition = conditions[0].last_transition_time.clone();

        std::thread::sleep(std::time::Duration::from_millis(5));
        set_condition(&mut conditions, "Available", true, "Ready", "still ok", 2);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first_transition);
        assert_eq!(conditions[0].message, "still ok");
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn flipped_status_bumps_transition_time() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Available", true, "Ready", "ok", 1);
        let first_transition = conditions[0].last_transition_time.clone();

        std::thread::sleep(std::time::Duration::from_millis(5));
        set_condition(&mut conditions, "Available", false, "Degraded", "down", 1);

        assert_eq!(conditions[0].status, "False");
        assert_ne!(conditions[0].last_transition_time, first_transition);
    }
}
