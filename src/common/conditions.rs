use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::Utc,
};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

pub fn new_condition(type_: &str, status: bool, reason: &str, message: &str, observed_generation: Option<i64>) -> Condition {
    Condition {
        last_transition_time: Time(Utc::now()),
        message: message.to_owned(),
        observed_generation,
        reason: reason.to_owned(),
        status: if status { CONDITION_TRUE } else { CONDITION_FALSE }.to_owned(),
        type_: type_.to_owned(),
    }
}

/// Equal in every field but the transition time.
pub fn condition_equal(a: &Condition, b: &Condition) -> bool {
    a.type_ == b.type_ && a.status == b.status && a.reason == b.reason && a.message == b.message && a.observed_generation == b.observed_generation
}

pub fn conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| condition_equal(a, b))
}

/// Merges a condition into a list keyed by type. Returns true when the list changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if condition_equal(existing, &condition) => false,
        Some(existing) => {
            *existing = condition;
            true
        },
        None => {
            conditions.push(condition);
            true
        },
    }
}

/// Replaces a list of conditions only when it differs ignoring transition times, carrying over
/// the previous transition time for conditions whose status did not flip.
pub fn merge_conditions(existing: &[Condition], mut updated: Vec<Condition>) -> Option<Vec<Condition>> {
    if conditions_equal(existing, &updated) {
        return None;
    }
    for condition in &mut updated {
        if let Some(previous) = existing.iter().find(|c| c.type_ == condition.type_ && c.status == condition.status) {
            condition.last_transition_time = previous.last_transition_time.clone();
        }
    }
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition() {
        let mut conditions = vec![];
        assert!(set_condition(&mut conditions, new_condition("Accepted", true, "Accepted", "accepted", Some(1))));
        assert!(!set_condition(&mut conditions, new_condition("Accepted", true, "Accepted", "accepted", Some(1))));
        assert!(set_condition(&mut conditions, new_condition("Accepted", true, "Accepted", "accepted", Some(2))));
        assert!(set_condition(&mut conditions, new_condition("ResolvedRefs", false, "RefNotPermitted", "nope", Some(2))));
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn test_merge_conditions_ignores_transition_time() {
        let existing = vec![new_condition("Programmed", true, "Programmed", "ok", Some(1))];
        let mut updated = existing.clone();
        updated[0].last_transition_time = Time(Utc::now() + k8s_openapi::chrono::Duration::seconds(30));
        assert!(merge_conditions(&existing, updated).is_none());

        let merged = merge_conditions(&existing, vec![new_condition("Programmed", true, "Programmed", "ok", Some(2))]).unwrap();
        assert_eq!(merged[0].last_transition_time, existing[0].last_transition_time);
    }
}
