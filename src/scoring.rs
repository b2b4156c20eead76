//! Caller-supplied scoring strategies.
//!
//! Actors never look inside these; they only call them. Plain closures with
//! the matching signature implement both traits.

use std::sync::Arc;

use crate::types::Attributes;

/// Ranks a vacant resource during search. Higher is better.
pub trait Utility: Send + Sync {
    fn score(&self, attributes: &Attributes) -> f64;
}

impl<F> Utility for F
where
    F: Fn(&Attributes) -> f64 + Send + Sync,
{
    fn score(&self, attributes: &Attributes) -> f64 {
        self(attributes)
    }
}

/// Rates the held resource after `dwell_ticks` ticks. Negative means the
/// actor goes looking for something better.
pub trait Satisfaction: Send + Sync {
    fn score(&self, attributes: &Attributes, dwell_ticks: u64) -> f64;
}

impl<F> Satisfaction for F
where
    F: Fn(&Attributes, u64) -> f64 + Send + Sync,
{
    fn score(&self, attributes: &Attributes, dwell_ticks: u64) -> f64 {
        self(attributes, dwell_ticks)
    }
}

pub type SharedUtility = Arc<dyn Utility>;
pub type SharedSatisfaction = Arc<dyn Satisfaction>;

/// Utility equal to one named attribute; missing attributes score 0.
pub fn by_attribute(name: impl Into<String>) -> SharedUtility {
    let name = name.into();
    Arc::new(move |attributes: &Attributes| attributes.get(&name).copied().unwrap_or(0.0))
}

/// Satisfaction that ignores its inputs.
pub fn constant(value: f64) -> SharedSatisfaction {
    Arc::new(move |_: &Attributes, _: u64| value)
}

/// Satisfied for the first `ticks` ticks of a holding, dissatisfied after.
pub fn patience(ticks: u64) -> SharedSatisfaction {
    Arc::new(move |_: &Attributes, dwell_ticks: u64| {
        if dwell_ticks < ticks { 1.0 } else { -1.0 }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::attributes;

    #[test]
    fn test_by_attribute() {
        let utility = by_attribute("quality");
        assert_eq!(utility.score(&attributes([("quality", 0.7)])), 0.7);
        assert_eq!(utility.score(&Attributes::new()), 0.0);
    }

    #[test]
    fn test_patience_turns_negative() {
        let satisfaction = patience(2);
        let attrs = Attributes::new();
        assert!(satisfaction.score(&attrs, 0) >= 0.0);
        assert!(satisfaction.score(&attrs, 1) >= 0.0);
        assert!(satisfaction.score(&attrs, 2) < 0.0);
    }

    #[test]
    fn test_closures_are_strategies() {
        let utility: SharedUtility =
            Arc::new(|a: &Attributes| a.values().sum::<f64>());
        assert_eq!(utility.score(&attributes([("a", 1.0), ("b", 2.0)])), 3.0);
        assert_eq!(constant(-0.5).score(&Attributes::new(), 10), -0.5);
    }
}
