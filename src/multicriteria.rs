use std::fmt;
use std::sync::Arc;

use arrayvec::ArrayVec;

use crate::network::{Cost, Timestamp};
use crate::pareto::ParetoComparator;

/// Relaxes a cost before it is compared: `relax(v) = round(v * ratio) + slack`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelaxFunction {
    pub ratio: f64,
    pub slack: i32,
}

impl RelaxFunction {
    pub const NORMAL: RelaxFunction = RelaxFunction { ratio: 1.0, slack: 0 };

    pub fn new(ratio: f64, slack: i32) -> Self {
        assert!(ratio >= 1.0, "Relax ratio must be at least 1.0, was {ratio}.");
        assert!(slack >= 0, "Relax slack must not be negative, was {slack}.");
        Self { ratio, slack }
    }

    pub fn relax(&self, value: i64) -> i64 { (value as f64 * self.ratio).round() as i64 + self.slack as i64 }

    pub fn is_normal(&self) -> bool { *self == Self::NORMAL }
}

impl Default for RelaxFunction {
    fn default() -> Self { Self::NORMAL }
}

pub type CustomDominance = Arc<dyn Fn(i64, i64) -> bool + Send + Sync>;

/// Decides whether the left value of a single criterion is strictly better than the right one.
#[derive(Clone)]
pub enum DominanceFunction {
    LessThan,
    GreaterThan,
    /// The criterion never decides dominance.
    Ignore,
    /// Bitmask of priority groups: left dominates if right contains a group left lacks.
    GroupPriority,
    /// Less-than against the relaxed right value.
    Relaxed(RelaxFunction),
    Custom(CustomDominance),
}

impl DominanceFunction {
    pub fn left_dominate_right(&self, left: i64, right: i64) -> bool {
        match self {
            Self::LessThan => left < right,
            Self::GreaterThan => left > right,
            Self::Ignore => false,
            Self::GroupPriority => group_priority_dominates(left as u32, right as u32),
            Self::Relaxed(relax) => left < relax.relax(right),
            Self::Custom(f) => f(left, right),
        }
    }
}

impl fmt::Debug for DominanceFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LessThan => write!(f, "LessThan"),
            Self::GreaterThan => write!(f, "GreaterThan"),
            Self::Ignore => write!(f, "Ignore"),
            Self::GroupPriority => write!(f, "GroupPriority"),
            Self::Relaxed(relax) => write!(f, "Relaxed({}, {})", relax.ratio, relax.slack),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

pub fn group_priority_dominates(left: u32, right: u32) -> bool { (right & !left) != 0 }

pub const MAX_CRITERIA: usize = 6;

/// A comparator composed of up to [`MAX_CRITERIA`] criteria, each an integer projection of the
/// value and a dominance function for it.
pub struct ParetoCriteria<T> {
    criteria: ArrayVec<(fn(&T) -> i64, DominanceFunction), MAX_CRITERIA>,
}

impl<T> ParetoCriteria<T> {
    pub fn new() -> Self { Self { criteria: ArrayVec::new() } }

    pub fn with(mut self, value: fn(&T) -> i64, dominance: DominanceFunction) -> Self {
        self.criteria.push((value, dominance));
        self
    }

    pub fn len(&self) -> usize { self.criteria.len() }

    pub fn is_empty(&self) -> bool { self.criteria.is_empty() }
}

impl<T> Default for ParetoCriteria<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Clone for ParetoCriteria<T> {
    fn clone(&self) -> Self { Self { criteria: self.criteria.clone() } }
}

impl<T> ParetoComparator<T> for ParetoCriteria<T> {
    fn left_dominance_exist(&self, left: &T, right: &T) -> bool {
        self.criteria.iter().any(|(value, dominance)| dominance.left_dominate_right(value(left), value(right)))
    }
}

/// Merges and compares the priority groups collected along a journey.
pub trait GroupPriorityCalculator: Send + Sync {
    fn merge_group_ids(&self, current: u32, boarding: u32) -> u32 { current | boarding }

    fn dominance_function(&self) -> DominanceFunction { DominanceFunction::GroupPriority }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BitwiseGroupPriority;

impl GroupPriorityCalculator for BitwiseGroupPriority {}

/// Generalized cost of a journey, accumulated while riding and waiting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeneralizedCostCalculator {
    pub board_cost: Cost,
    pub transfer_cost: Cost,
    pub wait_reluctance: f64,
    pub transit_reluctance: f64,
}

impl Default for GeneralizedCostCalculator {
    fn default() -> Self {
        Self {
            board_cost: 60,
            transfer_cost: 0,
            wait_reluctance: 1.0,
            transit_reluctance: 1.0,
        }
    }
}

impl GeneralizedCostCalculator {
    /// Cost of boarding after `wait_time` seconds at the stop. Every boarding after the first
    /// also pays the transfer cost.
    pub fn boarding_cost(&self, first_boarding: bool, wait_time: Timestamp) -> Cost {
        let transfer_cost = if first_boarding { 0 } else { self.transfer_cost };
        self.board_cost + transfer_cost + Self::scale(self.wait_reluctance, wait_time)
    }

    pub fn transit_cost(&self, ride_time: Timestamp) -> Cost { Self::scale(self.transit_reluctance, ride_time) }

    fn scale(factor: f64, time: Timestamp) -> Cost { (factor * time as f64).round() as Cost }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 4;
    const AB: i64 = A | B;
    const AC: i64 = A | C;

    #[test]
    fn group_priority_literal_cases() {
        let f = BitwiseGroupPriority.dominance_function();
        assert!(f.left_dominate_right(A, B));
        assert!(f.left_dominate_right(B, A));
        assert!(!f.left_dominate_right(A, A));
        assert!(f.left_dominate_right(A, AB));
        assert!(!f.left_dominate_right(AB, A));
        assert!(!f.left_dominate_right(AB, AB));
        assert!(f.left_dominate_right(AB, AC));
        assert!(f.left_dominate_right(AC, AB));
    }

    #[test]
    fn group_ids_merge_as_union() {
        assert_eq!(BitwiseGroupPriority.merge_group_ids(A as u32, B as u32), AB as u32);
        assert_eq!(BitwiseGroupPriority.merge_group_ids(AB as u32, A as u32), AB as u32);
    }

    #[test]
    fn relaxed_cost() {
        let relax = RelaxFunction::new(1.25, 300);
        assert_eq!(relax.relax(1000), 1550);

        let f = DominanceFunction::Relaxed(relax);
        assert!(f.left_dominate_right(1549, 1000));
        assert!(!f.left_dominate_right(1550, 1000));
        assert!(RelaxFunction::default().is_normal());
    }

    #[derive(Clone, Copy)]
    struct Label {
        time: i32,
        cost: i32,
        tag: i32,
    }

    #[test]
    fn criteria_compose() {
        let criteria = ParetoCriteria::new()
            .with(|l: &Label| l.time as i64, DominanceFunction::LessThan)
            .with(|l: &Label| l.cost as i64, DominanceFunction::LessThan)
            .with(|l: &Label| l.tag as i64, DominanceFunction::Ignore);
        assert_eq!(criteria.len(), 3);

        let fast = Label { time: 10, cost: 20, tag: 0 };
        let cheap = Label { time: 20, cost: 10, tag: 1 };
        let worse = Label { time: 20, cost: 20, tag: 2 };

        assert!(criteria.dominates(&fast, &worse));
        assert!(!criteria.dominates(&fast, &cheap));
        assert!(!criteria.dominates(&cheap, &fast));
        assert!(!criteria.left_dominance_exist(&worse, &Label { tag: 9, ..worse }));
    }

    #[test]
    fn custom_dominance() {
        let within_minute = DominanceFunction::Custom(Arc::new(|l, r| l + 60 <= r));
        assert!(within_minute.left_dominate_right(0, 60));
        assert!(!within_minute.left_dominate_right(1, 60));
    }

    #[test]
    fn generalized_cost() {
        let calc = GeneralizedCostCalculator {
            board_cost: 100,
            transfer_cost: 50,
            wait_reluctance: 0.5,
            transit_reluctance: 1.5,
        };
        assert_eq!(calc.boarding_cost(true, 120), 160);
        assert_eq!(calc.boarding_cost(false, 120), 210);
        assert_eq!(calc.transit_cost(600), 900);
    }
}
