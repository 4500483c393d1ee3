//! A set of mutually non-dominating elements.
//!
//! The set keeps the antichain invariant under a pluggable [`ParetoComparator`]: no contained
//! element dominates another. A "marker" splits the set into elements that existed when the
//! marker was placed and elements added since, which is how a round-based search finds what
//! changed in the previous round.

use std::sync::Arc;

pub trait ParetoComparator<T> {
    /// True if `left` is strictly better than `right` in at least one criterion.
    fn left_dominance_exist(&self, left: &T, right: &T) -> bool;

    /// True if `left` is better in some criterion and worse in none.
    fn dominates(&self, left: &T, right: &T) -> bool {
        self.left_dominance_exist(left, right) && !self.left_dominance_exist(right, left)
    }
}

impl<T, F> ParetoComparator<T> for F
where
    F: Fn(&T, &T) -> bool,
{
    fn left_dominance_exist(&self, left: &T, right: &T) -> bool { self(left, right) }
}

/// Observes a [`ParetoSet`]. Notifications are sent after each decision and cannot change it.
pub trait ParetoSetEventListener<T>: Send + Sync {
    fn notify_element_accepted(&self, _new_element: &T) {}
    fn notify_element_dropped(&self, _element: &T, _dropped_by: &T) {}
    fn notify_element_rejected(&self, _element: &T, _rejected_by: &T) {}
}

pub struct ParetoSet<T, C> {
    elements: Vec<T>,
    comparator: C,
    marker: usize,
    listener: Option<Arc<dyn ParetoSetEventListener<T>>>,
}

impl<T, C: ParetoComparator<T>> ParetoSet<T, C> {
    pub fn new(comparator: C) -> Self {
        Self {
            elements: Vec::new(),
            comparator,
            marker: 0,
            listener: None,
        }
    }

    pub fn with_listener(comparator: C, listener: Option<Arc<dyn ParetoSetEventListener<T>>>) -> Self {
        Self {
            elements: Vec::new(),
            comparator,
            marker: 0,
            listener,
        }
    }

    pub fn comparator(&self) -> &C { &self.comparator }

    pub fn len(&self) -> usize { self.elements.len() }

    pub fn is_empty(&self) -> bool { self.elements.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, T> { self.elements.iter() }

    pub fn as_slice(&self) -> &[T] { &self.elements }

    /// Mutable access for bookkeeping fields. Values the comparator reads must not change.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> { self.elements.iter_mut() }

    pub fn into_vec(self) -> Vec<T> { self.elements }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.marker = 0;
    }

    /// Adds `new_element` unless an existing element dominates it or is equivalent to it.
    /// Existing elements dominated by `new_element` are dropped. Returns true if the set changed.
    pub fn add(&mut self, new_element: T) -> bool {
        let mut mutual_dominance_exist = false;
        let mut equivalent_index = None;

        for (i, element) in self.elements.iter().enumerate() {
            let left_dominance = self.comparator.left_dominance_exist(&new_element, element);
            let right_dominance = self.comparator.left_dominance_exist(element, &new_element);

            match (left_dominance, right_dominance) {
                (true, true) => mutual_dominance_exist = true,
                (true, false) => {
                    self.remove_dominated_and_append(new_element, i);
                    return true;
                }
                (false, true) => {
                    if let Some(listener) = &self.listener {
                        listener.notify_element_rejected(&new_element, element);
                    }
                    return false;
                }
                (false, false) => {
                    equivalent_index.get_or_insert(i);
                }
            }
        }

        match equivalent_index {
            Some(i) => {
                if let Some(listener) = &self.listener {
                    listener.notify_element_rejected(&new_element, &self.elements[i]);
                }
                false
            }
            None => {
                debug_assert!(self.elements.is_empty() || mutual_dominance_exist);
                self.append(new_element);
                true
            }
        }
    }

    /// True if [`Self::add`] would accept `candidate`. The set and its listener are untouched.
    pub fn qualify(&self, candidate: &T) -> bool {
        let mut equivalent = false;
        for element in &self.elements {
            let left_dominance = self.comparator.left_dominance_exist(candidate, element);
            let right_dominance = self.comparator.left_dominance_exist(element, candidate);
            match (left_dominance, right_dominance) {
                (true, false) => return true,
                (false, true) => return false,
                (false, false) => equivalent = true,
                (true, true) => {}
            }
        }
        !equivalent
    }

    pub fn add_all(&mut self, elements: impl IntoIterator<Item = T>) -> bool {
        let mut updated = false;
        for element in elements {
            updated |= self.add(element);
        }
        updated
    }

    /// Elements added after the last call to [`Self::mark_at_end_of_set`] that are still in the set.
    pub fn elements_after_marker(&self) -> &[T] { &self.elements[self.marker..] }

    pub fn has_elements_after_marker(&self) -> bool { self.marker < self.elements.len() }

    pub fn mark_at_end_of_set(&mut self) { self.marker = self.elements.len(); }

    fn append(&mut self, new_element: T) {
        if let Some(listener) = &self.listener {
            listener.notify_element_accepted(&new_element);
        }
        self.elements.push(new_element);
    }

    // The element at `first_dominated` is dominated. Elements before it were not; elements after
    // it still have to be checked.
    fn remove_dominated_and_append(&mut self, new_element: T, first_dominated: usize) {
        let comparator = &self.comparator;
        let listener = &self.listener;
        let marker = self.marker;
        let mut removed_before_marker = 0;
        let mut pos = 0;

        self.elements.retain(|element| {
            let dropped = pos == first_dominated
                || (pos > first_dominated && comparator.dominates(&new_element, element));
            if dropped {
                if let Some(listener) = listener {
                    listener.notify_element_dropped(element, &new_element);
                }
                if pos < marker {
                    removed_before_marker += 1;
                }
            }
            pos += 1;
            !dropped
        });

        self.marker -= removed_before_marker;
        self.append(new_element);
    }
}

impl<'a, T, C> IntoIterator for &'a ParetoSet<T, C> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter { self.elements.iter() }
}
