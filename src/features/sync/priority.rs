//! Delivery priority derived from clinical urgency.
//!
//! Lower numbers are more urgent: 1 is the most urgent tier, 3 the least.

use serde::{Deserialize, Serialize};

use super::record::TriageLevel;

/// Delivery priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Most urgent tier.
    pub const URGENT: Self = Self(1);
    /// Middle tier.
    pub const ELEVATED: Self = Self(2);
    /// Least urgent tier.
    pub const ROUTINE: Self = Self(3);

    /// Build a priority, clamping into `1..=3`.
    #[must_use]
    pub fn new(value: i64) -> Self {
        // Clamped into 1..=3, so the narrowing is lossless
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(value.clamp(1, 3) as u8)
    }

    /// Numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// One tier more urgent, saturating at [`Priority::URGENT`].
    #[must_use]
    pub const fn escalated(self) -> Self {
        if self.0 > 1 {
            Self(self.0 - 1)
        } else {
            Self::URGENT
        }
    }

    /// The more urgent of two priorities.
    #[must_use]
    pub fn most_urgent(self, other: Self) -> Self {
        self.min(other)
    }

    /// Whether this is the most urgent tier.
    #[must_use]
    pub const fn is_urgent(self) -> bool {
        self.0 == 1
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::ROUTINE
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Map clinical metadata to a delivery priority.
///
/// Immediate triage or any recommended emergency action is most urgent.
/// Missing triage is treated as routine rather than rejected.
#[must_use]
pub const fn classify(triage: Option<TriageLevel>, emergency_actions_present: bool) -> Priority {
    match (triage, emergency_actions_present) {
        (Some(TriageLevel::Immediate), _) | (_, true) => Priority::URGENT,
        (Some(TriageLevel::Delayed), false) => Priority::ELEVATED,
        (Some(TriageLevel::Minor | TriageLevel::Expectant) | None, false) => Priority::ROUTINE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_triage_levels() {
        assert_eq!(classify(Some(TriageLevel::Immediate), false), Priority::URGENT);
        assert_eq!(classify(Some(TriageLevel::Delayed), false), Priority::ELEVATED);
        assert_eq!(classify(Some(TriageLevel::Minor), false), Priority::ROUTINE);
        assert_eq!(classify(Some(TriageLevel::Expectant), false), Priority::ROUTINE);
        assert_eq!(classify(None, false), Priority::ROUTINE);
    }

    #[test]
    fn test_emergency_actions_override() {
        assert_eq!(classify(Some(TriageLevel::Minor), true), Priority::URGENT);
        assert_eq!(classify(Some(TriageLevel::Delayed), true), Priority::URGENT);
        assert_eq!(classify(None, true), Priority::URGENT);
    }

    #[test]
    fn test_escalation_saturates() {
        assert_eq!(Priority::ROUTINE.escalated(), Priority::ELEVATED);
        assert_eq!(Priority::ELEVATED.escalated(), Priority::URGENT);
        assert_eq!(Priority::URGENT.escalated(), Priority::URGENT);
    }

    #[test]
    fn test_new_clamps() {
        assert_eq!(Priority::new(0), Priority::URGENT);
        assert_eq!(Priority::new(2), Priority::ELEVATED);
        assert_eq!(Priority::new(9), Priority::ROUTINE);
    }

    #[test]
    fn test_most_urgent() {
        assert_eq!(Priority::ROUTINE.most_urgent(Priority::ELEVATED), Priority::ELEVATED);
        assert_eq!(Priority::URGENT.most_urgent(Priority::ROUTINE), Priority::URGENT);
        assert!(Priority::URGENT < Priority::ROUTINE);
    }
}
