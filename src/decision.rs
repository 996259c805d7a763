//! Frame-level alert decisions.
//!
//! A rule looks at the detections of one frame and says whether the frame is
//! an alert and which detections triggered it. Rules are pluggable; the ones
//! here are simple thresholds, not a model of shoplifting behavior.

use crate::detect::Detection;

/// Verdict for a single frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameVerdict {
    pub alert: bool,
    /// Indices into the frame's detection list that satisfied the rule.
    pub triggers: Vec<usize>,
}

impl FrameVerdict {
    pub fn normal() -> Self {
        Self::default()
    }

    pub fn is_trigger(&self, index: usize) -> bool {
        self.triggers.contains(&index)
    }
}

pub trait DecisionRule: Send {
    fn name(&self) -> &'static str;

    /// Whether one detection, on its own, satisfies the alert predicate.
    fn qualifies(&self, detection: &Detection) -> bool;

    /// Frame verdict. The default is a logical OR over `qualifies`.
    fn classify(&self, detections: &[Detection]) -> FrameVerdict {
        let triggers: Vec<usize> = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| self.qualifies(d))
            .map(|(i, _)| i)
            .collect();
        FrameVerdict {
            alert: !triggers.is_empty(),
            triggers,
        }
    }
}

/// Alert when any detection of `alert_class` scores strictly above `threshold`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlertClassRule {
    pub alert_class: u32,
    pub threshold: f32,
}

impl AlertClassRule {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new(alert_class: u32, threshold: f32) -> Self {
        Self {
            alert_class,
            threshold,
        }
    }
}

impl DecisionRule for AlertClassRule {
    fn name(&self) -> &'static str {
        "alert_class"
    }

    fn qualifies(&self, detection: &Detection) -> bool {
        detection.class_id() == self.alert_class && detection.confidence() > self.threshold
    }
}

/// Alert when more than `min_count` people score strictly above `threshold`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PersonCountRule {
    pub person_class: u32,
    pub threshold: f32,
    pub min_count: usize,
}

impl PersonCountRule {
    pub fn new(person_class: u32, threshold: f32, min_count: usize) -> Self {
        Self {
            person_class,
            threshold,
            min_count,
        }
    }
}

impl DecisionRule for PersonCountRule {
    fn name(&self) -> &'static str {
        "person_count"
    }

    fn qualifies(&self, detection: &Detection) -> bool {
        detection.class_id() == self.person_class && detection.confidence() > self.threshold
    }

    fn classify(&self, detections: &[Detection]) -> FrameVerdict {
        let people: Vec<usize> = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| self.qualifies(d))
            .map(|(i, _)| i)
            .collect();
        if people.len() > self.min_count {
            FrameVerdict {
                alert: true,
                triggers: people,
            }
        } else {
            FrameVerdict::normal()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection::new(0.0, 0.0, 10.0, 10.0, class_id, confidence).unwrap()
    }

    #[test]
    fn threshold_is_strict() {
        let rule = AlertClassRule::new(1, 0.5);
        assert!(!rule.classify(&[det(1, 0.5)]).alert);
        assert!(rule.classify(&[det(1, 0.500_001)]).alert);
        assert!(!rule.classify(&[det(1, 0.49)]).alert);
    }

    #[test]
    fn strict_threshold_holds_across_confidence_range() {
        let rule = AlertClassRule::new(1, 0.52);
        for step in 0..=100 {
            let c = step as f32 / 100.0;
            let verdict = rule.classify(&[det(1, c)]);
            assert_eq!(verdict.alert, c > 0.52, "confidence {}", c);
        }
    }

    #[test]
    fn other_classes_never_alert() {
        let rule = AlertClassRule::new(1, 0.5);
        let verdict = rule.classify(&[det(0, 0.99), det(2, 0.99)]);
        assert_eq!(verdict, FrameVerdict::normal());
    }

    #[test]
    fn verdict_is_or_over_detections() {
        let rule = AlertClassRule::new(1, 0.5);
        let verdict = rule.classify(&[det(1, 0.9), det(0, 0.9), det(1, 0.3), det(1, 0.7)]);
        assert!(verdict.alert);
        assert_eq!(verdict.triggers, vec![0, 3]);
        assert!(verdict.is_trigger(3));
        assert!(!verdict.is_trigger(1));
    }

    #[test]
    fn empty_frame_is_normal() {
        assert_eq!(AlertClassRule::new(1, 0.5).classify(&[]), FrameVerdict::normal());
    }

    #[test]
    fn person_count_needs_more_than_min_count() {
        let rule = PersonCountRule::new(0, 0.5, 1);
        assert!(!rule.classify(&[det(0, 0.9)]).alert);

        let verdict = rule.classify(&[det(0, 0.9), det(0, 0.6), det(0, 0.4)]);
        assert!(verdict.alert);
        assert_eq!(verdict.triggers, vec![0, 1]);
    }
}
