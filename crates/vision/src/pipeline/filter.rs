use std::collections::HashSet;

use ml_core::Detection;

/// Post-processing applied to raw detector output before it is published.
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    pub confidence_threshold: f32,
    /// Class names to keep. Empty keeps every class.
    pub classes: HashSet<String>,
    pub max_detections: usize,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.0,
            classes: HashSet::new(),
            max_detections: usize::MAX,
        }
    }
}

impl DetectionFilter {
    pub fn new(
        confidence_threshold: f32,
        classes: impl IntoIterator<Item = String>,
        max_detections: usize,
    ) -> Self {
        Self {
            confidence_threshold,
            classes: classes.into_iter().collect(),
            max_detections,
        }
    }

    /// Drop low-confidence and unwanted classes, then cap the count. Detector
    /// order is preserved.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|det| det.confidence >= self.confidence_threshold)
            .filter(|det| self.classes.is_empty() || self.classes.contains(&det.class_name))
            .take(self.max_detections)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ml_core::{BoundingBox, ClassTable};

    use super::*;

    fn det(class_id: usize, confidence: f32) -> Detection {
        Detection::new(
            class_id,
            confidence,
            BoundingBox::new(0, 0, 4, 4),
            &ClassTable::default(),
        )
    }

    #[test]
    fn default_keeps_everything() {
        let input = vec![det(0, 0.0), det(7, 0.3), det(99, 1.0)];
        assert_eq!(DetectionFilter::default().apply(input.clone()), input);
    }

    #[test]
    fn threshold_class_and_cap_preserve_order() {
        let filter = DetectionFilter::new(0.5, ["person".to_string(), "book".to_string()], 2);
        let out = filter.apply(vec![
            det(4, 0.9),
            det(0, 0.4),
            det(1, 0.95),
            det(0, 0.6),
            det(4, 0.7),
        ]);
        let names: Vec<_> = out.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["book", "person"]);
        assert_eq!(out[1].confidence, 0.6);
    }
}
