//! Greedy non-max suppression.
//!
//! Highest-score-first elimination: when two boxes overlap at or above the
//! IoU threshold, the higher-confidence box survives and the lower is
//! discarded regardless of class. The model in this system is
//! single-class, so cross-class suppression never loses information.

use std::cmp::Ordering;

use super::result::Detection;

/// Suppress overlapping detections in place, keeping NMS output order
/// (confidence-descending).
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let mut drop = false;
        for prev in 0..kept {
            if detections[prev].iou(&detections[index]) >= iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            class_id: 0,
            confidence,
            x,
            y,
            w,
            h,
        }
    }

    #[test]
    fn higher_confidence_box_survives_overlap() {
        // IoU 0.6, above the 0.4 threshold: only the 0.9 box survives.
        let mut detections = vec![
            candidate(0.7, 0.0, 25.0, 100.0, 100.0),
            candidate(0.9, 0.0, 0.0, 100.0, 100.0),
        ];
        non_max_suppression(&mut detections, 0.4);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.9);
    }

    #[test]
    fn disjoint_boxes_all_survive_in_confidence_order() {
        let mut detections = vec![
            candidate(0.6, 300.0, 300.0, 40.0, 40.0),
            candidate(0.95, 0.0, 0.0, 40.0, 40.0),
            candidate(0.8, 150.0, 150.0, 40.0, 40.0),
        ];
        non_max_suppression(&mut detections, 0.4);

        let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.8, 0.6]);
    }

    #[test]
    fn suppression_is_class_agnostic() {
        let mut detections = vec![
            candidate(0.9, 0.0, 0.0, 100.0, 100.0),
            Detection {
                class_id: 7,
                confidence: 0.7,
                x: 0.0,
                y: 25.0,
                w: 100.0,
                h: 100.0,
            },
        ];
        non_max_suppression(&mut detections, 0.4);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
    }

    #[test]
    fn chain_of_overlaps_collapses_to_anchors() {
        // b overlaps a, c overlaps b but not a: a suppresses b, c survives.
        let mut detections = vec![
            candidate(0.9, 0.0, 0.0, 100.0, 100.0),
            candidate(0.8, 0.0, 30.0, 100.0, 100.0),
            candidate(0.7, 0.0, 95.0, 100.0, 100.0),
        ];
        non_max_suppression(&mut detections, 0.4);

        let survivors: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(survivors, vec![0.9, 0.7]);
    }
}
