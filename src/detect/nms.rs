use crate::detect::result::Detection;

/// Per-class non-maximum suppression, in place.
///
/// Keeps the highest-confidence box of every overlapping group; boxes of
/// different classes never suppress each other. Output is sorted by
/// descending confidence.
pub fn non_max_suppression(boxes: &mut Vec<Detection>, iou_threshold: f32) {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut current_index = 0;
    for index in 0..boxes.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if boxes[prev_index].class != boxes[index].class {
                continue;
            }
            if boxes[prev_index].bbox.iou(&boxes[index].bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            boxes.swap(current_index, index);
            current_index += 1;
        }
    }
    boxes.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, TrafficClass};

    fn det(x1: i32, conf: f32, class: TrafficClass) -> Detection {
        Detection::new(BoundingBox::new(x1, 0, x1 + 100, 100), conf, class)
    }

    #[test]
    fn keeps_best_of_overlapping_group() {
        let mut boxes = vec![
            det(0, 0.6, TrafficClass::Car),
            det(5, 0.9, TrafficClass::Car),
            det(300, 0.4, TrafficClass::Car),
        ];
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].bbox.x1, 5);
        assert_eq!(boxes[1].bbox.x1, 300);
    }

    #[test]
    fn classes_do_not_suppress_each_other() {
        let mut boxes = vec![
            det(0, 0.8, TrafficClass::Car),
            det(0, 0.7, TrafficClass::Truck),
        ];
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn empty_input_stays_empty() {
        let mut boxes = Vec::new();
        non_max_suppression(&mut boxes, 0.45);
        assert!(boxes.is_empty());
    }
}
