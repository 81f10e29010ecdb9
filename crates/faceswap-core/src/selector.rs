//! Picking which detected faces take part in a swap.
//!
//! Single-face mode uses a positional rule: the leftmost face in the image.
//! It does not look at detection confidence, size, or identity.

use crate::types::{Face, FaceSet};

/// The face whose box starts furthest left; the first one wins on a tie.
pub fn select_one(faces: &[Face]) -> Option<&Face> {
    let mut selected: Option<&Face> = None;
    for face in faces {
        match selected {
            Some(best) if face.bbox().x_min() >= best.bbox().x_min() => {}
            _ => selected = Some(face),
        }
    }
    selected
}

/// Every face, in detector order.
pub fn select_many(faces: FaceSet) -> FaceSet {
    faces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};

    fn face_at(x: f32, confidence: f32) -> Face {
        Face {
            bbox: BoundingBox {
                x,
                y: 10.0,
                width: 40.0,
                height: 40.0,
                confidence,
                landmarks: None,
            },
            embedding: Embedding {
                values: vec![confidence],
                model_version: None,
            },
        }
    }

    #[test]
    fn test_empty_selects_nothing() {
        assert!(select_one(&[]).is_none());
        assert!(select_many(Vec::new()).is_empty());
    }

    #[test]
    fn test_picks_leftmost_not_most_confident() {
        let faces = vec![face_at(300.0, 0.99), face_at(20.0, 0.51), face_at(150.0, 0.8)];
        let picked = select_one(&faces).unwrap();
        assert_eq!(picked.bbox().x_min(), 20.0);
        assert_eq!(picked.bbox().confidence, 0.51);
    }

    #[test]
    fn test_first_wins_ties() {
        let faces = vec![face_at(50.0, 0.7), face_at(10.0, 0.6), face_at(10.0, 0.9)];
        let picked = select_one(&faces).unwrap();
        assert!(std::ptr::eq(picked, &faces[1]));
    }

    #[test]
    fn test_select_one_is_deterministic() {
        let faces = vec![face_at(5.0, 0.6), face_at(5.0, 0.9), face_at(80.0, 0.95)];
        let first = select_one(&faces).unwrap();
        for _ in 0..10 {
            assert!(std::ptr::eq(select_one(&faces).unwrap(), first));
        }
    }

    #[test]
    fn test_select_many_keeps_detector_order() {
        let faces = vec![face_at(300.0, 0.9), face_at(20.0, 0.8), face_at(150.0, 0.7)];
        let xs: Vec<f32> = select_many(faces).iter().map(|f| f.bbox().x).collect();
        assert_eq!(xs, vec![300.0, 20.0, 150.0]);
    }
}
