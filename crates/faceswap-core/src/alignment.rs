//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical square crop using the five
//! InsightFace reference landmarks and least-squares estimation. The same
//! transform is inverted to paste a processed crop back into its frame.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// A face warped into a square canonical crop, plus the frame→crop transform.
pub struct AlignedFace {
    pub image: RgbImage,
    /// Row-major 2×3 affine matrix mapping frame coordinates to crop coordinates.
    pub matrix: [f32; 6],
}

/// Reference landmarks scaled for a `size`×`size` crop.
///
/// Multiples of 112 scale the ArcFace template directly. Other sizes use the
/// 128-based layout, which shifts the template 8 px right (per 128 px).
pub fn reference_landmarks(size: usize) -> [(f32, f32); 5] {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4]; // 4x1

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // fallback: identity-ish
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Invert a general 2×3 affine matrix. `None` if it is singular.
pub fn invert_affine(m: &[f32; 6]) -> Option<[f32; 6]> {
    let det = m[0] * m[4] - m[1] * m[3];
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let ia = m[4] * inv_det;
    let ib = -m[1] * inv_det;
    let id = -m[3] * inv_det;
    let ie = m[0] * inv_det;
    Some([
        ia,
        ib,
        -(ia * m[2] + ib * m[5]),
        id,
        ie,
        -(id * m[2] + ie * m[5]),
    ])
}

/// Map a point through a 2×3 affine matrix.
#[inline]
pub fn apply_affine(m: &[f32; 6], x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Bilinear sample with a zero border.
///
/// Returns the interpolated RGB value and the in-bounds coverage in [0, 1]
/// (the weight that fell on real pixels rather than the border).
pub fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> ([f32; 3], f32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x0 = sx.floor() as i32;
    let y0 = sy.floor() as i32;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let mut rgb = [0.0f32; 3];
    let mut coverage = 0.0f32;
    for (dx, dy, weight) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        let (x, y) = (x0 + dx, y0 + dy);
        if weight <= 0.0 || x < 0 || x >= w || y < 0 || y >= h {
            continue;
        }
        let p = image.get_pixel(x as u32, y as u32);
        for c in 0..3 {
            rgb[c] += p[c] as f32 * weight;
        }
        coverage += weight;
    }

    (rgb, coverage)
}

/// Apply a 2×3 affine warp to produce a square `out_size` crop.
///
/// `matrix` maps source coordinates to output coordinates; it is inverted to
/// sample. Uses bilinear interpolation. Out-of-bounds pixels are black.
pub fn warp_affine(frame: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let Some(inverse) = invert_affine(matrix) else {
        return RgbImage::new(out_size, out_size);
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let (sx, sy) = apply_affine(&inverse, ox as f32, oy as f32);
        let (rgb, _) = sample_bilinear(frame, sx, sy);
        Rgb(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}

/// Align a detected face to a canonical `size`×`size` crop.
///
/// Computes the similarity transform from the five detected landmarks to the
/// reference positions and warps the face region into the crop. 112 yields
/// the ArcFace recognition input, 128 the inswapper input.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5], size: u32) -> AlignedFace {
    let reference = reference_landmarks(size as usize);
    let matrix = estimate_similarity_transform(landmarks, &reference);
    let image = warp_affine(frame, &matrix, size);
    AlignedFace { image, matrix }
}
