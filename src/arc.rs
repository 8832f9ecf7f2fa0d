//! Arc interpolation for G02/G03.
//!
//! Circular moves are expanded into short linear chords by angular
//! stepping, so every consumer downstream of the executor only ever sees
//! straight-line planner blocks. Two entry points cover the two ways hosts
//! specify an arc: center offsets (I/J) and signed radius (R). The R form
//! solves for the center and delegates to the I/J form.
//!
//! The final emitted endpoint is always snapped to the exact target so
//! accumulated floating error cannot leave the machine short of the
//! commanded position.

use crate::config::ArcConfig;
use std::f64::consts::PI;
use thiserror::Error;

/// Hard ceiling on chords per arc, independent of configuration.
const MAX_SEGMENTS: u32 = 10_000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArcError {
    #[error("arc radius below minimum")]
    DegenerateRadius,
    #[error("chord is longer than the arc diameter")]
    ChordTooLong,
    #[error("segment sink aborted the arc")]
    Aborted,
}

/// Expand an I/J (center offset) arc.
///
/// The sink is called once per chord endpoint, in travel order; returning
/// `false` aborts the expansion. A start point that coincides with the end
/// point is treated as a full circle.
pub fn generate_ij<F>(
    cfg: &ArcConfig,
    start: (f64, f64),
    end: (f64, f64),
    offset: (f64, f64),
    clockwise: bool,
    mut sink: F,
) -> Result<(), ArcError>
where
    F: FnMut(f64, f64) -> bool,
{
    let (start_x, start_y) = start;
    let (end_x, end_y) = end;
    let center_x = start_x + offset.0;
    let center_y = start_y + offset.1;

    let r_start = ((start_x - center_x).powi(2) + (start_y - center_y).powi(2)).sqrt();
    let r_end = ((end_x - center_x).powi(2) + (end_y - center_y).powi(2)).sqrt();

    // The average absorbs I/J round-off between the two endpoints.
    let radius = 0.5 * (r_start + r_end);
    if radius < cfg.radius_min_mm {
        return Err(ArcError::DegenerateRadius);
    }

    let theta_start = (start_y - center_y).atan2(start_x - center_x);
    let theta_end = (end_y - center_y).atan2(end_x - center_x);

    let mut angular_travel = if clockwise {
        theta_start - theta_end
    } else {
        theta_end - theta_start
    };
    if angular_travel <= 0.0 {
        angular_travel += 2.0 * PI;
    }

    // Coincident endpoints mean a full circle, not a zero-length arc.
    if (end_x - start_x).abs() < cfg.radius_min_mm && (end_y - start_y).abs() < cfg.radius_min_mm {
        angular_travel = 2.0 * PI;
    }

    let arc_length = radius * angular_travel;
    let segments = ((arc_length / cfg.segment_len_mm) as u32).clamp(1, MAX_SEGMENTS);

    let mut theta_step = angular_travel / f64::from(segments);
    if clockwise {
        theta_step = -theta_step;
    }

    let mut theta = theta_start;
    for i in 1..=segments {
        let (seg_x, seg_y) = if i == segments {
            // Snap to the commanded target.
            (end_x, end_y)
        } else {
            theta += theta_step;
            (center_x + radius * theta.cos(), center_y + radius * theta.sin())
        };
        if !sink(seg_x, seg_y) {
            return Err(ArcError::Aborted);
        }
    }

    Ok(())
}

/// Expand a radius-form arc.
///
/// A positive radius selects the minor arc, a negative radius the major
/// arc on the opposite side of the chord.
pub fn generate_r<F>(
    cfg: &ArcConfig,
    start: (f64, f64),
    end: (f64, f64),
    radius: f64,
    clockwise: bool,
    sink: F,
) -> Result<(), ArcError>
where
    F: FnMut(f64, f64) -> bool,
{
    let abs_r = radius.abs();
    if abs_r < cfg.radius_min_mm {
        return Err(ArcError::DegenerateRadius);
    }

    let (start_x, start_y) = start;
    let (end_x, end_y) = end;

    let mid_x = 0.5 * (start_x + end_x);
    let mid_y = 0.5 * (start_y + end_y);

    let dx = end_x - start_x;
    let dy = end_y - start_y;
    let half_chord = 0.5 * (dx * dx + dy * dy).sqrt();

    if half_chord > abs_r {
        return Err(ArcError::ChordTooLong);
    }

    let chord_len = 2.0 * half_chord;
    if chord_len < cfg.radius_min_mm {
        // R form cannot express a full circle; the chord fixes no center.
        return Err(ArcError::DegenerateRadius);
    }

    let h = (abs_r * abs_r - half_chord * half_chord).sqrt();

    // Unit perpendicular, chord direction rotated 90 degrees CCW.
    let perp_x = -dy / chord_len;
    let perp_y = dx / chord_len;

    // Positive R puts the center right of the chord for CW travel, left for
    // CCW; negative R flips to the major arc.
    let mut use_left = !clockwise;
    if radius < 0.0 {
        use_left = !use_left;
    }

    let (center_x, center_y) = if use_left {
        (mid_x + h * perp_x, mid_y + h * perp_y)
    } else {
        (mid_x - h * perp_x, mid_y - h * perp_y)
    };

    let offset = (center_x - start_x, center_y - start_y);
    generate_ij(cfg, start, end, offset, clockwise, sink)
}
