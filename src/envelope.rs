//! Bone envelope falloff math.
//!
//! An envelope is a capsule around the bone segment: a core region with
//! full influence and a falloff shell where influence fades quadratically
//! to zero.

use crate::math::Vec3;

/// Falloff for a squared distance to a bone, given the closest capsule
/// radius and the falloff shell thickness.
///
/// Returns `1.0` inside the core radius and `0.0` at or beyond
/// `closest_radius + falloff_distance`. A zero `falloff_distance` turns
/// the envelope into a hard step at the core radius.
pub fn bone_envelope_falloff(
    distance_squared: f32,
    closest_radius: f32,
    falloff_distance: f32,
) -> f32 {
    if distance_squared < closest_radius * closest_radius {
        return 1.0;
    }

    let outer = closest_radius + falloff_distance;
    if falloff_distance == 0.0 || distance_squared >= outer * outer {
        return 0.0;
    }

    let overshoot = distance_squared.sqrt() - closest_radius;
    1.0 - (overshoot * overshoot) / (falloff_distance * falloff_distance)
}

/// Envelope influence of a bone segment on a point, in [0, 1].
///
/// The point is projected onto the head-tail segment. Before the head the
/// distance to the head and the head radius apply; past the tail, the tail
/// equivalents; in between, the perpendicular distance and a radius
/// interpolated along the bone. Zero-length bones use the head radius.
pub fn distance_factor_to_bone(
    pos: &Vec3,
    head: &Vec3,
    tail: &Vec3,
    radius_head: f32,
    radius_tail: f32,
    falloff_distance: f32,
) -> f32 {
    let mut axis = tail - head;
    let length = axis.norm();
    if length != 0.0 {
        axis /= length;
    }

    let delta = pos - head;
    let along = axis.dot(&delta);
    let head_dist_sq = delta.norm_squared();

    let (dist_sq, radius) = if along < 0.0 {
        (head_dist_sq, radius_head)
    } else if along > length {
        ((pos - tail).norm_squared(), radius_tail)
    } else {
        let dist_sq = head_dist_sq - along * along;
        let radius = if length != 0.0 {
            let t = along / length;
            t * radius_tail + (1.0 - t) * radius_head
        } else {
            radius_head
        };
        (dist_sq, radius)
    };

    bone_envelope_falloff(dist_sq, radius, falloff_distance)
}
