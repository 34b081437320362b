//! Per-vertex contribution accumulation.
//!
//! One [`Accumulator`] lives for one vertex: bone contributions are added
//! in either linear or dual-quaternion form, and the driver in the parent
//! module normalizes and applies the blended result.

use crate::armature::{BBoneSegments, PoseChannel};
use crate::envelope::distance_factor_to_bone;
use crate::math::{DualQuat, Mat3, Mat4, Vec3, mat3_from_mat4, transform_point};

/// Blend state of a single vertex. The variant is fixed for a whole batch
/// by the quaternion flag; every vertex starts from a fresh accumulator.
pub(super) enum Accumulator {
    Linear {
        /// Weighted sum of per-bone displacements.
        offset: Vec3,
        /// Weighted sum of the linear parts, when the caller wants
        /// deformation matrices.
        matrix: Option<Mat3>,
    },
    DualQuat {
        sum: DualQuat,
        /// Carry blended scale matrices through the pivot correction.
        keep_scale: bool,
    },
}

impl Accumulator {
    pub(super) fn new(use_quaternion: bool, full_deform: bool) -> Self {
        if use_quaternion {
            Self::DualQuat {
                sum: DualQuat::zero(),
                keep_scale: full_deform,
            }
        } else {
            Self::Linear {
                offset: Vec3::zeros(),
                matrix: full_deform.then(Mat3::zeros),
            }
        }
    }

    /// Add one weighted transform, evaluated at `co`.
    fn add(&mut self, dq: &DualQuat, matrix: &Mat4, co: &Vec3, weight: f32) {
        if weight == 0.0 {
            return;
        }

        match self {
            Self::DualQuat { sum, keep_scale } => {
                sum.add_weighted_pivot(dq, co, weight, *keep_scale);
            }
            Self::Linear { offset, matrix: linear } => {
                *offset += (transform_point(matrix, *co) - co) * weight;
                if let Some(linear) = linear {
                    *linear += mat3_from_mat4(matrix) * weight;
                }
            }
        }
    }
}

/// Add one bone's influence at weight `weight`, routing through the B-Bone
/// segment pair when the channel carries matching segment runtime.
pub(super) fn accumulate_channel(
    acc: &mut Accumulator,
    channel: &PoseChannel,
    co: &Vec3,
    weight: f32,
    contribution: &mut f32,
) {
    if weight == 0.0 {
        return;
    }

    if let Some(bbone) = channel.bbone_active() {
        accumulate_bbone(acc, bbone, channel.bone.length, co, weight);
    } else {
        acc.add(&channel.dual_quat, &channel.matrix, co, weight);
    }

    *contribution += weight;
}

/// Blend the two B-Bone nodes bracketing `co` along the bone axis.
fn accumulate_bbone(
    acc: &mut Accumulator,
    bbone: &BBoneSegments,
    bone_length: f32,
    co: &Vec3,
    weight: f32,
) {
    let (index, blend) = bbone.segment_index(bone_length, co);

    acc.add(
        bbone.dual_quat(index),
        bbone.matrix(index),
        co,
        weight * (1.0 - blend),
    );
    acc.add(
        bbone.dual_quat(index + 1),
        bbone.matrix(index + 1),
        co,
        weight * blend,
    );
}

/// Add one bone's envelope influence; returns the contribution.
///
/// The envelope factor is scaled by the bone's envelope weight. A point
/// outside the falloff contributes nothing.
pub(super) fn accumulate_envelope(acc: &mut Accumulator, channel: &PoseChannel, co: &Vec3) -> f32 {
    let bone = &channel.bone;

    let factor = distance_factor_to_bone(
        co,
        &bone.head,
        &bone.tail,
        bone.radius_head,
        bone.radius_tail,
        bone.falloff,
    );
    if factor <= 0.0 {
        return 0.0;
    }

    let contribution = factor * bone.envelope_weight;
    if contribution > 0.0 {
        if let Some(bbone) = channel.bbone_active() {
            accumulate_bbone(acc, bbone, bone.length, co, contribution);
        } else {
            acc.add(&channel.dual_quat, &channel.matrix, co, contribution);
        }
    }

    contribution
}
