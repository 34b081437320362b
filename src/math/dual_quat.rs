//! Dual quaternion representation for volume-preserving skinning.
//!
//! A [`DualQuat`] encodes a rigid transform as a rotation quaternion plus a
//! dual (translation) part, and optionally carries a blended scale matrix
//! for transforms that are not purely rigid. Weighted sums of dual
//! quaternions average rotations without the candy-wrapper collapse of
//! naive linear blending.

use super::{
    Mat3, Mat4, Quat, Vec3, is_orthonormal, mat3_from_mat4, mat4_from_quat, mat4_to_scale,
    orthogonalize_y, rotation_quat, transform_point,
};

/// A dual quaternion with an optional blended scale matrix.
///
/// `quat` holds the rotation; `trans` holds the dual part, equal to
/// `0.5 * (0, t) * quat` for a translation `t` applied after the rotation.
/// Transforms carrying scale or shear additionally store an armature-space
/// scale matrix that is blended linearly and reapplied in
/// [`transform_point`](DualQuat::transform_point).
#[derive(Debug, Clone, Copy)]
pub struct DualQuat {
    /// Rotation (non-dual) part.
    pub quat: Quat,
    /// Translation (dual) part.
    pub trans: Quat,
    /// Blended scale/shear matrix; only meaningful when `scale_weight` is
    /// non-zero.
    pub scale: Mat4,
    /// Accumulated weight of scale-carrying contributions. Zero means the
    /// transform is rigid.
    pub scale_weight: f32,
}

impl DualQuat {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            quat: Quat::new(1.0, 0.0, 0.0, 0.0),
            trans: Quat::new(0.0, 0.0, 0.0, 0.0),
            scale: Mat4::identity(),
            scale_weight: 0.0,
        }
    }

    /// The additive zero used to start a weighted accumulation.
    pub fn zero() -> Self {
        Self {
            quat: Quat::new(0.0, 0.0, 0.0, 0.0),
            trans: Quat::new(0.0, 0.0, 0.0, 0.0),
            scale: Mat4::zeros(),
            scale_weight: 0.0,
        }
    }

    /// Build a dual quaternion from a rest matrix and a deform matrix, both
    /// in armature space.
    ///
    /// `deform * rest` is split into a rigid motion and a residual scale.
    /// When the deform matrix is orthonormal with positive determinant and
    /// near-unit scale, the transform is taken as rigid and no scale matrix
    /// is stored. Otherwise the rotation is extracted after
    /// re-orthogonalizing around the bone axis (to avoid flipping on
    /// stretched bones) and the scale residue is kept in armature space as
    /// `rest * S * rest^-1`.
    pub fn from_matrices(rest: &Mat4, deform: &Mat4) -> Self {
        // Full bone-local to posed transform; scale is measured on this.
        let base_rs = deform * rest;
        let dscale = mat4_to_scale(&base_rs) - Vec3::new(1.0, 1.0, 1.0);

        let deform3 = mat3_from_mat4(deform);
        let has_scale = !is_orthonormal(&deform3)
            || deform.determinant() < 0.0
            || dscale.norm_squared() > 1e-4 * 1e-4;

        let (rigid, scale) = if has_scale {
            let base_quat = rotation_quat(&orthogonalize_y(&base_rs));
            let mut base_r = mat4_from_quat(&base_quat);
            base_r[(0, 3)] = base_rs[(0, 3)];
            base_r[(1, 3)] = base_rs[(1, 3)];
            base_r[(2, 3)] = base_rs[(2, 3)];

            let rest_inv = rest.try_inverse().unwrap_or_else(Mat4::identity);
            let rigid = base_r * rest_inv;

            let base_r_inv = base_r.try_inverse().unwrap_or_else(Mat4::identity);
            let s = base_r_inv * base_rs;

            (rigid, Some(rest * s * rest_inv))
        } else {
            (*deform, None)
        };

        let quat = rotation_quat(&rigid);
        let t = Vec3::new(rigid[(0, 3)], rigid[(1, 3)], rigid[(2, 3)]);
        let trans = (Quat::new(0.0, t.x, t.y, t.z) * quat) * 0.5;

        Self {
            quat,
            trans,
            scale_weight: if scale.is_some() { 1.0 } else { 0.0 },
            scale: scale.unwrap_or_else(Mat4::identity),
        }
    }

    /// Accumulate `dq` scaled by `weight`.
    ///
    /// The weight sign is flipped when the quaternions land on opposite
    /// hemispheres, so two encodings of the same rotation reinforce rather
    /// than cancel. Scale matrices accumulate only from scale-carrying
    /// sources; rigid contributions are compensated in
    /// [`normalize`](DualQuat::normalize).
    pub fn add_weighted(&mut self, dq: &DualQuat, weight: f32) {
        let flipped = dq.quat.dot(&self.quat) < 0.0;
        let w = if flipped { -weight } else { weight };

        self.quat += dq.quat * w;
        self.trans += dq.trans * w;

        if dq.scale_weight != 0.0 {
            // Scale never blends with a negative weight.
            let w = if flipped { -w } else { w };
            self.scale += dq.scale * w;
            self.scale_weight += w;
        }
    }

    /// Accumulate `dq` scaled by `weight`, correcting scale around `pivot`.
    ///
    /// The displacement the scale matrix induces at the pivot is folded
    /// into the dual part as a pre-rotation translation, which makes the
    /// blend exact at the pivot itself. The residual scale matrix is
    /// re-pivoted when `keep_scale_matrix` is set (the caller wants a
    /// deformation matrix), otherwise dropped.
    pub fn add_weighted_pivot(
        &mut self,
        dq: &DualQuat,
        pivot: &Vec3,
        weight: f32,
        keep_scale_matrix: bool,
    ) {
        if dq.scale_weight == 0.0 {
            self.add_weighted(dq, weight);
            return;
        }

        let mut src = *dq;

        // Displacement the scale induces at the pivot.
        let dst = transform_point(&dq.scale, *pivot) - pivot;

        // Fold it into the dual part as a pre-rotation translation.
        src.trans += (dq.quat * Quat::new(0.0, dst.x, dst.y, dst.z)) * 0.5;

        if keep_scale_matrix {
            // Cancel the folded displacement so the matrix keeps only the
            // residual shape change around the pivot.
            src.scale[(0, 3)] -= dst.x;
            src.scale[(1, 3)] -= dst.y;
            src.scale[(2, 3)] -= dst.z;
        } else {
            src.scale_weight = 0.0;
        }

        self.add_weighted(&src, weight);
    }

    /// Normalize by the total accumulated weight.
    ///
    /// Contributions added without a scale matrix are compensated by
    /// padding the scale diagonal with the missing weight, keeping mixed
    /// rigid/scaled blends consistent.
    pub fn normalize(&mut self, total_weight: f32) {
        let scale = 1.0 / total_weight;

        self.quat *= scale;
        self.trans *= scale;

        if self.scale_weight != 0.0 {
            if self.scale_weight < total_weight {
                let pad = total_weight - self.scale_weight;
                self.scale[(0, 0)] += pad;
                self.scale[(1, 1)] += pad;
                self.scale[(2, 2)] += pad;
                self.scale[(3, 3)] += pad;
            }
            self.scale *= scale;
            self.scale_weight = 1.0;
        }
    }

    /// Apply the blended transform to a point.
    ///
    /// Scale (when present) is applied first, then the rotation and
    /// translation, divided by the squared quaternion magnitude so an
    /// unnormalized blend still maps correctly. When `deform_mat` is
    /// supplied it receives the local 3x3 linear part of the transform.
    pub fn transform_point(&self, co: &mut Vec3, deform_mat: Option<&mut Mat3>) {
        let w = self.quat.coords.w;
        let x = self.quat.coords.x;
        let y = self.quat.coords.y;
        let z = self.quat.coords.z;

        #[rustfmt::skip]
        let rot = Mat3::new(
            w * w + x * x - y * y - z * z, 2.0 * (x * y - w * z),         2.0 * (x * z + w * y),
            2.0 * (x * y + w * z),         w * w + y * y - x * x - z * z, 2.0 * (y * z - w * x),
            2.0 * (x * z - w * y),         2.0 * (y * z + w * x),         w * w + z * z - x * x - y * y,
        );

        let len2 = self.quat.coords.norm_squared();
        let len2 = if len2 > 0.0 { 1.0 / len2 } else { len2 };

        // Translation: 2 * trans * conj(quat), vector part.
        let t0 = self.trans.coords.w;
        let t1 = self.trans.coords.x;
        let t2 = self.trans.coords.y;
        let t3 = self.trans.coords.z;
        let trans = Vec3::new(
            2.0 * (-t0 * x + w * t1 - t2 * z + y * t3),
            2.0 * (-t0 * y + t1 * z - x * t3 + w * t2),
            2.0 * (-t0 * z + x * t2 + w * t3 - t1 * y),
        );

        if self.scale_weight != 0.0 {
            *co = transform_point(&self.scale, *co);
        }

        *co = (rot * *co + trans) * len2;

        if let Some(mat) = deform_mat {
            if self.scale_weight != 0.0 {
                *mat = rot * mat3_from_mat4(&self.scale) * len2;
            } else {
                *mat = rot * len2;
            }
        }
    }
}

impl Default for DualQuat {
    fn default() -> Self {
        Self::identity()
    }
}
