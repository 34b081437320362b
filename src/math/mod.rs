//! Math type aliases and helper functions.
//!
//! All kernel math is `f32`, aliased from [`nalgebra`]. The helpers cover
//! the small set of matrix/quaternion operations the deformation code
//! needs: affine point transforms, 3x3 extraction, scale probing and
//! rotation extraction from possibly scaled transforms.

pub use nalgebra;

pub mod dual_quat;

pub use dual_quat::DualQuat;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 3x3 matrix (f32).
pub type Mat3 = nalgebra::Matrix3<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Quaternion (f32). Stored as `[x, y, z, w]` in memory.
/// Construct with `Quaternion::new(w, x, y, z)`.
pub type Quat = nalgebra::Quaternion<f32>;

// ===== Helper functions =====

/// Transform a point by an affine 4x4 matrix (translation applied).
pub fn transform_point(m: &Mat4, p: Vec3) -> Vec3 {
    let h = m * Vec4::new(p.x, p.y, p.z, 1.0);
    Vec3::new(h.x, h.y, h.z)
}

/// Transform a direction by the linear part of a 4x4 matrix.
pub fn transform_vector(m: &Mat4, v: Vec3) -> Vec3 {
    let h = m * Vec4::new(v.x, v.y, v.z, 0.0);
    Vec3::new(h.x, h.y, h.z)
}

/// Extract the upper-left 3x3 block of a 4x4 matrix.
pub fn mat3_from_mat4(m: &Mat4) -> Mat3 {
    m.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Per-axis scale of a 4x4 transform (basis column lengths).
pub fn mat4_to_scale(m: &Mat4) -> Vec3 {
    let col0 = Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]);
    let col1 = Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]);
    let col2 = Vec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]);
    Vec3::new(col0.norm(), col1.norm(), col2.norm())
}

/// Check whether a 3x3 matrix has orthogonal, unit-length axes.
pub fn is_orthonormal(m: &Mat3) -> bool {
    const EPS: f32 = 1e-5;
    let x = m.column(0);
    let y = m.column(1);
    let z = m.column(2);
    x.dot(&y).abs() < EPS
        && x.dot(&z).abs() < EPS
        && y.dot(&z).abs() < EPS
        && (x.norm_squared() - 1.0).abs() < EPS
        && (y.norm_squared() - 1.0).abs() < EPS
        && (z.norm_squared() - 1.0).abs() < EPS
}

/// Extract the rotation of a 4x4 transform as a quaternion.
///
/// Basis columns are normalized first so uniform or per-axis scale does not
/// skew the result.
pub fn rotation_quat(m: &Mat4) -> Quat {
    let col0 = Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]);
    let col1 = Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]);
    let col2 = Vec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]);
    let rot_mat = Mat3::from_columns(&[col0.normalize(), col1.normalize(), col2.normalize()]);
    nalgebra::UnitQuaternion::from_rotation_matrix(&nalgebra::Rotation3::from_matrix_unchecked(
        rot_mat,
    ))
    .into_inner()
}

/// Rotation-only 4x4 matrix from a unit quaternion.
pub fn mat4_from_quat(q: &Quat) -> Mat4 {
    nalgebra::UnitQuaternion::new_unchecked(*q).to_homogeneous()
}

/// Rebuild an orthogonal basis around the Y column of a transform.
///
/// The Y direction is kept fixed while X and Z are reconstructed
/// perpendicular to it; original column magnitudes and the translation are
/// preserved. The bone axis maps to Y, so this pulls a stable rotation out
/// of sheared or stretched bone matrices without flipping.
pub fn orthogonalize_y(m: &Mat4) -> Mat4 {
    let size = mat4_to_scale(m);
    let x_col = Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]);
    let y = Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]).normalize();

    let cross = x_col.cross(&y);
    let (x, z) = if cross.norm_squared() > 1e-12 {
        let z = cross.normalize();
        (y.cross(&z), z)
    } else {
        // X lies along the bone axis; derive a perpendicular from a
        // component swizzle of Y instead.
        let swizzle = Vec3::new(y.y, y.z, y.x);
        let x = y.cross(&swizzle).normalize();
        (x, x.cross(&y))
    };

    let x = x * size.x;
    let y = y * size.y;
    let z = z * size.z;
    #[rustfmt::skip]
    let result = Mat4::new(
        x.x, y.x, z.x, m[(0, 3)],
        x.y, y.y, z.y, m[(1, 3)],
        x.z, y.z, z.z, m[(2, 3)],
        0.0, 0.0, 0.0, 1.0,
    );
    result
}
