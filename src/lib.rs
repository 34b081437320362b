//! # Armature Deform
//!
//! CPU skeletal deformation kernel: poses an armature's bones against a
//! vertex buffer, blending per-vertex bone influences from vertex-group
//! weights and bone envelopes, linearly or with dual quaternions.
//!
//! The kernel is the last step of a rigging pipeline: pose evaluation
//! (constraints, actions, B-Bone curves) happens upstream and hands over
//! evaluated [`armature::PoseChannel`]s; this crate turns them into
//! deformed coordinates, in parallel over the buffer.
//!
//! ```
//! use armature_deform::armature::{ArmatureObject, Bone, Pose, PoseChannel};
//! use armature_deform::deform::{deform_coords, DeformFlags};
//! use armature_deform::math::{Mat4, Vec3};
//! use armature_deform::weights::{DeformVert, VertexGroupWeight};
//!
//! let bone = Bone::new("Bone", Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0));
//! let lifted = Mat4::new_translation(&Vec3::new(0.0, 0.0, 1.0));
//! let armature = ArmatureObject::new(Pose::new(vec![PoseChannel::new(bone, lifted)]));
//!
//! let groups = vec!["Bone".to_string()];
//! let dverts = vec![DeformVert::new(vec![VertexGroupWeight::new(0, 1.0)])];
//! let mut coords = vec![Vec3::new(0.5, 0.5, 0.0)];
//!
//! deform_coords(
//!     &armature,
//!     &Mat4::identity(),
//!     DeformFlags::VERTEX_GROUPS,
//!     "",
//!     &groups,
//!     Some(&dverts),
//!     &mut coords,
//!     None,
//!     None,
//! );
//! assert!((coords[0] - Vec3::new(0.5, 0.5, 1.0)).norm() < 1e-5);
//! ```

pub mod armature;
pub mod deform;
pub mod envelope;
pub mod math;
pub mod profiling;
pub mod weights;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
