//! Armature data: bones, evaluated pose channels, and poses.
//!
//! This module holds the skeleton-side inputs of the deformation kernel:
//!
//! - [`Bone`] - Rest-state bone data (head, tail, envelope, flags)
//! - [`PoseChannel`] - One bone's evaluated deform transform
//! - [`BBoneSegments`] - Per-segment transforms of a bendy bone
//! - [`Pose`] - The evaluated channel set of an armature
//! - [`ArmatureObject`] - A pose placed in the world
//!
//! Pose evaluation itself (constraints, parenting, actions) happens
//! upstream; the kernel only consumes the resulting deform matrices.

mod types;

pub use types::{ArmatureObject, BBoneSegments, Bone, BoneFlags, Pose, PoseChannel};
