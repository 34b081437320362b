//! The deformation kernel: mode flags, the per-vertex driver, and the
//! batch entry points.
//!
//! Each vertex blends the transforms of the bones that influence it.
//! Influence comes from vertex-group weights, from bone envelopes, or
//! both; blending is linear or dual-quaternion. The batch driver maps the
//! per-vertex kernel over a coordinate buffer in parallel.

mod accumulate;

use bitflags::bitflags;
use rayon::prelude::*;

use crate::armature::{ArmatureObject, BoneFlags, PoseChannel};
use crate::envelope::distance_factor_to_bone;
use crate::math::{Mat3, Mat4, Vec3, mat3_from_mat4, transform_point};
use crate::profiling::profile_function;
use crate::weights::{
    DeformVert, DeformVertSource, EditMeshDeformData, LayerSource, MeshDeformData, NoSource,
    SliceSource, group_index,
};
use accumulate::{Accumulator, accumulate_channel, accumulate_envelope};

bitflags! {
    /// Deformation mode flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeformFlags: u32 {
        /// Weight bones by the target's vertex groups.
        const VERTEX_GROUPS = 1 << 0;
        /// Let bone envelopes deform vertices no group bone claims.
        const ENVELOPE = 1 << 1;
        /// Blend with dual quaternions instead of matrices.
        const QUATERNION = 1 << 2;
        /// Invert the overall-group weight.
        const INVERT_VGROUP = 1 << 3;
    }
}

impl Default for DeformFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Contributions at or below this total leave the vertex untouched.
const CONTRIB_EPSILON: f32 = 1e-4;

/// Minimum vertices per parallel work unit.
const MIN_CHUNK: usize = 32;

/// Per-invocation state shared read-only by all vertices.
struct DeformContext<'a> {
    channels: &'a [PoseChannel],
    /// Vertex-group index to deforming channel; empty when groups are off.
    channel_from_group: Vec<Option<&'a PoseChannel>>,
    overall_group: Option<usize>,
    use_dverts: bool,
    use_envelope: bool,
    use_quaternion: bool,
    invert_vgroup: bool,
    /// Target space to armature space.
    premat: Mat4,
    /// Armature space back to target space.
    postmat: Mat4,
}

/// Deform one vertex in place.
fn deform_vertex(
    ctx: &DeformContext<'_>,
    dvert: Option<&DeformVert>,
    co_out: &mut Vec3,
    deform_mat: Option<&mut Mat3>,
    co_prev: Option<&Vec3>,
) {
    let mut armature_weight = 1.0_f32; // default to 1 if no overall group
    let mut prevco_weight = 0.0_f32;

    if let (Some(group), Some(dvert)) = (ctx.overall_group, dvert) {
        armature_weight = dvert.weight_for_group(group as u32);

        if ctx.invert_vgroup {
            armature_weight = 1.0 - armature_weight;
        }

        // With a prev-coords buffer the overall weight turns into the blend
        // factor toward the result computed from those coords.
        if co_prev.is_some() {
            prevco_weight = 1.0 - armature_weight;
            armature_weight = 1.0;
        }
    }

    // The coord we work on, and whether there is any point computing it.
    let mut co = match co_prev {
        Some(prev) => {
            if prevco_weight == 1.0 {
                return;
            }
            *prev
        }
        None => {
            if armature_weight == 0.0 {
                return;
            }
            *co_out
        }
    };

    co = transform_point(&ctx.premat, co);

    let full_deform = deform_mat.is_some();
    let mut acc = Accumulator::new(ctx.use_quaternion, full_deform);
    let mut contribution = 0.0_f32;

    match dvert {
        Some(dvert) if ctx.use_dverts && !dvert.weights.is_empty() => {
            let mut any_group_bone = false;

            for entry in &dvert.weights {
                let Some(channel) = ctx
                    .channel_from_group
                    .get(entry.group as usize)
                    .copied()
                    .flatten()
                else {
                    continue;
                };

                // A resolvable deform bone counts even at zero weight; it
                // keeps the envelope fallback from taking over.
                any_group_bone = true;

                let bone = &channel.bone;
                let mut weight = entry.weight;
                if bone.flags.contains(BoneFlags::MULT_VG_ENV) {
                    weight *= distance_factor_to_bone(
                        &co,
                        &bone.head,
                        &bone.tail,
                        bone.radius_head,
                        bone.radius_tail,
                        bone.falloff,
                    );
                }

                accumulate_channel(&mut acc, channel, &co, weight, &mut contribution);
            }

            // Vertex groups without bones behind them (soft-body groups and
            // the like) still fall back to envelopes.
            if !any_group_bone && ctx.use_envelope {
                contribution += envelope_pass(&mut acc, ctx, &co);
            }
        }
        _ => {
            if ctx.use_envelope {
                contribution += envelope_pass(&mut acc, ctx, &co);
            }
        }
    }

    if contribution > CONTRIB_EPSILON {
        match acc {
            Accumulator::DualQuat { mut sum, .. } => {
                sum.normalize(contribution);

                let mut dq_mat = full_deform.then(Mat3::zeros);

                if armature_weight != 1.0 {
                    let mut deformed = co;
                    sum.transform_point(&mut deformed, dq_mat.as_mut());
                    co += (deformed - co) * armature_weight;
                } else {
                    sum.transform_point(&mut co, dq_mat.as_mut());
                }

                if let (Some(out), Some(dq_mat)) = (deform_mat, dq_mat) {
                    let pre = mat3_from_mat4(&ctx.premat);
                    let post = mat3_from_mat4(&ctx.postmat);
                    // The normalize above already scale-corrected the matrix.
                    *out = post * dq_mat * pre * *out;
                }
            }
            Accumulator::Linear { offset, matrix } => {
                co += offset * (armature_weight / contribution);

                if let (Some(out), Some(summed)) = (deform_mat, matrix) {
                    let pre = mat3_from_mat4(&ctx.premat);
                    let post = mat3_from_mat4(&ctx.postmat);
                    let scaled = summed * (armature_weight / contribution);
                    *out = post * scaled * pre * *out;
                }
            }
        }
    }

    co = transform_point(&ctx.postmat, co);

    match co_prev {
        Some(_) => {
            let deformed_weight = 1.0 - prevco_weight;
            *co_out = *co_out * prevco_weight + co * deformed_weight;
        }
        None => *co_out = co,
    }
}

/// Whole-armature envelope pass; returns the summed contribution.
fn envelope_pass(acc: &mut Accumulator, ctx: &DeformContext<'_>, co: &Vec3) -> f32 {
    let mut contribution = 0.0;
    for channel in ctx.channels.iter().filter(|c| c.bone.deforms()) {
        contribution += accumulate_envelope(acc, channel, co);
    }
    contribution
}

#[allow(clippy::too_many_arguments)]
fn deform_batch<S: DeformVertSource>(
    armature: &ArmatureObject,
    target_to_world: &Mat4,
    flags: DeformFlags,
    overall_group_name: &str,
    groups: &[String],
    source: &S,
    has_dverts: bool,
    coords: &mut [Vec3],
    coords_prev: Option<&[Vec3]>,
    deform_mats: Option<&mut [Mat3]>,
) {
    if let Some(prev) = coords_prev {
        assert_eq!(
            prev.len(),
            coords.len(),
            "coords_prev length must match coords"
        );
    }
    if let Some(mats) = deform_mats.as_deref() {
        assert_eq!(
            mats.len(),
            coords.len(),
            "deform_mats length must match coords"
        );
    }

    let pose = &armature.pose;
    if pose.needs_rebuild {
        log::error!("deforming with a pose that needs rebuild; channels are stale");
        debug_assert!(!pose.needs_rebuild, "pose needs rebuild before deforming");
    }

    let overall_group = group_index(groups, overall_group_name);
    let use_dverts = flags.contains(DeformFlags::VERTEX_GROUPS) && has_dverts;

    // Vertex-group index to pose-channel table; non-deforming bones drop out.
    let channel_from_group: Vec<Option<&PoseChannel>> = if use_dverts {
        groups
            .iter()
            .map(|name| pose.channel_by_name(name).filter(|c| c.bone.deforms()))
            .collect()
    } else {
        Vec::new()
    };

    let target_world_inv = target_to_world.try_inverse().unwrap_or_else(Mat4::identity);
    let postmat = target_world_inv * armature.object_to_world;
    let premat = postmat.try_inverse().unwrap_or_else(Mat4::identity);

    let ctx = DeformContext {
        channels: &pose.channels,
        channel_from_group,
        overall_group,
        use_dverts,
        use_envelope: flags.contains(DeformFlags::ENVELOPE),
        use_quaternion: flags.contains(DeformFlags::QUATERNION),
        invert_vgroup: flags.contains(DeformFlags::INVERT_VGROUP),
        premat,
        postmat,
    };

    let fetch_dverts = ctx.use_dverts || ctx.overall_group.is_some();

    match deform_mats {
        Some(mats) => {
            coords
                .par_iter_mut()
                .zip(mats.par_iter_mut())
                .enumerate()
                .with_min_len(MIN_CHUNK)
                .for_each(|(i, (co, mat))| {
                    let dvert = fetch_dverts.then(|| source.deform_vert(i)).flatten();
                    let prev = coords_prev.map(|prev| &prev[i]);
                    deform_vertex(&ctx, dvert, co, Some(mat), prev);
                });
        }
        None => {
            coords
                .par_iter_mut()
                .enumerate()
                .with_min_len(MIN_CHUNK)
                .for_each(|(i, co)| {
                    let dvert = fetch_dverts.then(|| source.deform_vert(i)).flatten();
                    let prev = coords_prev.map(|prev| &prev[i]);
                    deform_vertex(&ctx, dvert, co, None, prev);
                });
        }
    }
}

/// Deform a plain coordinate buffer in place.
///
/// `coords` is in the target object's space; `target_to_world` places it in
/// the world next to the armature. `groups` names the target's vertex
/// groups, `dverts` holds one weight set per coordinate, and
/// `overall_group_name` selects the optional whole-armature influence group
/// (empty for none). `coords_prev`, when present, supplies the coordinates
/// deformation starts from while `coords` keeps the blend partner.
/// `deform_mats` receives the per-vertex deformation matrices when the
/// caller needs them.
///
/// # Panics
///
/// Panics when `dverts`, `coords_prev`, or `deform_mats` is present with a
/// length different from `coords`.
#[allow(clippy::too_many_arguments)]
pub fn deform_coords(
    armature: &ArmatureObject,
    target_to_world: &Mat4,
    flags: DeformFlags,
    overall_group_name: &str,
    groups: &[String],
    dverts: Option<&[DeformVert]>,
    coords: &mut [Vec3],
    coords_prev: Option<&[Vec3]>,
    deform_mats: Option<&mut [Mat3]>,
) {
    profile_function!();

    match dverts {
        Some(dverts) => {
            assert_eq!(
                dverts.len(),
                coords.len(),
                "dverts length must match coords"
            );
            deform_batch(
                armature,
                target_to_world,
                flags,
                overall_group_name,
                groups,
                &SliceSource(dverts),
                true,
                coords,
                coords_prev,
                deform_mats,
            );
        }
        None => {
            deform_batch(
                armature,
                target_to_world,
                flags,
                overall_group_name,
                groups,
                &NoSource,
                false,
                coords,
                coords_prev,
                deform_mats,
            );
        }
    }
}

/// Deform a mesh's vertex coordinates in place.
///
/// Vertex groups engage when the mesh carries deform-vert storage; see
/// [`deform_coords`] for the shared parameters.
///
/// # Panics
///
/// Panics when `coords_prev` or `deform_mats` is present with a length
/// different from `coords`.
#[allow(clippy::too_many_arguments)]
pub fn deform_mesh_coords(
    armature: &ArmatureObject,
    target_to_world: &Mat4,
    flags: DeformFlags,
    overall_group_name: &str,
    mesh: &MeshDeformData<'_>,
    coords: &mut [Vec3],
    coords_prev: Option<&[Vec3]>,
    deform_mats: Option<&mut [Mat3]>,
) {
    profile_function!();

    let has_dverts = !mesh.deform_verts.is_empty();
    deform_batch(
        armature,
        target_to_world,
        flags,
        overall_group_name,
        mesh.groups,
        &SliceSource(mesh.deform_verts),
        has_dverts,
        coords,
        coords_prev,
        deform_mats,
    );
}

/// Deform an edit-mesh's vertex coordinates in place.
///
/// Vertex groups engage when the weight layer exists; elements whose layer
/// entry is `None` deform as group-less vertices. See [`deform_coords`] for
/// the shared parameters.
///
/// # Panics
///
/// Panics when `coords_prev` or `deform_mats` is present with a length
/// different from `coords`.
#[allow(clippy::too_many_arguments)]
pub fn deform_editmesh_coords(
    armature: &ArmatureObject,
    target_to_world: &Mat4,
    flags: DeformFlags,
    overall_group_name: &str,
    em: &EditMeshDeformData<'_>,
    coords: &mut [Vec3],
    coords_prev: Option<&[Vec3]>,
    deform_mats: Option<&mut [Mat3]>,
) {
    profile_function!();

    match em.deform_verts {
        Some(layer) => deform_batch(
            armature,
            target_to_world,
            flags,
            overall_group_name,
            em.groups,
            &LayerSource(layer),
            true,
            coords,
            coords_prev,
            deform_mats,
        ),
        None => deform_batch(
            armature,
            target_to_world,
            flags,
            overall_group_name,
            em.groups,
            &NoSource,
            false,
            coords,
            coords_prev,
            deform_mats,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{BBoneSegments, Bone, Pose};
    use crate::weights::VertexGroupWeight;

    fn bone_channel(name: &str, deform: Mat4) -> PoseChannel {
        PoseChannel::new(
            Bone::new(name, Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0)),
            deform,
        )
    }

    fn single_bone_armature(deform: Mat4) -> ArmatureObject {
        ArmatureObject::new(Pose::new(vec![bone_channel("Bone", deform)]))
    }

    fn full_weight_dverts(count: usize) -> Vec<DeformVert> {
        vec![DeformVert::new(vec![VertexGroupWeight::new(0, 1.0)]); count]
    }

    fn rotation_z(angle: f32) -> Mat4 {
        nalgebra::Rotation3::from_axis_angle(&Vec3::z_axis(), angle).to_homogeneous()
    }

    #[test]
    fn group_deform_matches_bone_matrix() {
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = single_bone_armature(deform);
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(1);

        let mut coords = vec![Vec3::new(0.3, 0.7, -0.2)];
        let expected = transform_point(&deform, coords[0]);

        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        assert!((coords[0] - expected).norm() < 1e-5);
    }

    #[test]
    fn envelope_moves_vertex_inside_falloff_only() {
        let bone = Bone::new("Bone", Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))
            .with_radii(0.5, 0.5)
            .with_falloff(0.5);
        let deform = Mat4::new_translation(&Vec3::new(1.0, 0.0, 0.0));
        let armature = ArmatureObject::new(Pose::new(vec![PoseChannel::new(bone, deform)]));

        let inside = Vec3::new(0.25, 0.5, 0.0);
        let outside = Vec3::new(3.0, 0.5, 0.0);
        let mut coords = vec![inside, outside];

        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::ENVELOPE,
            "",
            &[],
            None,
            &mut coords,
            None,
            None,
        );

        assert!((coords[0] - Vec3::new(1.25, 0.5, 0.0)).norm() < 1e-5);
        assert!((coords[1] - outside).norm() < 1e-5);
    }

    #[test]
    fn zero_contribution_round_trips_object_transforms() {
        let armature = single_bone_armature(Mat4::new_translation(&Vec3::new(5.0, 0.0, 0.0)))
            .with_object_to_world(Mat4::new_translation(&Vec3::new(0.0, 3.0, 0.0)));
        let target_to_world = Mat4::new_translation(&Vec3::new(-1.0, 2.0, 0.5));

        // Envelopes on, but the vertex sits far outside every falloff.
        let original = Vec3::new(40.0, 40.0, 40.0);
        let mut coords = vec![original];
        deform_coords(
            &armature,
            &target_to_world,
            DeformFlags::ENVELOPE,
            "",
            &[],
            None,
            &mut coords,
            None,
            None,
        );
        assert!((coords[0] - original).norm() < 1e-4);
    }

    #[test]
    fn quaternion_agrees_with_linear_for_rigid_bone() {
        let deform = rotation_z(0.7).append_translation(&Vec3::new(0.5, -0.25, 1.0));
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(1);

        let mut linear = vec![Vec3::new(0.4, 0.9, -0.3)];
        let mut quat = linear.clone();

        deform_coords(
            &single_bone_armature(deform),
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut linear,
            None,
            None,
        );
        deform_coords(
            &single_bone_armature(deform),
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS | DeformFlags::QUATERNION,
            "",
            &groups,
            Some(&dverts),
            &mut quat,
            None,
            None,
        );

        // One bone at full weight: both blends reduce to the bone transform.
        assert!((linear[0] - quat[0]).norm() < 1e-4);
    }

    #[test]
    fn bbone_boundary_matches_single_node() {
        let node_transforms = [
            Mat4::new_translation(&Vec3::new(0.0, 0.0, 1.0)),
            Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0)),
            Mat4::new_translation(&Vec3::new(0.0, 0.0, 4.0)),
        ];
        let bone = Bone::new("Bone", Vec3::zeros(), Vec3::new(0.0, 2.0, 0.0)).with_segments(2);
        let bbone = BBoneSegments::new(
            Mat4::identity(),
            node_transforms.to_vec(),
            &bone.rest_matrix,
        );
        let channel = PoseChannel::new(bone, Mat4::identity()).with_bbone(bbone);
        let armature = ArmatureObject::new(Pose::new(vec![channel]));
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(1);

        // At the head the blend degenerates to node 0.
        let mut coords = vec![Vec3::new(0.0, 0.0, 0.0)];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        let expected = transform_point(&node_transforms[0], Vec3::zeros());
        assert!((coords[0] - expected).norm() < 1e-5);

        // Past the tail it degenerates to the last node.
        let co = Vec3::new(0.0, 2.5, 0.0);
        let mut coords = vec![co];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        let expected = transform_point(&node_transforms[2], co);
        assert!((coords[0] - expected).norm() < 1e-5);
    }

    #[test]
    fn unresolvable_groups_fall_back_to_envelopes() {
        let bone = Bone::new("Envelope", Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))
            .with_radii(1.0, 1.0)
            .with_falloff(1.0);
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 1.0));
        let armature = ArmatureObject::new(Pose::new(vec![PoseChannel::new(bone, deform)]));

        // The group exists on the target but matches no bone.
        let groups = vec!["SoftBody".to_string()];
        let dverts = vec![DeformVert::new(vec![VertexGroupWeight::new(0, 1.0)])];

        let mut coords = vec![Vec3::new(0.0, 0.5, 0.0)];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS | DeformFlags::ENVELOPE,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        assert!((coords[0] - Vec3::new(0.0, 0.5, 1.0)).norm() < 1e-5);
    }

    #[test]
    fn resolvable_group_bone_suppresses_envelope_fallback() {
        let bone = Bone::new("Bone", Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))
            .with_radii(1.0, 1.0)
            .with_falloff(1.0);
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 1.0));
        let armature = ArmatureObject::new(Pose::new(vec![PoseChannel::new(bone, deform)]));
        let groups = vec!["Bone".to_string()];

        // A zero-weight membership still claims the vertex for the group
        // path, so the envelope never runs and nothing moves.
        let dverts = vec![DeformVert::new(vec![VertexGroupWeight::new(0, 0.0)])];
        let original = Vec3::new(0.0, 0.5, 0.0);
        let mut coords = vec![original];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS | DeformFlags::ENVELOPE,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        assert!((coords[0] - original).norm() < 1e-5);
    }

    #[test]
    fn mult_vg_env_scales_weight_by_envelope() {
        let bone = Bone::new("Bone", Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))
            .with_radii(0.5, 0.5)
            .with_falloff(0.0)
            .with_flags(BoneFlags::MULT_VG_ENV);
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = ArmatureObject::new(Pose::new(vec![PoseChannel::new(bone, deform)]));
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(2);

        let inside = Vec3::new(0.25, 0.5, 0.0);
        let outside = Vec3::new(2.0, 0.5, 0.0);
        let mut coords = vec![inside, outside];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );

        // Full weight inside the envelope core; zeroed outside it.
        assert!((coords[0] - (inside + Vec3::new(0.0, 0.0, 2.0))).norm() < 1e-5);
        assert!((coords[1] - outside).norm() < 1e-5);
    }

    #[test]
    fn overall_group_scales_influence() {
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = single_bone_armature(deform);
        let groups = vec!["Bone".to_string(), "Master".to_string()];
        let dverts = vec![DeformVert::new(vec![
            VertexGroupWeight::new(0, 1.0),
            VertexGroupWeight::new(1, 0.5),
        ])];

        let mut coords = vec![Vec3::new(0.0, 0.5, 0.0)];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "Master",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        // Half the overall weight, half the displacement.
        assert!((coords[0] - Vec3::new(0.0, 0.5, 1.0)).norm() < 1e-5);
    }

    #[test]
    fn invert_vgroup_flips_overall_weight() {
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = single_bone_armature(deform);
        let groups = vec!["Bone".to_string(), "Master".to_string()];
        let dverts = vec![DeformVert::new(vec![
            VertexGroupWeight::new(0, 1.0),
            VertexGroupWeight::new(1, 0.3),
        ])];

        let mut coords = vec![Vec3::new(0.0, 0.5, 0.0)];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS | DeformFlags::INVERT_VGROUP,
            "Master",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        // Inverted 0.3 gives 0.7 of the 2-unit displacement.
        assert!((coords[0] - Vec3::new(0.0, 0.5, 1.4)).norm() < 1e-5);
    }

    #[test]
    fn prev_coords_blend_by_overall_group() {
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = single_bone_armature(deform);
        let groups = vec!["Bone".to_string(), "Blend".to_string()];
        let dverts = vec![DeformVert::new(vec![
            VertexGroupWeight::new(0, 1.0),
            VertexGroupWeight::new(1, 0.25),
        ])];

        let current = Vec3::new(10.0, 0.0, 0.0);
        let prev = vec![Vec3::new(0.0, 0.5, 0.0)];
        let mut coords = vec![current];

        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "Blend",
            &groups,
            Some(&dverts),
            &mut coords,
            Some(&prev),
            None,
        );

        // Deforming the prev coord gives (0, 0.5, 2); the group weight 0.25
        // blends a quarter of that against the untouched current coord.
        let deformed = Vec3::new(0.0, 0.5, 2.0);
        let expected = current * 0.75 + deformed * 0.25;
        assert!((coords[0] - expected).norm() < 1e-5);
    }

    #[test]
    fn prev_coords_zero_weight_leaves_coords_untouched() {
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = single_bone_armature(deform);
        let groups = vec!["Bone".to_string(), "Blend".to_string()];
        // Not a member of the blend group: weight 0, prev coords win fully.
        let dverts = vec![DeformVert::new(vec![VertexGroupWeight::new(0, 1.0)])];

        let current = Vec3::new(10.0, 0.0, 0.0);
        let prev = vec![Vec3::new(0.0, 0.5, 0.0)];
        let mut coords = vec![current];

        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "Blend",
            &groups,
            Some(&dverts),
            &mut coords,
            Some(&prev),
            None,
        );
        assert_eq!(coords[0], current);
    }

    #[test]
    fn deform_mats_capture_bone_rotation() {
        let deform = rotation_z(std::f32::consts::FRAC_PI_2);
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(1);
        let expected = mat3_from_mat4(&deform);

        for flags in [
            DeformFlags::VERTEX_GROUPS,
            DeformFlags::VERTEX_GROUPS | DeformFlags::QUATERNION,
        ] {
            let mut coords = vec![Vec3::new(0.2, 0.4, 0.0)];
            let mut mats = vec![Mat3::identity()];
            deform_coords(
                &single_bone_armature(deform),
                &Mat4::identity(),
                flags,
                "",
                &groups,
                Some(&dverts),
                &mut coords,
                None,
                Some(&mut mats),
            );
            assert!(
                (mats[0] - expected).norm() < 1e-4,
                "flags {flags:?}: got {:?}",
                mats[0]
            );
        }
    }

    #[test]
    fn batch_matches_per_vertex_serial() {
        let spine = Bone::new("Spine", Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))
            .with_radii(0.5, 0.5)
            .with_falloff(1.0);
        let arm = Bone::new("Arm", Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 1.0, 0.0))
            .with_radii(0.5, 0.5)
            .with_falloff(1.0);
        let armature = ArmatureObject::new(Pose::new(vec![
            PoseChannel::new(spine, rotation_z(0.3)),
            PoseChannel::new(arm, Mat4::new_translation(&Vec3::new(0.0, 0.5, 0.5))),
        ]));
        let groups = vec!["Spine".to_string(), "Arm".to_string()];

        let count = 100;
        let dverts: Vec<DeformVert> = (0..count)
            .map(|i| {
                let t = i as f32 / count as f32;
                DeformVert::new(vec![
                    VertexGroupWeight::new(0, 1.0 - t),
                    VertexGroupWeight::new(1, t),
                ])
            })
            .collect();
        let coords: Vec<Vec3> = (0..count)
            .map(|i| {
                let t = i as f32 / count as f32;
                Vec3::new(t, 2.0 * t - 0.5, (1.0 - t) * 0.25)
            })
            .collect();

        let flags = DeformFlags::VERTEX_GROUPS | DeformFlags::ENVELOPE;

        let mut batch = coords.clone();
        deform_coords(
            &armature,
            &Mat4::identity(),
            flags,
            "",
            &groups,
            Some(&dverts),
            &mut batch,
            None,
            None,
        );

        for i in 0..count {
            let mut single = vec![coords[i]];
            deform_coords(
                &armature,
                &Mat4::identity(),
                flags,
                "",
                &groups,
                Some(&dverts[i..i + 1]),
                &mut single,
                None,
                None,
            );
            assert!(
                (batch[i] - single[0]).norm() < 1e-6,
                "vertex {i} diverged: batch {:?} vs serial {:?}",
                batch[i],
                single[0]
            );
        }
    }

    #[test]
    fn mesh_entry_matches_plain_buffer() {
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = single_bone_armature(deform);
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(2);

        let start = vec![Vec3::new(0.0, 0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)];
        let mut plain = start.clone();
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut plain,
            None,
            None,
        );

        let mesh = MeshDeformData {
            groups: &groups,
            deform_verts: &dverts,
        };
        let mut meshed = start.clone();
        deform_mesh_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &mesh,
            &mut meshed,
            None,
            None,
        );
        assert_eq!(plain, meshed);
    }

    #[test]
    fn editmesh_layer_gaps_deform_as_groupless() {
        let bone = Bone::new("Bone", Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))
            .with_radii(1.0, 1.0)
            .with_falloff(1.0);
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 1.0));
        let armature = ArmatureObject::new(Pose::new(vec![PoseChannel::new(bone, deform)]));
        let groups = vec!["Bone".to_string()];

        let layer = vec![
            Some(DeformVert::new(vec![VertexGroupWeight::new(0, 1.0)])),
            None,
        ];
        let em = EditMeshDeformData {
            groups: &groups,
            deform_verts: Some(&layer),
        };

        let mut coords = vec![Vec3::new(0.0, 0.5, 0.0), Vec3::new(0.0, 0.5, 0.0)];
        deform_editmesh_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS | DeformFlags::ENVELOPE,
            "",
            &em,
            &mut coords,
            None,
            None,
        );

        // Vertex 0 follows its group; vertex 1 has no layer entry and falls
        // back to the envelope, which lands on the same bone here.
        assert!((coords[0] - Vec3::new(0.0, 0.5, 1.0)).norm() < 1e-5);
        assert!((coords[1] - Vec3::new(0.0, 0.5, 1.0)).norm() < 1e-5);
    }

    #[test]
    fn out_of_range_group_entries_are_skipped() {
        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let armature = single_bone_armature(deform);
        let groups = vec!["Bone".to_string()];
        let dverts = vec![DeformVert::new(vec![VertexGroupWeight::new(42, 1.0)])];

        let original = Vec3::new(0.0, 0.5, 0.0);
        let mut coords = vec![original];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        assert!((coords[0] - original).norm() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "dverts length must match coords")]
    fn mismatched_dverts_length_panics() {
        let armature = single_bone_armature(Mat4::identity());
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(1);
        let mut coords = vec![Vec3::zeros(), Vec3::zeros()];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
    }

    #[test]
    #[should_panic(expected = "coords_prev length must match coords")]
    fn mismatched_prev_length_panics() {
        let armature = single_bone_armature(Mat4::identity());
        let mut coords = vec![Vec3::zeros(), Vec3::zeros()];
        let prev = vec![Vec3::zeros()];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::ENVELOPE,
            "",
            &[],
            None,
            &mut coords,
            Some(&prev),
            None,
        );
    }

    #[test]
    #[should_panic(expected = "deform_mats length must match coords")]
    fn mismatched_mats_length_panics() {
        let armature = single_bone_armature(Mat4::identity());
        let mut coords = vec![Vec3::zeros(), Vec3::zeros()];
        let mut mats = vec![Mat3::identity()];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::ENVELOPE,
            "",
            &[],
            None,
            &mut coords,
            None,
            Some(&mut mats),
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "needs rebuild")]
    fn stale_pose_asserts_in_debug() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut armature = single_bone_armature(Mat4::identity());
        armature.pose.needs_rebuild = true;

        let mut coords = vec![Vec3::zeros()];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::ENVELOPE,
            "",
            &[],
            None,
            &mut coords,
            None,
            None,
        );
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn stale_pose_proceeds_in_release() {
        let _ = env_logger::builder().is_test(true).try_init();

        let deform = Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0));
        let mut armature = single_bone_armature(deform);
        armature.pose.needs_rebuild = true;
        let groups = vec!["Bone".to_string()];
        let dverts = full_weight_dverts(1);

        let mut coords = vec![Vec3::new(0.0, 0.5, 0.0)];
        deform_coords(
            &armature,
            &Mat4::identity(),
            DeformFlags::VERTEX_GROUPS,
            "",
            &groups,
            Some(&dverts),
            &mut coords,
            None,
            None,
        );
        assert!((coords[0] - Vec3::new(0.0, 0.5, 2.0)).norm() < 1e-5);
    }
}
