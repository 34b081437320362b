use bitflags::bitflags;

use crate::math::{DualQuat, Mat4, Vec3, transform_point};

bitflags! {
    /// Per-bone behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BoneFlags: u32 {
        /// Bone never deforms geometry.
        const NO_DEFORM = 1 << 0;
        /// Multiply vertex-group weights by the bone's envelope factor.
        const MULT_VG_ENV = 1 << 1;
    }
}

impl Default for BoneFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Rest-state bone data, in armature space.
#[derive(Debug, Clone)]
pub struct Bone {
    /// Bone name; vertex groups bind by this.
    pub name: String,
    /// Head (root) position.
    pub head: Vec3,
    /// Tail (tip) position.
    pub tail: Vec3,
    /// Envelope core radius at the head.
    pub radius_head: f32,
    /// Envelope core radius at the tail.
    pub radius_tail: f32,
    /// Envelope falloff shell thickness beyond the core radius.
    pub falloff: f32,
    /// Multiplier on this bone's envelope contribution.
    pub envelope_weight: f32,
    /// Number of B-Bone segments; 1 means a plain rigid bone.
    pub segments: u32,
    /// Rest length, used to map points onto B-Bone segments.
    pub length: f32,
    /// Behavior flags.
    pub flags: BoneFlags,
    /// Bone-local to armature-space rest transform.
    pub rest_matrix: Mat4,
}

impl Bone {
    /// Create a bone with default envelope settings and a rest length of
    /// `|tail - head|`.
    pub fn new(name: impl Into<String>, head: Vec3, tail: Vec3) -> Self {
        Self {
            name: name.into(),
            head,
            tail,
            radius_head: 0.1,
            radius_tail: 0.1,
            falloff: 0.0,
            envelope_weight: 1.0,
            segments: 1,
            length: (tail - head).norm(),
            flags: BoneFlags::default(),
            rest_matrix: Mat4::identity(),
        }
    }

    /// Set the envelope core radii.
    pub fn with_radii(mut self, radius_head: f32, radius_tail: f32) -> Self {
        self.radius_head = radius_head;
        self.radius_tail = radius_tail;
        self
    }

    /// Set the envelope falloff shell thickness.
    pub fn with_falloff(mut self, falloff: f32) -> Self {
        self.falloff = falloff;
        self
    }

    /// Set the envelope contribution multiplier.
    pub fn with_envelope_weight(mut self, weight: f32) -> Self {
        self.envelope_weight = weight;
        self
    }

    /// Set the B-Bone segment count.
    pub fn with_segments(mut self, segments: u32) -> Self {
        self.segments = segments;
        self
    }

    /// Set the behavior flags.
    pub fn with_flags(mut self, flags: BoneFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the bone-local to armature-space rest transform.
    pub fn with_rest_matrix(mut self, rest_matrix: Mat4) -> Self {
        self.rest_matrix = rest_matrix;
        self
    }

    /// Whether this bone participates in deformation at all.
    pub fn deforms(&self) -> bool {
        !self.flags.contains(BoneFlags::NO_DEFORM)
    }
}

/// Evaluated per-segment transforms of a B-Bone.
///
/// Nodes sit at segment boundaries, so a bone with `n` segments carries
/// `n + 1` node transforms; a point between two nodes blends them by its
/// position along the bone axis.
#[derive(Debug, Clone)]
pub struct BBoneSegments {
    /// Armature space to bone-local space, for projecting onto the axis.
    to_bone: Mat4,
    matrices: Vec<Mat4>,
    dual_quats: Vec<DualQuat>,
}

impl BBoneSegments {
    /// Build segment runtime data from per-node deform matrices.
    ///
    /// `rest_matrix` is the owning bone's rest transform; the per-node dual
    /// quaternions are derived from it and each node matrix.
    ///
    /// # Panics
    ///
    /// Panics when fewer than 2 node matrices are supplied (a B-Bone has at
    /// least one segment, so at least two boundary nodes).
    pub fn new(to_bone: Mat4, matrices: Vec<Mat4>, rest_matrix: &Mat4) -> Self {
        assert!(
            matrices.len() >= 2,
            "B-Bone runtime needs at least 2 node matrices, got {}",
            matrices.len()
        );
        let dual_quats = matrices
            .iter()
            .map(|m| DualQuat::from_matrices(rest_matrix, m))
            .collect();
        Self {
            to_bone,
            matrices,
            dual_quats,
        }
    }

    /// Number of segments (one less than the node count).
    pub fn segments(&self) -> usize {
        self.matrices.len() - 1
    }

    /// Deform matrix of node `index`.
    pub fn matrix(&self, index: usize) -> &Mat4 {
        &self.matrices[index]
    }

    /// Dual quaternion of node `index`.
    pub fn dual_quat(&self, index: usize) -> &DualQuat {
        &self.dual_quats[index]
    }

    /// Locate a point along the bone: the first affecting node index and
    /// the blend factor toward the next node.
    ///
    /// The point's bone-local Y is scaled into segment units using the rest
    /// length; the integer part picks the node pair, the fractional part is
    /// the blend. Both are clamped, so points before the head or past the
    /// tail stick to the end segments.
    pub fn segment_index(&self, bone_length: f32, co: &Vec3) -> (usize, f32) {
        let y = transform_point(&self.to_bone, *co).y;

        let pre_blend = y * (self.segments() as f32 / bone_length);

        let index = (pre_blend.floor() as i32).clamp(0, self.segments() as i32 - 1);
        let blend = (pre_blend - index as f32).clamp(0.0, 1.0);

        (index as usize, blend)
    }
}

/// Evaluated runtime state of one bone in a pose.
#[derive(Debug, Clone)]
pub struct PoseChannel {
    /// The rest-state bone this channel animates.
    pub bone: Bone,
    /// Armature-space rest to armature-space posed transform.
    pub matrix: Mat4,
    /// Dual quaternion equivalent of `matrix`.
    pub dual_quat: DualQuat,
    /// B-Bone segment runtime, when evaluated upstream.
    pub bbone: Option<BBoneSegments>,
}

impl PoseChannel {
    /// Create a channel from an already-evaluated deform matrix.
    pub fn new(bone: Bone, matrix: Mat4) -> Self {
        let dual_quat = DualQuat::from_matrices(&bone.rest_matrix, &matrix);
        Self {
            bone,
            matrix,
            dual_quat,
            bbone: None,
        }
    }

    /// Create a channel from a bone-local to armature-space pose matrix,
    /// deriving the deform matrix against the bone's rest transform.
    pub fn from_pose_matrix(bone: Bone, pose_matrix: Mat4) -> Self {
        let rest_inv = bone.rest_matrix.try_inverse().unwrap_or_else(Mat4::identity);
        Self::new(bone, pose_matrix * rest_inv)
    }

    /// Attach B-Bone segment runtime data.
    pub fn with_bbone(mut self, bbone: BBoneSegments) -> Self {
        self.bbone = Some(bbone);
        self
    }

    /// The B-Bone runtime, when the bone is segmented and the runtime node
    /// count agrees with the bone's segment count.
    pub fn bbone_active(&self) -> Option<&BBoneSegments> {
        match &self.bbone {
            Some(bbone)
                if self.bone.segments > 1 && bbone.segments() == self.bone.segments as usize =>
            {
                Some(bbone)
            }
            _ => None,
        }
    }
}

/// The evaluated channel set of an armature.
#[derive(Debug, Clone, Default)]
pub struct Pose {
    /// One channel per bone.
    pub channels: Vec<PoseChannel>,
    /// Set by the pose owner when channels are out of date; deforming a
    /// pose with this bit set is a contract violation.
    pub needs_rebuild: bool,
}

impl Pose {
    /// Create a pose from evaluated channels.
    pub fn new(channels: Vec<PoseChannel>) -> Self {
        Self {
            channels,
            needs_rebuild: false,
        }
    }

    /// Find a channel by bone name.
    pub fn channel_by_name(&self, name: &str) -> Option<&PoseChannel> {
        self.channels.iter().find(|c| c.bone.name == name)
    }
}

/// A pose placed in the world.
#[derive(Debug, Clone)]
pub struct ArmatureObject {
    /// The evaluated pose.
    pub pose: Pose,
    /// Armature space to world space.
    pub object_to_world: Mat4,
}

impl ArmatureObject {
    /// Create an armature object at the world origin.
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            object_to_world: Mat4::identity(),
        }
    }

    /// Set the armature-to-world transform.
    pub fn with_object_to_world(mut self, object_to_world: Mat4) -> Self {
        self.object_to_world = object_to_world;
        self
    }
}
