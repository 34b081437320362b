//! Vertex-group weights and the per-vertex sources the batch entry
//! points read them through.

/// One weighted group membership of a vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexGroupWeight {
    /// Index into the target's group-name list.
    pub group: u32,
    /// Membership weight.
    pub weight: f32,
}

impl VertexGroupWeight {
    pub fn new(group: u32, weight: f32) -> Self {
        Self { group, weight }
    }
}

/// All group memberships of one vertex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeformVert {
    pub weights: Vec<VertexGroupWeight>,
}

impl DeformVert {
    pub fn new(weights: Vec<VertexGroupWeight>) -> Self {
        Self { weights }
    }

    /// Weight of `group`, or 0 when the vertex is not a member.
    pub fn weight_for_group(&self, group: u32) -> f32 {
        self.weights
            .iter()
            .find(|w| w.group == group)
            .map_or(0.0, |w| w.weight)
    }
}

/// Resolve a group name to its index in the target's name list.
///
/// An empty name resolves to `None`; it is the conventional "no group"
/// value for the overall-influence group.
pub fn group_index(names: &[String], name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    names.iter().position(|n| n == name)
}

/// Per-vertex weight lookup shared by the batch entry points.
///
/// The three target shapes (plain buffers, meshes, edit meshes) store
/// weights differently; the kernel only ever asks for one vertex at a
/// time. Out-of-range indices yield `None`.
pub trait DeformVertSource: Sync {
    fn deform_vert(&self, index: usize) -> Option<&DeformVert>;
}

/// Weights stored densely, one entry per vertex.
#[derive(Debug, Clone, Copy)]
pub struct SliceSource<'a>(pub &'a [DeformVert]);

impl DeformVertSource for SliceSource<'_> {
    fn deform_vert(&self, index: usize) -> Option<&DeformVert> {
        self.0.get(index)
    }
}

/// Per-element optional layer, as edit meshes store it.
#[derive(Debug, Clone, Copy)]
pub struct LayerSource<'a>(pub &'a [Option<DeformVert>]);

impl DeformVertSource for LayerSource<'_> {
    fn deform_vert(&self, index: usize) -> Option<&DeformVert> {
        self.0.get(index).and_then(|v| v.as_ref())
    }
}

/// A target without vertex-group storage.
#[derive(Debug, Clone, Copy)]
pub struct NoSource;

impl DeformVertSource for NoSource {
    fn deform_vert(&self, _index: usize) -> Option<&DeformVert> {
        None
    }
}

/// Deform inputs of a mesh target.
#[derive(Debug, Clone, Copy)]
pub struct MeshDeformData<'a> {
    /// Group names, indexed by [`VertexGroupWeight::group`].
    pub groups: &'a [String],
    /// Per-vertex weights; empty when the mesh carries none.
    pub deform_verts: &'a [DeformVert],
}

/// Deform inputs of an edit-mesh target.
#[derive(Debug, Clone, Copy)]
pub struct EditMeshDeformData<'a> {
    /// Group names, indexed by [`VertexGroupWeight::group`].
    pub groups: &'a [String],
    /// Per-element weight layer; `None` when the layer is absent.
    pub deform_verts: Option<&'a [Option<DeformVert>]>,
}
