use glam::Mat4;

use crate::{bind_pose::InverseBindPose, bone_map::BoneMap, skeleton::Skeleton};

#[inline]
pub fn skinning_matrix(normalization: &Mat4, bone_transform: &Mat4, inverse_bind: &Mat4) -> Mat4 {
    *normalization * *bone_transform * *inverse_bind
}

/// Fill `out` with one skinning matrix per mesh-local slot.
///
/// Unused slots get the identity. The bone map must already be validated
/// against `skeleton`, and `inverse_bind_pose` must have the same length.
pub fn compute_skinning_matrices(
    normalization: &Mat4,
    skeleton: &dyn Skeleton,
    bone_map: &BoneMap,
    inverse_bind_pose: &InverseBindPose,
    out: &mut Vec<Mat4>,
) {
    debug_assert_eq!(bone_map.len(), inverse_bind_pose.len());
    out.clear();
    out.extend(
        inverse_bind_pose
            .matrices()
            .iter()
            .enumerate()
            .map(|(slot, inverse_bind)| match bone_map.global_index(slot) {
                Some(bone) => skinning_matrix(
                    normalization,
                    &skeleton.global_bone_transform(bone),
                    inverse_bind,
                ),
                None => Mat4::IDENTITY,
            }),
    );
}
