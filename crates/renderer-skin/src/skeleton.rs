use std::sync::{Arc, PoisonError, RwLock};

use glam::Mat4;
use log::warn;

use crate::{
    error::{ArgumentError, Result},
    scene::Node,
};

/// Source of the current bone pose.
///
/// Transforms are expressed in the space of [`Skeleton::root_node`]. The
/// skeleton caches its own forward kinematics; a skin queries every bone it
/// maps once per update.
pub trait Skeleton: Send + Sync {
    fn num_bones(&self) -> usize;
    fn global_bone_transform(&self, index: usize) -> Mat4;
    fn root_node(&self) -> Arc<Node>;
}

/// Skeleton whose pose is written by an animation pass.
#[derive(Debug)]
pub struct PoseSkeleton {
    root: Arc<Node>,
    pose: RwLock<Vec<Mat4>>,
}

impl PoseSkeleton {
    pub fn new(root: Arc<Node>, num_bones: usize) -> Self {
        Self {
            root,
            pose: RwLock::new(vec![Mat4::IDENTITY; num_bones]),
        }
    }

    pub fn pose(&self) -> Vec<Mat4> {
        self.pose
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_pose(&self, transforms: &[Mat4]) -> Result<()> {
        let mut pose = self.pose.write().unwrap_or_else(PoisonError::into_inner);
        if transforms.len() != pose.len() {
            return Err(ArgumentError::LengthMismatch {
                expected: pose.len(),
                actual: transforms.len(),
            }
            .into());
        }
        pose.copy_from_slice(transforms);
        Ok(())
    }

    pub fn set_bone_transform(&self, index: usize, transform: Mat4) -> Result<()> {
        let mut pose = self.pose.write().unwrap_or_else(PoisonError::into_inner);
        let num_bones = pose.len();
        match pose.get_mut(index) {
            Some(item) => {
                *item = transform;
                Ok(())
            }
            None => Err(ArgumentError::BoneIndexOutOfRange {
                slot: index,
                index: i32::try_from(index).unwrap_or(i32::MAX),
                num_bones,
            }
            .into()),
        }
    }
}

impl Skeleton for PoseSkeleton {
    fn num_bones(&self) -> usize {
        self.pose.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn global_bone_transform(&self, index: usize) -> Mat4 {
        let pose = self.pose.read().unwrap_or_else(PoisonError::into_inner);
        match pose.get(index) {
            Some(transform) => *transform,
            None => {
                warn!(
                    "Bone #{} requested from a skeleton with {} bones",
                    index,
                    pose.len()
                );
                Mat4::IDENTITY
            }
        }
    }

    fn root_node(&self) -> Arc<Node> {
        self.root.clone()
    }
}
