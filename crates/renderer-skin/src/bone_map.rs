use crate::error::{ArgumentError, Result};

/// Marks a mesh-local slot that is not driven by any bone.
pub const UNUSED_BONE: i32 = -1;

/// Mesh-local bone slot -> global skeleton bone index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoneMap {
    indices: Vec<i32>,
}

impl BoneMap {
    /// Range checks are skipped when `num_skeleton_bones` is unknown; call
    /// [`BoneMap::validate`] once a skeleton is available.
    pub fn new(indices: &[i32], max_bones: usize, num_skeleton_bones: Option<usize>) -> Result<Self> {
        if indices.len() > max_bones {
            return Err(ArgumentError::TooManyBones {
                count: indices.len(),
                limit: max_bones,
            }
            .into());
        }
        let bone_map = Self {
            indices: indices.to_vec(),
        };
        bone_map.check(num_skeleton_bones)?;
        Ok(bone_map)
    }

    pub fn validate(&self, num_skeleton_bones: usize) -> Result<()> {
        self.check(Some(num_skeleton_bones))
    }

    fn check(&self, num_skeleton_bones: Option<usize>) -> Result<()> {
        for (slot, &index) in self.indices.iter().enumerate() {
            if index == UNUSED_BONE {
                continue;
            }
            if index < 0 {
                return Err(ArgumentError::NegativeBoneIndex { slot, index }.into());
            }
            if let Some(num_bones) = num_skeleton_bones {
                if index as usize >= num_bones {
                    return Err(ArgumentError::BoneIndexOutOfRange {
                        slot,
                        index,
                        num_bones,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.indices
    }

    /// `None` for unused slots and slots past the end.
    pub fn global_index(&self, slot: usize) -> Option<usize> {
        self.indices
            .get(slot)
            .and_then(|&index| usize::try_from(index).ok())
    }
}
