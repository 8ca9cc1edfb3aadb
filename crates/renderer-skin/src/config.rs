pub const MAX_BONES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SkinConfig {
    /// Upper bound for the number of mesh-local bone slots.
    pub max_bones: usize,
    /// Label given to the GPU resources of the skin.
    pub label: String,
}

impl Default for SkinConfig {
    fn default() -> Self {
        Self {
            max_bones: MAX_BONES,
            label: String::from("Skin Uniform Buffer"),
        }
    }
}
