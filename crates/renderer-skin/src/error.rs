use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),
}

/// Rejected input. The target is left untouched when this is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgumentError {
    #[error("bone index {index} of slot {slot} is out of range, skeleton has {num_bones} bones")]
    BoneIndexOutOfRange {
        slot: usize,
        index: i32,
        num_bones: usize,
    },

    #[error("bone index {index} of slot {slot} is negative")]
    NegativeBoneIndex { slot: usize, index: i32 },

    #[error("{count} bones exceed the limit of {limit}")]
    TooManyBones { count: usize, limit: usize },

    #[error("expected {expected} matrices, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("{0} floats do not form whole 4x4 matrices")]
    PartialMatrix(usize),

    #[error("scale factor {0} is not finite")]
    NonFiniteScale(f32),

    #[error("shader declares no bone matrix block")]
    MissingBinding,

    #[error("node #{parent} is a descendant of node #{child}")]
    CyclicHierarchy { child: usize, parent: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("failed to allocate uniform block \"{label}\": {reason}")]
    Allocation { label: String, reason: String },

    #[error("uniform block of {size} bytes exceeds the device limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("failed to upload uniform block: {0}")]
    Upload(String),
}
