use glam::Mat4;

use crate::error::{ArgumentError, Result};

pub const FLOATS_PER_MATRIX: usize = 16;

/// Inverse bind matrices, one per mesh-local bone slot.
///
/// The length is fixed at construction; callers replace the whole store when
/// the number of slots changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InverseBindPose {
    matrices: Vec<Mat4>,
}

impl InverseBindPose {
    pub fn identity(len: usize) -> Self {
        Self {
            matrices: vec![Mat4::IDENTITY; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn matrices(&self) -> &[Mat4] {
        &self.matrices
    }

    pub fn set(&mut self, matrices: &[Mat4]) -> Result<()> {
        self.check_len(matrices.len())?;
        self.matrices.copy_from_slice(matrices);
        Ok(())
    }

    /// `data` holds column-major matrices back to back.
    pub fn set_from_floats(&mut self, data: &[f32]) -> Result<()> {
        let count = matrix_count(data.len())?;
        self.check_len(count)?;
        for (matrix, cols) in self
            .matrices
            .iter_mut()
            .zip(data.chunks_exact(FLOATS_PER_MATRIX))
        {
            *matrix = Mat4::from_cols_slice(cols);
        }
        Ok(())
    }

    pub fn copy_to_floats(&self, out: &mut [f32]) -> Result<()> {
        let count = matrix_count(out.len())?;
        self.check_len(count)?;
        for (matrix, cols) in self
            .matrices
            .iter()
            .zip(out.chunks_exact_mut(FLOATS_PER_MATRIX))
        {
            matrix.write_cols_to_slice(cols);
        }
        Ok(())
    }

    /// Scale the translation column of every matrix, leaving rotation and
    /// scale untouched.
    pub fn scale_positions(&mut self, factor: f32) -> Result<()> {
        if !factor.is_finite() {
            return Err(ArgumentError::NonFiniteScale(factor).into());
        }
        for matrix in &mut self.matrices {
            matrix.w_axis.x *= factor;
            matrix.w_axis.y *= factor;
            matrix.w_axis.z *= factor;
        }
        Ok(())
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual != self.matrices.len() {
            return Err(ArgumentError::LengthMismatch {
                expected: self.matrices.len(),
                actual,
            }
            .into());
        }
        Ok(())
    }
}

fn matrix_count(floats: usize) -> Result<usize> {
    if floats % FLOATS_PER_MATRIX != 0 {
        return Err(ArgumentError::PartialMatrix(floats).into());
    }
    Ok(floats / FLOATS_PER_MATRIX)
}
