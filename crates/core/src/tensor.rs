//! Non-owning 2-D tensor views
//!
//! A view borrows a caller-owned buffer and reinterprets its first
//! `rows * cols` elements as a row-major matrix. Views are created per batch
//! tile and dropped at the end of the tile; they never allocate.

use ndarray::{ArrayView2, ArrayViewMut2};

use crate::error::{CoreError, Result};

/// Read-only row-major view
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a, E> {
    rows: usize,
    cols: usize,
    data: &'a [E],
}

impl<'a, E> TensorView<'a, E> {
    /// Create a view over the first `rows * cols` elements of `data`
    pub fn new(rows: usize, cols: usize, data: &'a [E]) -> Result<Self> {
        let len = checked_len(rows, cols, data.len())?;
        Ok(Self {
            rows,
            cols,
            data: &data[..len],
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Extent along `axis` (0 = rows, 1 = cols)
    pub fn dim(&self, axis: usize) -> usize {
        match axis {
            0 => self.rows,
            _ => self.cols,
        }
    }

    pub fn element_num(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &'a [E] {
        self.data
    }

    pub fn as_array(&self) -> Result<ArrayView2<'a, E>> {
        Ok(ArrayView2::from_shape((self.rows, self.cols), self.data)?)
    }
}

/// Mutable row-major view
#[derive(Debug)]
pub struct TensorViewMut<'a, E> {
    rows: usize,
    cols: usize,
    data: &'a mut [E],
}

impl<'a, E> TensorViewMut<'a, E> {
    /// Create a view over the first `rows * cols` elements of `data`
    pub fn new(rows: usize, cols: usize, data: &'a mut [E]) -> Result<Self> {
        let len = checked_len(rows, cols, data.len())?;
        Ok(Self {
            rows,
            cols,
            data: &mut data[..len],
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn dim(&self, axis: usize) -> usize {
        match axis {
            0 => self.rows,
            _ => self.cols,
        }
    }

    pub fn element_num(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[E] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [E] {
        &mut *self.data
    }

    pub fn as_view(&self) -> TensorView<'_, E> {
        TensorView {
            rows: self.rows,
            cols: self.cols,
            data: &*self.data,
        }
    }

    pub fn as_array_mut(&mut self) -> Result<ArrayViewMut2<'_, E>> {
        Ok(ArrayViewMut2::from_shape(
            (self.rows, self.cols),
            &mut *self.data,
        )?)
    }
}

fn checked_len(rows: usize, cols: usize, len: usize) -> Result<usize> {
    match rows.checked_mul(cols) {
        Some(n) if n <= len => Ok(n),
        _ => Err(CoreError::ViewOutOfBounds { rows, cols, len }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_clips_to_shape() {
        let buffer = vec![1.0f32; 12];
        let view = TensorView::new(2, 3, &buffer).unwrap();
        assert_eq!(view.element_num(), 6);
        assert_eq!(view.dim(0), 2);
        assert_eq!(view.dim(1), 3);
    }

    #[test]
    fn test_view_rejects_oversized_shape() {
        let buffer = vec![0.0f32; 5];
        let err = TensorView::new(2, 3, &buffer).unwrap_err();
        assert!(matches!(err, CoreError::ViewOutOfBounds { len: 5, .. }));
    }

    #[test]
    fn test_view_rejects_overflowing_shape() {
        let buffer = vec![0.0f32; 4];
        assert!(TensorView::new(usize::MAX, 2, &buffer).is_err());
    }

    #[test]
    fn test_mut_view_writes_through() {
        let mut buffer = vec![0.0f64; 8];
        {
            let mut view = TensorViewMut::new(2, 2, &mut buffer).unwrap();
            let mut array = view.as_array_mut().unwrap();
            array[[1, 0]] = 7.0;
        }
        assert_eq!(buffer[2], 7.0);
        assert_eq!(buffer[4], 0.0);
    }

    #[test]
    fn test_array_is_row_major() {
        let buffer: Vec<f32> = (0..6).map(|v| v as f32).collect();
        let view = TensorView::new(2, 3, &buffer).unwrap();
        let array = view.as_array().unwrap();
        assert_eq!(array[[1, 2]], 5.0);
        assert_eq!(array[[0, 1]], 1.0);
    }
}
