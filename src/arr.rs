//! Owned vectors and row-major matrices used as activation buffers
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice::Chunks;
use rayon::prelude::{ParallelSlice, ParallelSliceMut};
use rayon::slice::{ChunksExact as ParChunksExact, ChunksExactMut as ParChunksExactMut};
use crate::error::SizeMismatchError;
use crate::mem::AsRawSlice;

/// Fixed-length vector whose length is decided at run time
#[derive(Debug,Clone,PartialEq)]
pub struct Arr<T> where T: Default {
    arr:Box<[T]>
}
impl<T> Arr<T> where T: Default {
    /// Create an instance of length `len` filled with `T::default()`
    pub fn new(len:usize) -> Arr<T> {
        let mut arr = Vec::with_capacity(len);
        arr.resize_with(len,Default::default);

        Arr {
            arr:arr.into_boxed_slice()
        }
    }
}
impl<T> Default for Arr<T> where T: Default {
    fn default() -> Self {
        Arr::new(0)
    }
}
impl<T> Deref for Arr<T> where T: Default {
    type Target = Box<[T]>;
    fn deref(&self) -> &Self::Target {
        &self.arr
    }
}
impl<T> DerefMut for Arr<T> where T: Default  {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.arr
    }
}
impl<T> From<Vec<T>> for Arr<T> where T: Default {
    fn from(v: Vec<T>) -> Self {
        Arr {
            arr:v.into_boxed_slice()
        }
    }
}
impl<T> AsRawSlice<T> for Arr<T> where T: Default {
    fn as_raw_slice(&self) -> &[T] {
        &self.arr
    }
}
/// Row-major matrix, rows = frames, columns = feature dimensions
#[derive(Debug,Clone,PartialEq)]
pub struct Matrix<T> where T: Default {
    rows:usize,
    cols:usize,
    arr:Box<[T]>
}
impl<T> Matrix<T> where T: Default {
    /// Create a zero (`T::default()`) filled matrix
    pub fn new(rows:usize,cols:usize) -> Matrix<T> {
        let mut arr = Vec::with_capacity(rows * cols);
        arr.resize_with(rows * cols,Default::default);

        Matrix {
            rows:rows,
            cols:cols,
            arr:arr.into_boxed_slice()
        }
    }

    /// Create a matrix from row-major data
    /// # Errors
    ///
    /// This function may return the following errors
    /// * [`SizeMismatchError`]
    pub fn from_vec(rows:usize,cols:usize,v:Vec<T>) -> Result<Matrix<T>,SizeMismatchError> {
        if v.len() != rows * cols {
            Err(SizeMismatchError(rows * cols,v.len()))
        } else {
            Ok(Matrix {
                rows:rows,
                cols:cols,
                arr:v.into_boxed_slice()
            })
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self,r:usize) -> &[T] {
        &self.arr[r * self.cols..(r + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> Chunks<'_,T> {
        self.arr.chunks(self.cols.max(1))
    }

    /// Iterate the frames obtained by splitting every row into consecutive blocks of `block_dim` columns.
    ///
    /// Because storage is contiguous this is a plain reinterpretation of the matrix as
    /// `rows * cols / block_dim` rows of width `block_dim`.
    pub fn frames(&self,block_dim:usize) -> Chunks<'_,T> {
        self.arr.chunks(block_dim.max(1))
    }

    /// Number of frames of width `block_dim`
    pub fn num_frames(&self,block_dim:usize) -> usize {
        if block_dim == 0 {
            0
        } else {
            self.arr.len() / block_dim
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        self.arr.into_vec()
    }
}
impl<T> Matrix<T> where T: Default + Send + Sync {
    pub fn par_frames(&self,block_dim:usize) -> ParChunksExact<'_,T> {
        self.arr.par_chunks_exact(block_dim.max(1))
    }

    pub fn par_frames_mut(&mut self,block_dim:usize) -> ParChunksExactMut<'_,T> {
        self.arr.par_chunks_exact_mut(block_dim.max(1))
    }
}
impl<T> Index<(usize,usize)> for Matrix<T> where T: Default {
    type Output = T;

    fn index(&self, (r,c): (usize,usize)) -> &Self::Output {
        &self.arr[r * self.cols + c]
    }
}
impl<T> IndexMut<(usize,usize)> for Matrix<T> where T: Default {
    fn index_mut(&mut self, (r,c): (usize,usize)) -> &mut Self::Output {
        &mut self.arr[r * self.cols + c]
    }
}
impl<T> AsRawSlice<T> for Matrix<T> where T: Default {
    fn as_raw_slice(&self) -> &[T] {
        &self.arr
    }
}
impl<T> TryFrom<Vec<Vec<T>>> for Matrix<T> where T: Default {
    type Error = SizeMismatchError;

    /// Every row must have the length of the first one
    fn try_from(rows: Vec<Vec<T>>) -> Result<Self,Self::Error> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len();

        if let Some(r) = rows.iter().find(|r| r.len() != cols) {
            return Err(SizeMismatchError(cols,r.len()));
        }

        let arr = rows.into_iter().flatten().collect::<Vec<T>>();

        Ok(Matrix {
            rows:n,
            cols:cols,
            arr:arr.into_boxed_slice()
        })
    }
}
