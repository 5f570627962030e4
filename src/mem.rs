//! Access to the contiguous storage behind vectors and matrices

/// Conversion to immutable slices
pub trait AsRawSlice<T> {
    fn as_raw_slice(&self) -> &[T];
}
