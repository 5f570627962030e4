//! nnnorm provides the normalization components of a neural network training toolkit.
//!
//! Three components are available, all operating on minibatches given as matrices with one
//! frame per row, optionally split into blocks of `block_dim` columns that are normalized
//! like separate frames:
//!
//! * [`FixedScaleComponent`](component::FixedScaleComponent) rescales every block to a fixed
//!   root-mean-square value and keeps no state.
//! * [`BatchNormComponent`](component::BatchNormComponent) normalizes with the statistics of the
//!   current minibatch in training and with accumulated statistics in test mode.
//! * [`StreamingNormComponent`](component::StreamingNormComponent) normalizes with statistics
//!   accumulated over the whole training history.
//!
//! Components are created from configuration lines, driven through the
//! [`Component`](component::Component) trait, and saved or loaded in text or binary form
//! through [`persistence`].
pub mod error;
pub mod ope;
pub mod mem;
pub mod arr;
pub mod config;
pub mod persistence;
pub mod statistics;
pub mod component;
