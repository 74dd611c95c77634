use smallvec::SmallVec;

pub mod cache;
pub mod chunk;
pub mod compress;
pub mod data_type;
pub mod encode;
pub mod engine;
pub mod index;
pub mod keys;
pub mod meta;
pub mod sample;
pub mod store;

const SHAPE_SMALLVEC_SIZE: usize = 6;

pub type CoordVec<T> = SmallVec<[T; SHAPE_SMALLVEC_SIZE]>;

/// Shape of a single sample. Arity is fixed per tensor.
pub type SampleShape = CoordVec<u64>;

pub type ArcArrayD<T> = ndarray::ArcArray<T, ndarray::IxDyn>;

/// Element count for a sample shape; the empty shape is a scalar.
pub fn shape_numel(shape: &[u64]) -> u64 {
    shape.iter().product()
}
