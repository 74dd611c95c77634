use ndarray::{Axis, Slice};
use thiserror::Error;

use crate::ArcArrayD;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index {index} out of bounds for axis of length {length}")]
    OutOfBounds { index: i64, length: u64 },
    #[error("span step must be positive, got {0}")]
    Step(i64),
    #[error("index has {entries} subscripts but samples have {ndim} dimensions")]
    TooDeep { entries: usize, ndim: usize },
}

/// One subscript of an index expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEntry {
    /// Single position; its axis is squeezed away.
    At(i64),
    /// Half-open range with stride; `None` bounds mean the axis extremes.
    Span {
        start: Option<i64>,
        stop: Option<i64>,
        step: i64,
    },
    /// Explicit positions, kept in the given order.
    Picks(Vec<i64>),
}

impl IndexEntry {
    pub fn full() -> Self {
        Self::Span {
            start: None,
            stop: None,
            step: 1,
        }
    }

    pub fn is_at(&self) -> bool {
        matches!(self, Self::At(_))
    }

    /// Positions selected along an axis of the given length.
    ///
    /// `At` and `Picks` positions must be in bounds (negative counts from
    /// the end); `Span` bounds clamp, as in slicing conventions.
    pub fn indices(&self, length: u64) -> Result<Vec<u64>, IndexError> {
        match self {
            Self::At(i) => Ok(vec![resolve(*i, length)?]),
            Self::Span { start, stop, step } => {
                if *step < 1 {
                    return Err(IndexError::Step(*step));
                }
                let lo = clamp(start.unwrap_or(0), length);
                let hi = clamp(stop.unwrap_or(length as i64), length);
                Ok((lo..hi.max(lo)).step_by(*step as usize).collect())
            }
            Self::Picks(picks) => picks.iter().map(|i| resolve(*i, length)).collect(),
        }
    }
}

fn resolve(i: i64, length: u64) -> Result<u64, IndexError> {
    let n = length as i64;
    let j = if i < 0 { i + n } else { i };
    if j < 0 || j >= n {
        Err(IndexError::OutOfBounds { index: i, length })
    } else {
        Ok(j as u64)
    }
}

fn clamp(i: i64, length: u64) -> u64 {
    let n = length as i64;
    let j = if i < 0 { i + n } else { i };
    j.clamp(0, n) as u64
}

/// An index expression over a tensor.
///
/// The first entry selects samples; the rest subscript each sample's own
/// axes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub values: Vec<IndexEntry>,
}

impl Index {
    pub fn new(values: Vec<IndexEntry>) -> Self {
        Self { values }
    }

    /// Every sample, whole.
    pub fn all() -> Self {
        Self::new(vec![IndexEntry::full()])
    }

    /// A single sample, whole.
    pub fn at(i: i64) -> Self {
        Self::new(vec![IndexEntry::At(i)])
    }

    /// The entry selecting samples.
    pub fn sample_entry(&self) -> IndexEntry {
        self.values.first().cloned().unwrap_or_else(IndexEntry::full)
    }

    /// Apply the per-sample subscripts to each sample, keeping squeezed
    /// axes as length 1 so entry positions keep lining up with axes.
    pub fn apply<T: Clone>(
        &self,
        samples: Vec<ArcArrayD<T>>,
    ) -> Result<Vec<ArcArrayD<T>>, IndexError> {
        let entries = if self.values.len() > 1 {
            &self.values[1..]
        } else {
            return Ok(samples);
        };
        samples
            .into_iter()
            .map(|mut sample| {
                if entries.len() > sample.ndim() {
                    return Err(IndexError::TooDeep {
                        entries: entries.len(),
                        ndim: sample.ndim(),
                    });
                }
                for (axis, entry) in entries.iter().enumerate() {
                    let length = sample.shape()[axis] as u64;
                    sample = match entry {
                        IndexEntry::At(i) => {
                            let pos = resolve(*i, length)? as isize;
                            sample
                                .slice_axis(Axis(axis), Slice::new(pos, Some(pos + 1), 1))
                                .to_owned()
                                .into_shared()
                        }
                        IndexEntry::Span { start, stop, step } => {
                            if *step < 1 {
                                return Err(IndexError::Step(*step));
                            }
                            let lo = clamp(start.unwrap_or(0), length);
                            let hi = clamp(stop.unwrap_or(length as i64), length).max(lo);
                            sample
                                .slice_axis(
                                    Axis(axis),
                                    Slice::new(lo as isize, Some(hi as isize), *step as isize),
                                )
                                .to_owned()
                                .into_shared()
                        }
                        IndexEntry::Picks(picks) => {
                            let positions = picks
                                .iter()
                                .map(|i| resolve(*i, length).map(|p| p as usize))
                                .collect::<Result<Vec<_>, _>>()?;
                            sample.select(Axis(axis), &positions).into_shared()
                        }
                    };
                }
                Ok(sample)
            })
            .collect()
    }

    /// Drop the length-1 axes that `At` subscripts left behind.
    pub fn apply_squeeze<T: Clone>(&self, samples: Vec<ArcArrayD<T>>) -> Vec<ArcArrayD<T>> {
        samples
            .into_iter()
            .map(|mut sample| {
                for (axis, entry) in self.values.iter().skip(1).enumerate().rev() {
                    if entry.is_at() && sample.ndim() > axis && sample.shape()[axis] == 1 {
                        sample = sample.index_axis_move(Axis(axis), 0);
                    }
                }
                sample
            })
            .collect()
    }

    /// As [Index::apply_squeeze], for samples stacked on a leading axis;
    /// also squeezes that axis when the sample entry is an `At`.
    pub fn apply_squeeze_stacked<T: Clone>(&self, mut arr: ArcArrayD<T>) -> ArcArrayD<T> {
        for (j, entry) in self.values.iter().skip(1).enumerate().rev() {
            let axis = j + 1;
            if entry.is_at() && arr.ndim() > axis && arr.shape()[axis] == 1 {
                arr = arr.index_axis_move(Axis(axis), 0);
            }
        }
        if self.sample_entry().is_at() && arr.ndim() > 0 && arr.shape()[0] == 1 {
            arr = arr.index_axis_move(Axis(0), 0);
        }
        arr
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn at_resolves_negatives() {
        assert_eq!(IndexEntry::At(0).indices(5).unwrap(), vec![0]);
        assert_eq!(IndexEntry::At(-1).indices(5).unwrap(), vec![4]);
        assert!(IndexEntry::At(5).indices(5).is_err());
        assert!(IndexEntry::At(-6).indices(5).is_err());
    }

    #[test]
    fn spans_clamp_like_slices() {
        assert_eq!(IndexEntry::full().indices(4).unwrap(), vec![0, 1, 2, 3]);
        let e = IndexEntry::Span {
            start: Some(1),
            stop: Some(100),
            step: 2,
        };
        assert_eq!(e.indices(6).unwrap(), vec![1, 3, 5]);
        let backwards = IndexEntry::Span {
            start: Some(4),
            stop: Some(2),
            step: 1,
        };
        assert_eq!(backwards.indices(6).unwrap(), Vec::<u64>::new());
        let bad_step = IndexEntry::Span {
            start: None,
            stop: None,
            step: 0,
        };
        assert!(bad_step.indices(6).is_err());
    }

    #[test]
    fn picks_keep_order() {
        let e = IndexEntry::Picks(vec![3, 0, -1]);
        assert_eq!(e.indices(4).unwrap(), vec![3, 0, 3]);
        assert!(IndexEntry::Picks(vec![9]).indices(4).is_err());
    }

    #[test]
    fn apply_subscripts_sample_axes() {
        let sample = array![[1, 2, 3], [4, 5, 6]].into_dyn().into_shared();
        let index = Index::new(vec![
            IndexEntry::full(),
            IndexEntry::At(1),
            IndexEntry::Span {
                start: Some(1),
                stop: None,
                step: 1,
            },
        ]);
        let applied = index.apply(vec![sample]).unwrap();
        assert_eq!(applied[0].shape(), &[1, 2]);
        assert_eq!(applied[0].iter().copied().collect::<Vec<_>>(), vec![5, 6]);

        let squeezed = index.apply_squeeze(applied);
        assert_eq!(squeezed[0].shape(), &[2]);
    }

    #[test]
    fn too_many_subscripts_rejected() {
        let sample = array![1, 2, 3].into_dyn().into_shared();
        let index = Index::new(vec![IndexEntry::full(), IndexEntry::At(0), IndexEntry::At(0)]);
        assert!(matches!(
            index.apply(vec![sample]),
            Err(IndexError::TooDeep { .. })
        ));
    }

    #[test]
    fn stacked_squeeze_drops_the_sample_axis_for_at() {
        let arr = array![[7, 8]].into_dyn().into_shared(); // one sample of shape (2,)
        let squeezed = Index::at(0).apply_squeeze_stacked(arr);
        assert_eq!(squeezed.shape(), &[2]);

        let arr = array![[7, 8]].into_dyn().into_shared();
        let kept = Index::all().apply_squeeze_stacked(arr);
        assert_eq!(kept.shape(), &[1, 2]);
    }
}
