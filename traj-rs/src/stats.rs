//! Statistics functions

use anyhow::{format_err, Error};
use ndarray::prelude::*;
use ndarray::DataMut;
use ndarray_stats::errors::QuantileError;
use noisy_float::types::N64;
use num_traits::FromPrimitive;
use std::ops::{Add, Div};

/// Return the median. Sorts its argument in place.
pub fn median_mut<S, T>(xs: &mut ArrayBase<S, Ix1>) -> Result<T, QuantileError>
where
    S: DataMut<Elem = T>,
    T: Clone + Copy + Ord + FromPrimitive,
    T: Add<Output = T> + Div<Output = T>,
{
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    // strided views are sorted through a copy
    let copy = match xs.as_slice_mut() {
        Some(slice) => {
            slice.sort_unstable();
            None
        }
        None => {
            let mut v = xs.to_vec();
            v.sort_unstable();
            Some(v)
        }
    };
    let sorted: &[T] = match copy.as_deref() {
        Some(v) => v,
        None => xs.as_slice().ok_or(QuantileError::EmptyInput)?,
    };
    let n = sorted.len();
    Ok(if n % 2 == 0 {
        let two = T::from_u64(2).ok_or(QuantileError::EmptyInput)?;
        (sorted[n / 2] + sorted[n / 2 - 1]) / two
    } else {
        sorted[n / 2]
    })
}

/// Median of finite floats. Errors on empty input or NaN.
pub fn median(values: &[f64]) -> Result<f64, Error> {
    let mut xs = values
        .iter()
        .map(|&v| N64::try_new(v).ok_or_else(|| format_err!("cannot take the median of {}", v)))
        .collect::<Result<Array1<N64>, Error>>()?;
    let m = median_mut(&mut xs).map_err(|_| format_err!("cannot take the median of an empty list"))?;
    Ok(m.raw())
}
