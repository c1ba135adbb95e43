use std::{
    convert::TryFrom,
    ops::{Add, Div},
};

#[allow(unused_macros)]
macro_rules! time_info {
    ($name:expr, $f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();
        log::info!("{} (took {:?})", $name, end.duration_since(start));
        result
    }};
}

macro_rules! time_debug {
    ($name:expr, $f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();
        log::debug!("{} (took {:?})", $name, end.duration_since(start));
        result
    }};
}

#[allow(unused_macros)]
macro_rules! time_trace {
    ($name:expr, $f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();
        log::trace!("{} (took {:?})", $name, end.duration_since(start));
        result
    }};
}

macro_rules! time {
    ($f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();

        (result, end.duration_since(start))
    }};
}

pub fn mean<T>(data: &[T]) -> Option<T>
where
    T: Copy + Default + Add<T, Output = T> + Div<T, Output = T> + TryFrom<usize> + Ord,
{
    if let Ok(len) = T::try_from(data.len()) {
        if len == T::default() {
            None
        } else {
            let sum = data.iter().fold(T::default(), |acc, x| acc + *x);

            Some(sum / len)
        }
    } else {
        None
    }
}

pub fn median_of_sorted<T>(data: &[T]) -> Option<T>
where
    T: Add<T, Output = T> + Div<T, Output = T> + From<u32> + Copy,
{
    let size = data.len();

    match size {
        0 => None,
        even if even % 2 == 0 => {
            let fst_med = data[(size / 2) - 1];
            let snd_med = data[size / 2];

            Some((fst_med + snd_med) / T::from(2))
        }
        odd => Some(data[odd / 2]),
    }
}
