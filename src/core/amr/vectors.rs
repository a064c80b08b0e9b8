/// Helpers for whole-day half-hourly vectors.
use crate::core::units::SLOTS_PER_DAY;
use std::borrow::Cow;

pub type X48 = [f64; SLOTS_PER_DAY];

pub const ZERO_X48: X48 = [0.0; SLOTS_PER_DAY];

pub fn add_x48(first: &X48, second: &X48) -> X48 {
    std::array::from_fn(|i| first[i] + second[i])
}

pub fn subtract_x48(first: &X48, second: &X48) -> X48 {
    std::array::from_fn(|i| first[i] - second[i])
}

pub fn multiply_x48(first: &X48, second: &X48) -> X48 {
    std::array::from_fn(|i| first[i] * second[i])
}

pub fn scale_x48(vector: &X48, scalar: f64) -> X48 {
    std::array::from_fn(|i| vector[i] * scalar)
}

pub fn min_x48(first: &X48, second: &X48) -> X48 {
    std::array::from_fn(|i| first[i].min(second[i]))
}

pub fn total_x48(vector: &X48) -> f64 {
    vector.iter().sum()
}

/// Sum any number of vectors. A single vector is handed back borrowed rather than copied.
pub fn sum_x48<'a>(vectors: &[&'a X48]) -> Cow<'a, X48> {
    match vectors {
        [] => Cow::Owned(ZERO_X48),
        [only] => Cow::Borrowed(*only),
        [first, rest @ ..] => Cow::Owned(
            rest.iter()
                .fold(**first, |total, vector| add_x48(&total, vector)),
        ),
    }
}

/// A weighting vector that is 1 in the half-open slot window `[from_slot, to_slot)` and 0
/// elsewhere. A window with `to_slot < from_slot` wraps across midnight.
pub fn window_weights_x48(from_slot: usize, to_slot: usize) -> X48 {
    std::array::from_fn(|i| {
        let inside = if from_slot <= to_slot {
            i >= from_slot && i < to_slot
        } else {
            i >= from_slot || i < to_slot
        };
        if inside {
            1.0
        } else {
            0.0
        }
    })
}
