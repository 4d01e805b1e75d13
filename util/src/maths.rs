//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    target_range.0
        + ((value - source_range.0)
        * (target_range.1 - target_range.0)
        / (source_range.1 - source_range.0))
}

/// Clamp `value` into the source range and then map it into the target range.
///
/// Values outside the source range map to the nearest end of the target range.
pub fn clamped_lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float
{
    let (lo, hi) = if source_range.0 <= source_range.1 {
        (source_range.0, source_range.1)
    }
    else {
        (source_range.1, source_range.0)
    };

    lin_map(source_range, target_range, clamp(&value, &lo, &hi))
}

/// Clamp a value between `min` and `max`.
///
/// NaN values are passed through unchanged.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Clamp a value to the symmetric range `[-limit, limit]`.
pub fn clamp_abs<T>(value: &T, limit: &T) -> T
where
    T: Float
{
    let limit = limit.abs();
    clamp(value, &-limit, &limit)
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Wrap an angle into the range [-pi, pi).
pub fn wrap_pi<T>(angle: T) -> T
where
    T: Float
{
    let pi_t: T = T::from(std::f64::consts::PI).unwrap_or_else(T::zero);
    let tau_t = pi_t + pi_t;

    rem_euclid(angle + pi_t, tau_t) - pi_t
}
