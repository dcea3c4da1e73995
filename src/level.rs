//! Decibel/linear gain conversion.
//!
//! Everything below [`DB_FLOOR`] is treated as silence: `db_to_linear`
//! clamps to exactly `0.0` and `linear_to_db` clamps to exactly
//! [`DB_FLOOR`], which keeps denormals and `-inf` out of the gain path.

/// Floor of audibility in dB. At or below this, gain is exactly zero.
pub const DB_FLOOR: f32 = -80.0;

/// Convert a gain in dB to a linear multiplier: `10^(db/20)`.
pub fn db_to_linear(db: f32) -> f32 {
    if db <= DB_FLOOR {
        0.0
    } else {
        10.0f32.powf(db / 20.0)
    }
}

/// Convert a linear multiplier to a gain in dB: `20 * log10(linear)`.
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        return DB_FLOOR;
    }
    let db = 20.0 * linear.log10();
    db.max(DB_FLOOR)
}
