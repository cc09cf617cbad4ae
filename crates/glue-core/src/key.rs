//! Cache-key codec: canonical, comparable projection of a [`FluidState`].
//!
//! Raw doubles are a poor cache key: two physically indistinguishable states
//! rarely agree bit-for-bit. Each field is therefore quantized to a fixed
//! number of significant decimal digits before keying, so states within
//! tolerance collapse onto the same grid point and hash equal, while states
//! differing beyond tolerance land on distinct points.

use sha2::{Digest, Sha256};

use crate::errors::DispatchError;
use crate::model::{FluidState, MAX_SPECIES};

/// A float snapped to the significant-digit grid, in exact integer form so
/// that equality and hashing carry no representation noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quantized {
    mantissa: i64,
    exponent: i32,
}

impl Quantized {
    fn from_f64(x: f64, digits: u8) -> Self {
        if x == 0.0 {
            return Self {
                mantissa: 0,
                exponent: 0,
            };
        }
        let digits = i32::from(digits);
        let magnitude = x.abs().log10().floor() as i32;
        let mut exponent = magnitude - digits + 1;
        let mut mantissa = (x / 10f64.powi(exponent)).round();
        // rounding can carry into one extra digit (e.g. 99999.6 -> 100000)
        if mantissa.abs() >= 10f64.powi(digits) {
            mantissa /= 10.0;
            exponent += 1;
        }
        Self {
            mantissa: mantissa as i64,
            exponent,
        }
    }

    pub fn to_f64(self) -> f64 {
        self.mantissa as f64 * 10f64.powi(self.exponent)
    }
}

/// Derived, hashable projection of a [`FluidState`] used for cache lookup.
///
/// Encoding is deterministic; tolerance-equivalent states compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    temperature: Quantized,
    density: [Quantized; MAX_SPECIES],
    charges: [Quantized; MAX_SPECIES],
}

impl StateKey {
    /// Quantize `state` onto the `digits`-significant-digit grid.
    ///
    /// Fails with `InvalidInput` on NaN/Inf before any store or solver access.
    pub fn encode(state: &FluidState, digits: u8) -> Result<Self, DispatchError> {
        state.validate()?;
        let q = |x: f64| Quantized::from_f64(x, digits);
        Ok(Self {
            temperature: q(state.temperature),
            density: state.density.map(q),
            charges: state.charges.map(q),
        })
    }

    /// Reconstruct an approximately-equal input state from the grid point.
    pub fn decode(&self) -> FluidState {
        FluidState {
            temperature: self.temperature.to_f64(),
            density: self.density.map(Quantized::to_f64),
            charges: self.charges.map(Quantized::to_f64),
        }
    }

    /// Sha256 hex digest over the canonical quantized encoding. Primary key
    /// in the persistent store.
    pub fn digest(&self) -> String {
        let mut h = Sha256::new();
        let mut feed = |q: &Quantized| {
            h.update(q.mantissa.to_le_bytes());
            h.update(q.exponent.to_le_bytes());
        };
        feed(&self.temperature);
        for q in &self.density {
            feed(q);
        }
        for q in &self.charges {
            feed(q);
        }
        hex::encode(h.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(temperature: f64) -> FluidState {
        FluidState::new(temperature, [1.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0])
    }

    #[test]
    fn test_encode_is_deterministic() {
        let s = state(300.0);
        let a = StateKey::encode(&s, 5).unwrap();
        let b = StateKey::encode(&s, 5).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_states_within_tolerance_share_a_key() {
        let a = StateKey::encode(&state(300.0), 5).unwrap();
        let b = StateKey::encode(&state(300.0000001), 5).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_states_beyond_tolerance_get_distinct_keys() {
        let a = StateKey::encode(&state(300.0), 5).unwrap();
        let b = StateKey::encode(&state(350.0), 5).unwrap();
        assert_ne!(a, b);
        assert_ne!(a.digest(), b.digest());

        let c = StateKey::encode(&state(1.0), 5).unwrap();
        let d = StateKey::encode(&state(1.001), 5).unwrap();
        assert_ne!(c, d);
    }

    #[test]
    fn test_density_and_charge_slots_participate() {
        let base = state(300.0);
        let mut other = base;
        other.density[1] = 0.5;
        let a = StateKey::encode(&base, 5).unwrap();
        let b = StateKey::encode(&other, 5).unwrap();
        assert_ne!(a, b);

        let mut charged = base;
        charged.charges[0] = 2.0;
        let c = StateKey::encode(&charged, 5).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        let mut s = state(f64::NAN);
        assert!(StateKey::encode(&s, 5).is_err());
        s.temperature = f64::NEG_INFINITY;
        assert!(StateKey::encode(&s, 5).is_err());
    }

    #[test]
    fn test_decode_round_trips_within_tolerance() {
        let s = FluidState::new(
            12345.678,
            [1.0e-3, 2.5, 0.0, 0.0],
            [1.0, -2.0, 0.0, 0.0],
        );
        let key = StateKey::encode(&s, 5).unwrap();
        let back = key.decode();
        assert!((back.temperature - s.temperature).abs() / s.temperature < 1e-4);
        assert!((back.density[0] - s.density[0]).abs() < 1e-7);
        assert_eq!(back.density[2], 0.0);
        // decoded state maps back to the same key
        assert_eq!(StateKey::encode(&back, 5).unwrap(), key);
    }

    #[test]
    fn test_quantize_handles_carry_and_signs() {
        let q = Quantized::from_f64(99999.6, 5);
        assert_eq!(q.to_f64(), 100000.0);

        let neg = Quantized::from_f64(-5.0, 5);
        assert_eq!(neg.to_f64(), -5.0);

        let zero = Quantized::from_f64(0.0, 5);
        let neg_zero = Quantized::from_f64(-0.0, 5);
        assert_eq!(zero, neg_zero);
    }
}
