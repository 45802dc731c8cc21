use std::{cmp::Ordering, fmt};

use alloy_primitives::U256;
use num_bigint::{BigInt, Sign};
use num_traits::{Pow, Signed, Zero};
use thiserror::Error;

/// Canonical decimal precision of the native token.
pub const DECIMALS: u8 = 18;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("cannot parse amount: {0}")]
    Malformed(String),
    #[error("amount {0} is below the smallest representable unit")]
    BelowResolution(String),
    #[error("amount does not fit the native unit range")]
    OutOfRange,
}

/// Fixed-point decimal token amount: an arbitrary-precision integer magnitude
/// scaled by `10^decimals`. Values are immutable; arithmetic produces new
/// values. Operands of differing precision are reconciled at [`DECIMALS`] by
/// round-tripping through the string representation, so a value too small to
/// represent at canonical precision cannot be normalized and surfaces as
/// [`AmountError::BelowResolution`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    magnitude: BigInt,
    decimals: u8,
}

fn pow10(decimals: u8) -> BigInt {
    BigInt::from(10u8).pow(decimals as u32)
}

impl Amount {
    /// Whole-token amount, e.g. `from_int(3)` is three tokens.
    pub fn from_int(value: impl Into<BigInt>) -> Amount {
        Amount {
            magnitude: value.into() * pow10(DECIMALS),
            decimals: DECIMALS,
        }
    }

    /// Wraps a raw native-unit magnitude at canonical precision.
    pub fn from_wei(wei: U256) -> Amount {
        Amount {
            magnitude: BigInt::from_bytes_be(Sign::Plus, &wei.to_be_bytes::<32>()),
            decimals: DECIMALS,
        }
    }

    pub fn with_decimals(magnitude: impl Into<BigInt>, decimals: u8) -> Amount {
        Amount {
            magnitude: magnitude.into(),
            decimals,
        }
    }

    pub fn to_wei(&self) -> Result<U256, AmountError> {
        if self.magnitude.is_negative() {
            return Err(AmountError::OutOfRange);
        }
        let (_, bytes) = self.magnitude.to_bytes_be();
        if bytes.len() > 32 {
            return Err(AmountError::OutOfRange);
        }
        Ok(U256::from_be_slice(&bytes))
    }

    /// Parses a decimal numeral, scales it by `10^18` and truncates to an
    /// integer magnitude. A non-zero input whose scaled value truncates to
    /// zero is an error, never silently zero.
    pub fn parse(input: &str) -> Result<Amount, AmountError> {
        let malformed = || AmountError::Malformed(input.to_string());

        let s = input.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(malformed());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        let nonzero_input = int_part.bytes().chain(frac_part.bytes()).any(|b| b != b'0');

        // scale to canonical precision, truncating fractional digits past it
        let kept = &frac_part[..frac_part.len().min(DECIMALS as usize)];
        let mut scaled = String::with_capacity(int_part.len() + 1 + DECIMALS as usize);
        scaled.push_str(if int_part.is_empty() { "0" } else { int_part });
        scaled.push_str(kept);
        for _ in kept.len()..DECIMALS as usize {
            scaled.push('0');
        }

        let mut magnitude: BigInt = scaled.parse().map_err(|_| malformed())?;
        if negative {
            magnitude = -magnitude;
        }

        if magnitude.is_zero() && nonzero_input {
            return Err(AmountError::BelowResolution(input.to_string()));
        }

        Ok(Amount {
            magnitude,
            decimals: DECIMALS,
        })
    }

    /// Round-trips through the string representation to canonical precision.
    pub fn normalized(&self) -> Result<Amount, AmountError> {
        Amount::parse(&self.to_string())
    }

    fn aligned(&self, other: &Amount) -> Result<(BigInt, BigInt, u8), AmountError> {
        if self.decimals == other.decimals {
            Ok((
                self.magnitude.clone(),
                other.magnitude.clone(),
                self.decimals,
            ))
        } else {
            let x = self.normalized()?;
            let y = other.normalized()?;
            Ok((x.magnitude, y.magnitude, DECIMALS))
        }
    }

    pub fn add(&self, other: &Amount) -> Result<Amount, AmountError> {
        let (x, y, decimals) = self.aligned(other)?;
        Ok(Amount {
            magnitude: x + y,
            decimals,
        })
    }

    pub fn sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        let (x, y, decimals) = self.aligned(other)?;
        Ok(Amount {
            magnitude: x - y,
            decimals,
        })
    }

    /// Fixed-point multiply: the magnitude product carries one factor of
    /// `10^decimals` too many and is rescaled by truncating division.
    pub fn mul(&self, other: &Amount) -> Result<Amount, AmountError> {
        let (x, y, decimals) = self.aligned(other)?;
        Ok(Amount {
            magnitude: (x * y) / pow10(decimals),
            decimals,
        })
    }

    pub fn compare(&self, other: &Amount) -> Result<Ordering, AmountError> {
        let (x, y, _) = self.aligned(other)?;
        Ok(x.cmp(&y))
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.magnitude.is_zero() {
            return f.write_str("0");
        }
        let scale = pow10(self.decimals);
        let abs = self.magnitude.abs();
        let int = &abs / &scale;
        let frac = &abs % &scale;
        let sign = if self.magnitude.is_negative() { "-" } else { "" };
        if frac.is_zero() {
            return write!(f, "{sign}{int}");
        }
        let frac = format!("{:0>width$}", frac.to_string(), width = self.decimals as usize);
        let frac = frac.trim_end_matches('0');
        write!(f, "{sign}{int}.{frac}")
    }
}
