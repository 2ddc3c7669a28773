//! Fixed-point tonnage type.
//!
//! # Scale
//!
//! All stock quantities use a 1e-6 fixed-point representation stored as
//! `i64`: 1 tonne = `Qty::new(1_000_000)`.  Fractional tonnage (bulk cargo
//! weighed at the quay) is exact to the gram.
//!
//! `Qty` wraps the raw `i64` so the type system keeps tonnage apart from
//! sequence numbers, row ids and other integers:
//! - No `From<i64>` impl; construction is explicit via [`Qty::new`] or
//!   [`Qty::tonnes`].
//! - Arithmetic is closed over `Qty`.
//!
//! # Text form
//!
//! `Display` renders six decimal places (`"12.500000"`).  Parsing accepts
//! anything from `"12"` to `"12.500000"`; more than six fractional digits is
//! rejected rather than rounded.  Serde uses the text form, and also accepts
//! a bare integer as whole tonnes.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed-point scale: 1 tonne = 1_000_000 raw units.
pub const QTY_SCALE: i64 = 1_000_000;

const FRACTION_DIGITS: usize = 6;

// ---------------------------------------------------------------------------
// Qty newtype
// ---------------------------------------------------------------------------

/// A fixed-point quantity in tonnes at 1e-6 scale.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "QtyRepr", into = "String")]
pub struct Qty(i64);

impl Qty {
    /// Zero tonnes.
    pub const ZERO: Qty = Qty(0);

    /// Maximum representable value.
    pub const MAX: Qty = Qty(i64::MAX);

    /// Construct from a raw 1e-6 scaled integer.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Qty(raw)
    }

    /// Construct from a whole number of tonnes.
    ///
    /// Overflows (debug panic) above ~9.2 trillion tonnes; callers handling
    /// untrusted input should parse text instead.
    #[inline]
    pub const fn tonnes(t: i64) -> Self {
        Qty(t * QTY_SCALE)
    }

    /// Extract the underlying raw `i64`.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Saturating addition, clamps at `i64::MAX`.
    #[inline]
    pub fn saturating_add(self, rhs: Qty) -> Qty {
        Qty(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction, clamps at `i64::MIN`.
    #[inline]
    pub fn saturating_sub(self, rhs: Qty) -> Qty {
        Qty(self.0.saturating_sub(rhs.0))
    }

    /// `max(0, self - rhs)`: the stock floor used for exits.
    #[inline]
    pub fn floored_sub(self, rhs: Qty) -> Qty {
        Qty(self.0.saturating_sub(rhs.0).max(0))
    }

    #[inline]
    pub fn checked_add(self, rhs: Qty) -> Option<Qty> {
        self.0.checked_add(rhs.0).map(Qty)
    }

    /// Absolute value; `i64::MIN` saturates to `i64::MAX`.
    #[inline]
    pub fn abs(self) -> Qty {
        Qty(self.0.saturating_abs())
    }

    /// `self / base * 100`, or `None` when `base` is zero.
    pub fn percent_of(self, base: Qty) -> Option<f64> {
        if base.0 == 0 {
            return None;
        }
        Some(self.0 as f64 / base.0 as f64 * 100.0)
    }
}

impl std::iter::Sum for Qty {
    fn sum<I: Iterator<Item = Qty>>(iter: I) -> Qty {
        iter.fold(Qty::ZERO, |acc, q| acc.saturating_add(q))
    }
}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Qty)
// ---------------------------------------------------------------------------

impl Add for Qty {
    type Output = Qty;
    #[inline]
    fn add(self, rhs: Qty) -> Qty {
        Qty(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Qty;
    #[inline]
    fn sub(self, rhs: Qty) -> Qty {
        Qty(self.0 - rhs.0)
    }
}

impl Neg for Qty {
    type Output = Qty;
    #[inline]
    fn neg(self) -> Qty {
        Qty(-self.0)
    }
}

impl AddAssign for Qty {
    #[inline]
    fn add_assign(&mut self, rhs: Qty) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Qty {
    #[inline]
    fn sub_assign(&mut self, rhs: Qty) {
        self.0 -= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Display / parsing
// ---------------------------------------------------------------------------

impl std::fmt::Display for Qty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let abs = self.0.unsigned_abs();
        let whole = abs / QTY_SCALE as u64;
        let frac = abs % QTY_SCALE as u64;
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}{whole}.{frac:06}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QtyParseError {
    #[error("quantity is empty")]
    Empty,
    #[error("quantity {0:?} is not a decimal number")]
    Invalid(String),
    #[error("quantity {0:?} has more than 6 fractional digits")]
    TooPrecise(String),
    #[error("quantity {0:?} is out of range")]
    Overflow(String),
}

impl FromStr for Qty {
    type Err = QtyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.is_empty() {
            return Err(QtyParseError::Empty);
        }

        let (negative, body) = match t.as_bytes()[0] {
            b'-' => (true, &t[1..]),
            b'+' => (false, &t[1..]),
            _ => (false, t),
        };

        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };

        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(QtyParseError::Invalid(t.to_string()));
        }
        if frac.len() > FRACTION_DIGITS {
            return Err(QtyParseError::TooPrecise(t.to_string()));
        }

        let overflow = || QtyParseError::Overflow(t.to_string());

        let whole_val: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut frac_val: i64 = 0;
        for (i, b) in frac.bytes().enumerate() {
            let digit = i64::from(b - b'0');
            frac_val += digit * 10_i64.pow((FRACTION_DIGITS - 1 - i) as u32);
        }

        let raw = whole_val
            .checked_mul(QTY_SCALE)
            .and_then(|w| w.checked_add(frac_val))
            .ok_or_else(overflow)?;

        Ok(Qty(if negative { -raw } else { raw }))
    }
}

/// Wire forms accepted by `Deserialize`.
#[derive(Deserialize)]
#[serde(untagged)]
enum QtyRepr {
    Text(String),
    WholeTonnes(i64),
}

impl TryFrom<QtyRepr> for Qty {
    type Error = QtyParseError;

    fn try_from(repr: QtyRepr) -> Result<Self, Self::Error> {
        match repr {
            QtyRepr::Text(s) => s.parse(),
            QtyRepr::WholeTonnes(t) => t
                .checked_mul(QTY_SCALE)
                .map(Qty)
                .ok_or_else(|| QtyParseError::Overflow(t.to_string())),
        }
    }
}

impl From<Qty> for String {
    fn from(q: Qty) -> String {
        q.to_string()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
