//! Key normalization.
//!
//! Every key-taking map operation first converts its key into a canonical
//! form `C` and uses that as the table key. Keys of different types address
//! the same entry whenever their canonical forms are equal: `5u32`, `5i64`,
//! `5.0f64` and `"5"` all normalize to the string `"5"`.
//!
//! Normalization may fail. The map returns the key's own error value
//! untouched and leaves its state exactly as it was.

use core::convert::Infallible;
use core::fmt::{self, Display, Write as _};
use thiserror::Error;

/// Conversion of a key into the canonical form the table is keyed by.
pub trait NormalizeKey<C = String> {
    /// Failure produced by the conversion; propagated unchanged by the map.
    type Error;

    fn normalize(&self) -> Result<C, Self::Error>;
}

impl<C, Q> NormalizeKey<C> for &Q
where
    Q: NormalizeKey<C> + ?Sized,
{
    type Error = Q::Error;

    #[inline]
    fn normalize(&self) -> Result<C, Self::Error> {
        (**self).normalize()
    }
}

impl NormalizeKey for str {
    type Error = Infallible;

    fn normalize(&self) -> Result<String, Infallible> {
        Ok(self.to_owned())
    }
}

impl NormalizeKey for String {
    type Error = Infallible;

    fn normalize(&self) -> Result<String, Infallible> {
        Ok(self.clone())
    }
}

macro_rules! normalize_via_to_string {
    ($($t:ty),* $(,)?) => {
        $(
            impl NormalizeKey for $t {
                type Error = Infallible;

                fn normalize(&self) -> Result<String, Infallible> {
                    Ok(self.to_string())
                }
            }
        )*
    };
}

normalize_via_to_string!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char,
);

fn number_key(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n == f64::INFINITY {
        "Infinity".to_owned()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_owned()
    } else if n == 0.0 {
        // -0 and +0 are the same key.
        "0".to_owned()
    } else {
        n.to_string()
    }
}

impl NormalizeKey for f64 {
    type Error = Infallible;

    fn normalize(&self) -> Result<String, Infallible> {
        Ok(number_key(*self))
    }
}

impl NormalizeKey for f32 {
    type Error = Infallible;

    fn normalize(&self) -> Result<String, Infallible> {
        Ok(number_key(f64::from(*self)))
    }
}

/// Errors raised by the crate's own key adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key's `Display` implementation reported an error.
    #[error("key could not be formatted")]
    Format,
}

impl From<fmt::Error> for KeyError {
    fn from(_: fmt::Error) -> Self {
        KeyError::Format
    }
}

/// Adapter normalizing any `Display` value to its formatted text.
///
/// Unlike `ToString`, a `Display` impl that returns `Err` is reported as
/// [`KeyError::Format`] instead of panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Displayed<T>(pub T);

impl<T: Display> NormalizeKey for Displayed<T> {
    type Error = KeyError;

    fn normalize(&self) -> Result<String, KeyError> {
        let mut out = String::new();
        write!(out, "{}", self.0)?;
        Ok(out)
    }
}
