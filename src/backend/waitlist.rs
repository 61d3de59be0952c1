//! Rows of the `waiting_list` table: sign-ups for the upcoming music
//! catalog.

use std::{fmt, str::FromStr};

use serde::Serialize;
use veil::Redact;

use crate::error::{Error, Result};

/// Monthly price a prospective subscriber would pay.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Price {
    #[serde(rename = "$1")]
    One,

    #[default]
    #[serde(rename = "$3")]
    Three,

    #[serde(rename = "$5")]
    Five,
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "$1"),
            Self::Three => write!(f, "$3"),
            Self::Five => write!(f, "$5"),
        }
    }
}

/// Parses `$1`, `$3` or `$5`, with or without the dollar sign.
impl FromStr for Price {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches('$') {
            "1" => Ok(Self::One),
            "3" => Ok(Self::Three),
            "5" => Ok(Self::Five),
            other => Err(Error::invalid_argument(format!(
                "price {other} is not one of $1, $3 or $5"
            ))),
        }
    }
}

/// Body of a waiting list insert.
#[derive(Clone, PartialEq, Eq, Serialize, Redact)]
pub struct WaitlistEntry {
    pub name: String,

    #[redact(partial)]
    pub email: String,

    pub country: String,

    pub willingness_to_pay: Price,
}

impl WaitlistEntry {
    /// Shown once the entry is stored.
    pub const THANKS: &'static str = "Thank you for joining the waiting list!";

    /// Shown when the entry could not be stored.
    pub const FAILURE_NOTICE: &'static str = "Something went wrong. Please try again.";

    /// Builds an entry; every field is required.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty field or an e-mail address
    /// without `@`.
    pub fn new(name: &str, email: &str, country: &str, price: Price) -> Result<Self> {
        let (name, email, country) = (name.trim(), email.trim(), country.trim());
        for (field, value) in [("name", name), ("e-mail", email), ("country", country)] {
            if value.is_empty() {
                return Err(Error::invalid_argument(format!("{field} is empty")));
            }
        }
        if !email.contains('@') {
            return Err(Error::invalid_argument("invalid e-mail address"));
        }

        Ok(Self {
            name: name.to_owned(),
            email: email.to_owned(),
            country: country.to_owned(),
            willingness_to_pay: price,
        })
    }
}
