use std::{num::ParseIntError, str::FromStr};

use xmpp_parsers::Error;

/// Base-10 unsigned parse that rejects signs, whitespace and empty text.
pub(crate) fn parse_decimal<T>(s: &str) -> Result<T, Error>
where
  T: FromStr<Err = ParseIntError>,
{
  if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
    return Err(Error::ParseError("Numeric attribute is not a base-10 integer."));
  }
  Ok(s.parse()?)
}

pub(crate) fn parse_bool(s: &str) -> Result<bool, Error> {
  match s {
    "true" => Ok(true),
    "false" => Ok(false),
    _ => Err(Error::ParseError("Boolean attribute must be 'true' or 'false'.")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decimal_is_strict() {
    assert_eq!(parse_decimal::<u16>("5000").unwrap(), 5000);
    assert!(parse_decimal::<u16>("+5000").is_err());
    assert!(parse_decimal::<u16>(" 5000").is_err());
    assert!(parse_decimal::<u16>("").is_err());
    assert!(parse_decimal::<u8>("256").is_err());
    assert!(parse_decimal::<u32>("12a").is_err());
  }

  #[test]
  fn bool_accepts_only_literals() {
    assert!(parse_bool("true").unwrap());
    assert!(!parse_bool("false").unwrap());
    assert!(parse_bool("1").is_err());
    assert!(parse_bool("True").is_err());
  }
}
