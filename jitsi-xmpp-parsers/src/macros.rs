// Attribute handling adapted from xmpp-parsers.

// Copyright (c) 2017-2018 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

macro_rules! get_attr {
  ($elem:ident, $attr:tt, Required, $value:ident, $func:expr) => {
    match $elem.attr($attr) {
      Some($value) => $func,
      None => {
        return Err(xmpp_parsers::Error::ParseError(concat!(
          "Required attribute '",
          $attr,
          "' missing."
        )));
      },
    }
  };
  ($elem:ident, $attr:tt, Option, $value:ident, $func:expr) => {
    match $elem.attr($attr) {
      Some($value) => Some($func),
      None => None,
    }
  };
  ($elem:ident, $attr:tt, Required) => {
    get_attr!($elem, $attr, Required, value, value.to_owned())
  };
  ($elem:ident, $attr:tt, Option) => {
    get_attr!($elem, $attr, Option, value, value.to_owned())
  };
  ($elem:ident, $attr:tt, RequiredNumber) => {
    get_attr!($elem, $attr, Required, value, crate::helpers::parse_decimal(value)?)
  };
  ($elem:ident, $attr:tt, OptionNumber) => {
    get_attr!($elem, $attr, Option, value, crate::helpers::parse_decimal(value)?)
  };
  ($elem:ident, $attr:tt, RequiredParse) => {
    get_attr!($elem, $attr, Required, value, value.parse()?)
  };
}

/// Generates a closed enum whose wire strings live in one `TABLE`, used for
/// both directions.
macro_rules! generate_attribute {
  ($(#[$meta:meta])* $elem:ident, $name:tt, {$($(#[$a_meta:meta])* $a:ident => $b:tt),+ $(,)?}) => (
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum $elem {
      $(
        $(#[$a_meta])*
        $a
      ),+
    }

    impl $elem {
      /// Every value paired with its wire string.
      pub const TABLE: &'static [($elem, &'static str)] = &[$(($elem::$a, $b)),+];

      /// The wire string of this value.
      pub fn as_str(self) -> &'static str {
        match self {
          $($elem::$a => $b),+
        }
      }
    }

    impl ::std::str::FromStr for $elem {
      type Err = xmpp_parsers::Error;

      fn from_str(s: &str) -> Result<$elem, xmpp_parsers::Error> {
        $elem::TABLE
          .iter()
          .find(|(_, wire)| *wire == s)
          .map(|(value, _)| *value)
          .ok_or(xmpp_parsers::Error::ParseError(concat!(
            "Unknown value for '",
            $name,
            "' attribute."
          )))
      }
    }

    impl ::std::fmt::Display for $elem {
      fn fmt(&self, fmt: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        fmt.write_str(self.as_str())
      }
    }

    impl ::minidom::IntoAttributeValue for $elem {
      fn into_attribute_value(self) -> Option<String> {
        Some(self.as_str().to_owned())
      }
    }
  );
}

/// Fails unless `$elem` is named `$name` and carries no namespace or one of
/// the accepted ones.
macro_rules! check_self {
  ($elem:ident, $name:tt, [$($ns:expr),+ $(,)?]) => {
    if $elem.name() != $name {
      return Err(xmpp_parsers::Error::ParseError(concat!(
        "This is not a ",
        $name,
        " element."
      )));
    }
    if let Some(ns) = $elem.ns() {
      if ![$($ns),+].contains(&ns.as_str()) {
        return Err(xmpp_parsers::Error::ParseError(concat!(
          "Unexpected namespace on ",
          $name,
          " element."
        )));
      }
    }
  };
}

/// Logs attributes outside `$known`; they are tolerated.
macro_rules! check_attributes {
  ($elem:ident, $name:tt, [$($known:tt),* $(,)?]) => {
    for (key, _) in $elem.attrs() {
      match key {
        $($known)|* => {},
        _ => tracing::debug!("ignoring unknown attribute '{}' on <{}>", key, $name),
      }
    }
  };
}

/// Runs a child parser, logging and dropping the child on failure.
macro_rules! parse_or_skip {
  ($child:ident, $parser:ty) => {
    match <$parser as ::std::convert::TryFrom<Element>>::try_from($child.clone()) {
      Ok(parsed) => Some(parsed),
      Err(e) => {
        tracing::warn!("skipping malformed <{}>: {}", $child.name(), e);
        None
      },
    }
  };
}
