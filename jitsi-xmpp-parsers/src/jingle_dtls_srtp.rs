use std::convert::TryFrom;

use xmpp_parsers::{Element, Error};

use crate::ns::JINGLE_DTLS;

/// Fingerprint of the key used for a DTLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
  /// The fingerprint itself, as colon-separated hex. Carried as element text.
  pub hash: String,

  /// The hash algorithm, e.g. `sha-256`.
  pub hash_type: String,

  /// The DTLS role (`actpass`, `active`, `passive`).
  pub setup: String,

  pub required: bool,
}

impl TryFrom<Element> for Fingerprint {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Fingerprint, Error> {
    check_self!(elem, "fingerprint", [JINGLE_DTLS]);
    check_attributes!(elem, "fingerprint", ["hash", "setup", "required"]);
    let hash = elem.text();
    if hash.is_empty() {
      return Err(Error::ParseError("Fingerprint must not be empty."));
    }
    for child in elem.children() {
      tracing::debug!("ignoring unknown child <{}> of <fingerprint>", child.name());
    }
    Ok(Fingerprint {
      hash,
      hash_type: get_attr!(elem, "hash", Required),
      setup: get_attr!(elem, "setup", Required),
      required: get_attr!(elem, "required", Option, value, crate::helpers::parse_bool(value)?)
        .unwrap_or(false),
    })
  }
}

impl From<Fingerprint> for Element {
  fn from(fingerprint: Fingerprint) -> Element {
    Element::builder("fingerprint")
      .ns(JINGLE_DTLS)
      .attr("hash", fingerprint.hash_type)
      .attr("setup", fingerprint.setup)
      .attr("required", if fingerprint.required { "true" } else { "false" })
      .append(fingerprint.hash)
      .build()
  }
}
