use std::convert::TryFrom;

use xmpp_parsers::{Element, Error};

use crate::{
  helpers::parse_decimal,
  ns::{JINGLE_RTP, JINGLE_SSMA, JITSI_MEET},
};

generate_attribute!(
  /// From RFC5888, the list of allowed semantics.
  SsrcSemantics, "semantics", {
    /// Lip Synchronization, defined in RFC5888.
    Ls => "LS",

    /// Flow Identification, defined in RFC5888.
    Fid => "FID",

    /// Single Reservation Flow, defined in RFC3524.
    Srf => "SRF",

    /// Alternative Network Address Types, defined in RFC4091.
    Anat => "ANAT",

    /// Forward Error Correction, defined in RFC4756.
    Fec => "FEC",

    /// Decoding Dependency, defined in RFC5583.
    Ddp => "DDP",
  }
);

/// Parameter of a source. The value may be absent (`<parameter name="msid"/>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceParameter {
  pub name: String,
  pub value: Option<String>,
}

impl TryFrom<Element> for SourceParameter {
  type Error = Error;

  fn try_from(elem: Element) -> Result<SourceParameter, Error> {
    check_self!(elem, "parameter", [JINGLE_SSMA, JINGLE_RTP]);
    check_attributes!(elem, "parameter", ["name", "value"]);
    Ok(SourceParameter {
      name: get_attr!(elem, "name", Required),
      value: get_attr!(elem, "value", Option),
    })
  }
}

impl From<SourceParameter> for Element {
  fn from(parameter: SourceParameter) -> Element {
    Element::builder("parameter")
      .ns(JINGLE_SSMA)
      .attr("name", parameter.name)
      .attr("value", parameter.value)
      .build()
  }
}

/// Source element for the ssrc SDP attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
  pub ssrc: u32,

  pub name: Option<String>,

  /// Endpoint owning this source, from the Jitsi `ssrc-info` child.
  pub owner: Option<String>,

  pub parameters: Vec<SourceParameter>,
}

impl Source {
  pub fn new(ssrc: u32) -> Source {
    Source {
      ssrc,
      name: None,
      owner: None,
      parameters: vec![],
    }
  }
}

impl TryFrom<Element> for Source {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Source, Error> {
    check_self!(elem, "source", [JINGLE_SSMA, JINGLE_RTP]);
    check_attributes!(elem, "source", ["ssrc", "name"]);
    let mut source = Source {
      ssrc: get_attr!(elem, "ssrc", RequiredNumber),
      name: get_attr!(elem, "name", Option),
      owner: None,
      parameters: vec![],
    };
    for child in elem.children() {
      if child.name() == "parameter" {
        source.parameters.extend(parse_or_skip!(child, SourceParameter));
      }
      else if child.name() == "ssrc-info" {
        if child.ns().as_deref() != Some(JITSI_MEET) {
          return Err(Error::ParseError("Invalid namespace on ssrc-info element."));
        }
        source.owner = Some(get_attr!(child, "owner", Required));
      }
      else {
        tracing::debug!("ignoring unknown child <{}> of <source>", child.name());
      }
    }
    Ok(source)
  }
}

impl From<Source> for Element {
  fn from(source: Source) -> Element {
    let mut builder = Element::builder("source")
      .ns(JINGLE_SSMA)
      .attr("ssrc", source.ssrc)
      .attr("name", source.name);
    if let Some(owner) = source.owner {
      builder = builder.append(
        Element::builder("ssrc-info")
          .ns(JITSI_MEET)
          .attr("owner", owner)
          .build(),
      );
    }
    builder
      .append_all(source.parameters.into_iter().map(Element::from))
      .build()
  }
}

/// Element grouping multiple ssrc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrcGroup {
  pub semantics: SsrcSemantics,
  pub ssrcs: Vec<u32>,
}

impl TryFrom<Element> for SsrcGroup {
  type Error = Error;

  fn try_from(elem: Element) -> Result<SsrcGroup, Error> {
    check_self!(elem, "ssrc-group", [JINGLE_SSMA, JINGLE_RTP]);
    check_attributes!(elem, "ssrc-group", ["semantics"]);
    let semantics = get_attr!(elem, "semantics", RequiredParse);
    let mut ssrcs = vec![];
    for child in elem.children() {
      if child.name() == "source" {
        let ssrc = child
          .attr("ssrc")
          .ok_or(Error::ParseError("Source in ssrc-group has no ssrc."))?;
        ssrcs.push(parse_decimal(ssrc)?);
      }
      else {
        tracing::debug!("ignoring unknown child <{}> of <ssrc-group>", child.name());
      }
    }
    Ok(SsrcGroup { semantics, ssrcs })
  }
}

impl From<SsrcGroup> for Element {
  fn from(group: SsrcGroup) -> Element {
    Element::builder("ssrc-group")
      .ns(JINGLE_SSMA)
      .attr("semantics", group.semantics)
      .append_all(group.ssrcs.into_iter().map(|ssrc| {
        Element::builder("source")
          .ns(JINGLE_SSMA)
          .attr("ssrc", ssrc)
          .build()
      }))
      .build()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn source_with_owner() {
    let elem: Element = r#"<source xmlns="urn:xmpp:jingle:apps:rtp:ssma:0" ssrc="1234" name="abcd-v0">
        <ssrc-info xmlns="http://jitsi.org/jitmeet" owner="room@conference.example.org/abcd"/>
        <parameter name="msid" value="stream track"/>
        <parameter name="cname"/>
        <parameter value="orphan"/>
      </source>"#
      .parse()
      .unwrap();
    let source = Source::try_from(elem).unwrap();
    assert_eq!(source.ssrc, 1234);
    assert_eq!(source.name.as_deref(), Some("abcd-v0"));
    assert_eq!(source.owner.as_deref(), Some("room@conference.example.org/abcd"));
    assert_eq!(
      source.parameters,
      vec![
        SourceParameter {
          name: "msid".to_owned(),
          value: Some("stream track".to_owned()),
        },
        SourceParameter {
          name: "cname".to_owned(),
          value: None,
        },
      ]
    );
  }

  #[test]
  fn ssrc_info_without_owner_fails() {
    let elem: Element = r#"<source xmlns="urn:xmpp:jingle:apps:rtp:ssma:0" ssrc="1"><ssrc-info xmlns="http://jitsi.org/jitmeet"/></source>"#
      .parse()
      .unwrap();
    assert!(Source::try_from(elem).is_err());
  }

  #[test]
  fn ssrc_group() {
    let elem: Element = r#"<ssrc-group xmlns="urn:xmpp:jingle:apps:rtp:ssma:0" semantics="FID"><source ssrc="1"/><source ssrc="2"/></ssrc-group>"#
      .parse()
      .unwrap();
    let group = SsrcGroup::try_from(elem).unwrap();
    assert_eq!(group.semantics, SsrcSemantics::Fid);
    assert_eq!(group.ssrcs, vec![1, 2]);

    let bad: Element = r#"<ssrc-group xmlns="urn:xmpp:jingle:apps:rtp:ssma:0" semantics="FID"><source ssrc="-1"/></ssrc-group>"#
      .parse()
      .unwrap();
    assert!(SsrcGroup::try_from(bad).is_err());
  }

  #[test]
  fn semantics_table() {
    for (value, wire) in SsrcSemantics::TABLE {
      assert_eq!(wire.parse::<SsrcSemantics>().unwrap(), *value);
    }
    assert!("fid".parse::<SsrcSemantics>().is_err());
    assert!("".parse::<SsrcSemantics>().is_err());
  }
}
