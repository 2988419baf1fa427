use std::convert::TryFrom;

use xmpp_parsers::{Element, Error};

use crate::{
  jingle_ssma::{Source, SsrcGroup},
  ns::{JINGLE_RTCP_FB, JINGLE_RTP, JINGLE_RTP_HDREXT, JINGLE_SSMA},
};

/// Wrapper element describing an RTP session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Description {
  /// Namespace-less media type, e.g. `audio` or `video`.
  pub media: Option<String>,

  /// 32-bit synchronization source for this media stream, as defined in RFC 3550.
  pub ssrc: Option<u32>,

  /// RTP and RTCP multiplexed on one port.
  pub rtcp_mux: bool,

  pub payload_types: Vec<PayloadType>,

  pub sources: Vec<Source>,

  pub hdrexts: Vec<RtpHeaderExt>,

  pub ssrc_groups: Vec<SsrcGroup>,
}

impl Description {
  pub fn new(media: impl Into<String>) -> Description {
    Description {
      media: Some(media.into()),
      ..Default::default()
    }
  }
}

impl TryFrom<Element> for Description {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Description, Error> {
    check_self!(elem, "description", [JINGLE_RTP]);
    check_attributes!(elem, "description", ["media", "ssrc", "maxptime"]);
    let mut description = Description {
      media: get_attr!(elem, "media", Option),
      ssrc: get_attr!(elem, "ssrc", OptionNumber),
      ..Default::default()
    };
    for child in elem.children() {
      match child.name() {
        "payload-type" => description
          .payload_types
          .extend(parse_or_skip!(child, PayloadType)),
        "source" => description.sources.extend(parse_or_skip!(child, Source)),
        "rtp-hdrext" => description
          .hdrexts
          .extend(parse_or_skip!(child, RtpHeaderExt)),
        "ssrc-group" => description
          .ssrc_groups
          .extend(parse_or_skip!(child, SsrcGroup)),
        "rtcp-mux" => description.rtcp_mux = true,
        other => tracing::debug!("ignoring unknown child <{}> of <description>", other),
      }
    }
    Ok(description)
  }
}

impl From<Description> for Element {
  fn from(description: Description) -> Element {
    let mut builder = Element::builder("description")
      .ns(JINGLE_RTP)
      .attr("media", description.media)
      .attr("ssrc", description.ssrc)
      .append_all(description.payload_types.into_iter().map(Element::from))
      .append_all(description.sources.into_iter().map(Element::from))
      .append_all(description.hdrexts.into_iter().map(Element::from))
      .append_all(description.ssrc_groups.into_iter().map(Element::from));
    if description.rtcp_mux {
      builder = builder.append(Element::builder("rtcp-mux").ns(JINGLE_RTP).build());
    }
    builder.build()
  }
}

/// An encoding that can be used for an RTP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadType {
  pub id: u8,

  pub clockrate: Option<u32>,

  /// Number of channels, absent means 1.
  pub channels: Option<u8>,

  /// The name of the codec, e.g. `opus` or `VP8`.
  pub name: Option<String>,

  pub rtcp_fbs: Vec<RtcpFeedback>,

  pub parameters: Vec<Parameter>,
}

impl PayloadType {
  pub fn new(id: u8, name: impl Into<String>, clockrate: u32) -> PayloadType {
    PayloadType {
      id,
      clockrate: Some(clockrate),
      channels: None,
      name: Some(name.into()),
      rtcp_fbs: vec![],
      parameters: vec![],
    }
  }

  /// Value of the named format parameter, if present.
  pub fn parameter(&self, name: &str) -> Option<&str> {
    self
      .parameters
      .iter()
      .find(|parameter| parameter.name == name)
      .map(|parameter| parameter.value.as_str())
  }
}

impl TryFrom<Element> for PayloadType {
  type Error = Error;

  fn try_from(elem: Element) -> Result<PayloadType, Error> {
    check_self!(elem, "payload-type", [JINGLE_RTP]);
    check_attributes!(
      elem,
      "payload-type",
      ["id", "clockrate", "channels", "name", "maxptime", "ptime"]
    );
    let mut payload_type = PayloadType {
      id: get_attr!(elem, "id", RequiredNumber),
      clockrate: get_attr!(elem, "clockrate", OptionNumber),
      channels: get_attr!(elem, "channels", OptionNumber),
      name: get_attr!(elem, "name", Option),
      rtcp_fbs: vec![],
      parameters: vec![],
    };
    for child in elem.children() {
      if child.name() == "rtcp-fb" {
        payload_type
          .rtcp_fbs
          .extend(parse_or_skip!(child, RtcpFeedback));
      }
      else if child.name() == "parameter" {
        payload_type
          .parameters
          .extend(parse_or_skip!(child, Parameter));
      }
      else {
        tracing::debug!("ignoring unknown child <{}> of <payload-type>", child.name());
      }
    }
    Ok(payload_type)
  }
}

impl From<PayloadType> for Element {
  fn from(payload_type: PayloadType) -> Element {
    Element::builder("payload-type")
      .ns(JINGLE_RTP)
      .attr("id", payload_type.id)
      .attr("clockrate", payload_type.clockrate)
      .attr("channels", payload_type.channels)
      .attr("name", payload_type.name)
      .append_all(payload_type.rtcp_fbs.into_iter().map(Element::from))
      .append_all(payload_type.parameters.into_iter().map(Element::from))
      .build()
  }
}

/// RTCP feedback mechanism supported by a payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpFeedback {
  pub type_: String,
  pub subtype: Option<String>,
}

impl TryFrom<Element> for RtcpFeedback {
  type Error = Error;

  fn try_from(elem: Element) -> Result<RtcpFeedback, Error> {
    check_self!(elem, "rtcp-fb", [JINGLE_RTCP_FB]);
    check_attributes!(elem, "rtcp-fb", ["type", "subtype"]);
    Ok(RtcpFeedback {
      type_: get_attr!(elem, "type", Required),
      subtype: get_attr!(elem, "subtype", Option),
    })
  }
}

impl From<RtcpFeedback> for Element {
  fn from(rtcp_fb: RtcpFeedback) -> Element {
    Element::builder("rtcp-fb")
      .ns(JINGLE_RTCP_FB)
      .attr("type", rtcp_fb.type_)
      .attr("subtype", rtcp_fb.subtype)
      .build()
  }
}

/// Format parameter of a payload type (`a=fmtp`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
  pub name: String,
  pub value: String,
}

impl TryFrom<Element> for Parameter {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Parameter, Error> {
    check_self!(elem, "parameter", [JINGLE_RTP, JINGLE_SSMA]);
    check_attributes!(elem, "parameter", ["name", "value"]);
    Ok(Parameter {
      name: get_attr!(elem, "name", Required),
      value: get_attr!(elem, "value", Required),
    })
  }
}

impl From<Parameter> for Element {
  fn from(parameter: Parameter) -> Element {
    Element::builder("parameter")
      .ns(JINGLE_RTP)
      .attr("name", parameter.name)
      .attr("value", parameter.value)
      .build()
  }
}

/// RTP header extension negotiated for a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeaderExt {
  pub id: u16,
  pub uri: String,
}

impl TryFrom<Element> for RtpHeaderExt {
  type Error = Error;

  fn try_from(elem: Element) -> Result<RtpHeaderExt, Error> {
    check_self!(elem, "rtp-hdrext", [JINGLE_RTP_HDREXT]);
    check_attributes!(elem, "rtp-hdrext", ["id", "uri", "senders"]);
    Ok(RtpHeaderExt {
      id: get_attr!(elem, "id", RequiredNumber),
      uri: get_attr!(elem, "uri", Required),
    })
  }
}

impl From<RtpHeaderExt> for Element {
  fn from(hdrext: RtpHeaderExt) -> Element {
    Element::builder("rtp-hdrext")
      .ns(JINGLE_RTP_HDREXT)
      .attr("id", hdrext.id)
      .attr("uri", hdrext.uri)
      .build()
  }
}
