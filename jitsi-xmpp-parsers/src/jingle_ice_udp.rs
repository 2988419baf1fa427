use std::convert::TryFrom;

use xmpp_parsers::{Element, Error};

use crate::{
  jingle_dtls_srtp::Fingerprint,
  ns::{JINGLE_DTLS, JINGLE_ICE_UDP, JINGLE_RTP, JITSI_COLIBRI},
};

generate_attribute!(
  /// A Candidate Type as defined in ICE-CORE.
  CandidateType, "type", {
    /// Host candidate.
    Host => "host",

    /// Peer reflexive candidate.
    Prflx => "prflx",

    /// Relayed candidate.
    Relay => "relay",

    /// Server reflexive candidate.
    Srflx => "srflx",
  }
);

/// A candidate for an ICE-UDP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
  /// A Component ID as defined in ICE-CORE.
  pub component: u8,

  /// An index, starting at 0, that enables the parties to keep track of
  /// updates to the candidate throughout the life of the session.
  pub generation: u8,

  pub port: u16,

  /// A Priority as defined in ICE-CORE.
  pub priority: u32,

  pub type_: CandidateType,

  /// A Foundation as defined in ICE-CORE.
  pub foundation: String,

  /// A unique identifier for the candidate.
  pub id: String,

  /// The Internet Protocol (IP) address for the candidate transport mechanism.
  pub ip: String,
}

impl TryFrom<Element> for Candidate {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Candidate, Error> {
    check_self!(elem, "candidate", [JINGLE_ICE_UDP]);
    check_attributes!(
      elem,
      "candidate",
      [
        "component",
        "generation",
        "port",
        "priority",
        "type",
        "foundation",
        "id",
        "ip",
        "protocol",
        "network",
        "rel-addr",
        "rel-port",
      ]
    );
    if let Some(protocol) = elem.attr("protocol") {
      if protocol != "udp" {
        return Err(Error::ParseError("Unsupported candidate protocol."));
      }
    }
    Ok(Candidate {
      component: get_attr!(elem, "component", RequiredNumber),
      generation: get_attr!(elem, "generation", RequiredNumber),
      port: get_attr!(elem, "port", RequiredNumber),
      priority: get_attr!(elem, "priority", RequiredNumber),
      type_: get_attr!(elem, "type", RequiredParse),
      foundation: get_attr!(elem, "foundation", Required),
      id: get_attr!(elem, "id", Required),
      ip: get_attr!(elem, "ip", Required),
    })
  }
}

impl From<Candidate> for Element {
  fn from(candidate: Candidate) -> Element {
    Element::builder("candidate")
      .ns(JINGLE_ICE_UDP)
      .attr("component", candidate.component)
      .attr("foundation", candidate.foundation)
      .attr("generation", candidate.generation)
      .attr("id", candidate.id)
      .attr("ip", candidate.ip)
      .attr("port", candidate.port)
      .attr("priority", candidate.priority)
      .attr("protocol", "udp")
      .attr("type", candidate.type_)
      .build()
  }
}

/// Wrapper element for an ICE-UDP transport.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transport {
  /// A Password as defined in ICE-CORE.
  pub pwd: String,

  /// A User Fragment as defined in ICE-CORE.
  pub ufrag: String,

  /// URL of the bridge's Colibri WebSocket. Written only when non-empty.
  pub web_socket: String,

  /// RTP and RTCP multiplexed on one component.
  pub rtcp_mux: bool,

  pub fingerprints: Vec<Fingerprint>,

  pub candidates: Vec<Candidate>,
}

impl TryFrom<Element> for Transport {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Transport, Error> {
    check_self!(elem, "transport", [JINGLE_ICE_UDP]);
    check_attributes!(elem, "transport", ["pwd", "ufrag"]);
    let mut transport = Transport {
      pwd: get_attr!(elem, "pwd", Required),
      ufrag: get_attr!(elem, "ufrag", Required),
      ..Default::default()
    };
    let mut web_socket = None;
    for child in elem.children() {
      if child.is("web-socket", JITSI_COLIBRI) {
        if let Some(url) = child.attr("url") {
          web_socket = Some(url.to_owned());
        }
      }
      else if child.is("rtcp-mux", JINGLE_ICE_UDP) || child.is("rtcp-mux", JINGLE_RTP) {
        transport.rtcp_mux = true;
      }
      else if child.is("fingerprint", JINGLE_DTLS) {
        transport.fingerprints.extend(parse_or_skip!(child, Fingerprint));
      }
      else if child.is("candidate", JINGLE_ICE_UDP) {
        transport.candidates.extend(parse_or_skip!(child, Candidate));
      }
      else {
        tracing::debug!("ignoring unknown child <{}> of <transport>", child.name());
      }
    }
    transport.web_socket =
      web_socket.ok_or(Error::ParseError("Missing web-socket in transport element."))?;
    Ok(transport)
  }
}

impl From<Transport> for Element {
  fn from(transport: Transport) -> Element {
    let mut builder = Element::builder("transport")
      .ns(JINGLE_ICE_UDP)
      .attr("pwd", transport.pwd)
      .attr("ufrag", transport.ufrag);
    if transport.rtcp_mux {
      builder = builder.append(Element::builder("rtcp-mux").ns(JINGLE_ICE_UDP).build());
    }
    builder = builder
      .append_all(transport.candidates.into_iter().map(Element::from))
      .append_all(transport.fingerprints.into_iter().map(Element::from));
    if !transport.web_socket.is_empty() {
      builder = builder.append(
        Element::builder("web-socket")
          .ns(JITSI_COLIBRI)
          .attr("url", transport.web_socket)
          .build(),
      );
    }
    builder.build()
  }
}
