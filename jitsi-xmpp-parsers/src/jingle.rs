use std::convert::TryFrom;

use xmpp_parsers::{iq::IqSetPayload, ns::JABBER_CLIENT, Element, Error};

use crate::{
  jingle_grouping::Group,
  jingle_ice_udp::Transport as IceUdpTransport,
  jingle_rtp::Description as RtpDescription,
  ns::{JINGLE, JINGLE_ICE_UDP, JINGLE_RTP},
};

generate_attribute!(
  /// The action attribute.
  Action, "action", {
    /// Accept a content-add action received from another party.
    ContentAccept => "content-accept",

    /// Add one or more new content definitions to the session.
    ContentAdd => "content-add",

    /// Change the directionality of media sending.
    ContentModify => "content-modify",

    /// Reject a content-add action received from another party.
    ContentReject => "content-reject",

    /// Remove one or more content definitions from the session.
    ContentRemove => "content-remove",

    /// Exchange information about parameters for an application type.
    DescriptionInfo => "description-info",

    /// Exchange information about security preconditions.
    SecurityInfo => "security-info",

    /// Definitively accept a session negotiation.
    SessionAccept => "session-accept",

    /// Send session-level information, such as a ping or a ringing message.
    SessionInfo => "session-info",

    /// Request negotiation of a new Jingle session.
    SessionInitiate => "session-initiate",

    /// End an existing session.
    SessionTerminate => "session-terminate",

    /// Accept a transport-replace action received from another party.
    TransportAccept => "transport-accept",

    /// Exchange transport candidates.
    TransportInfo => "transport-info",

    /// Reject a transport-replace action received from another party.
    TransportReject => "transport-reject",

    /// Redefine a transport method or replace it with a different method.
    TransportReplace => "transport-replace",

    /// Add a source to existing content. Jitsi Meet extension.
    SourceAdd => "source-add",

    /// Remove a source from existing content. Jitsi Meet extension.
    SourceRemove => "source-remove",
  }
);

generate_attribute!(
  /// Which parties in the session will be generating content.
  Senders, "senders", {
    /// Both parties can send for this content.
    Both => "both",

    /// Only the initiator can send for this content.
    Initiator => "initiator",

    /// Only the responder can send for this content.
    Responder => "responder",

    /// No one can send for this content.
    None => "none",
  }
);

impl Default for Senders {
  fn default() -> Senders {
    Senders::Both
  }
}

/// Describes a session's content, there can be multiple content in one
/// session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Content {
  /// A per-session unique identifier for this content.
  pub name: String,

  pub senders: Senders,

  /// Whether the content was created by the session initiator (`creator`).
  pub is_from_initiator: bool,

  pub descriptions: Vec<RtpDescription>,

  pub transports: Vec<IceUdpTransport>,
}

impl Content {
  pub fn new(name: impl Into<String>, is_from_initiator: bool) -> Content {
    Content {
      name: name.into(),
      is_from_initiator,
      ..Default::default()
    }
  }
}

impl TryFrom<Element> for Content {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Content, Error> {
    check_self!(elem, "content", [JINGLE, JABBER_CLIENT]);
    check_attributes!(elem, "content", ["name", "senders", "creator", "disposition"]);
    let mut content = Content {
      name: get_attr!(elem, "name", Required),
      senders: get_attr!(elem, "senders", Option, value, value.parse::<Senders>()?)
        .unwrap_or_default(),
      is_from_initiator: match elem.attr("creator") {
        Some("initiator") => true,
        Some("responder") | None => false,
        Some(_) => return Err(Error::ParseError("Unknown value for 'creator' attribute.")),
      },
      ..Default::default()
    };
    for child in elem.children() {
      if child.is("description", JINGLE_RTP) {
        content
          .descriptions
          .extend(parse_or_skip!(child, RtpDescription));
      }
      else if child.is("transport", JINGLE_ICE_UDP) {
        content
          .transports
          .extend(parse_or_skip!(child, IceUdpTransport));
      }
      else {
        tracing::debug!(
          "ignoring unsupported child <{}> ({:?}) of <content>",
          child.name(),
          child.ns()
        );
      }
    }
    Ok(content)
  }
}

impl From<Content> for Element {
  fn from(content: Content) -> Element {
    Element::builder("content")
      .ns(JINGLE)
      .attr("name", content.name)
      .attr("senders", content.senders)
      .attr(
        "creator",
        if content.is_from_initiator {
          "initiator"
        }
        else {
          "responder"
        },
      )
      .append_all(content.descriptions.into_iter().map(Element::from))
      .append_all(content.transports.into_iter().map(Element::from))
      .build()
  }
}

/// The main Jingle container, to be included in an iq stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jingle {
  /// The action to execute on both ends.
  pub action: Action,

  /// Unique session identifier between two entities.
  pub sid: String,

  pub initiator: Option<String>,

  pub responder: Option<String>,

  pub group: Option<Group>,

  pub contents: Vec<Content>,
}

impl IqSetPayload for Jingle {}

impl Jingle {
  pub fn new(action: Action, sid: impl Into<String>) -> Jingle {
    Jingle {
      action,
      sid: sid.into(),
      initiator: None,
      responder: None,
      group: None,
      contents: vec![],
    }
  }

  pub fn with_initiator(mut self, initiator: impl Into<String>) -> Jingle {
    self.initiator = Some(initiator.into());
    self
  }

  pub fn with_responder(mut self, responder: impl Into<String>) -> Jingle {
    self.responder = Some(responder.into());
    self
  }

  pub fn add_content(mut self, content: Content) -> Jingle {
    self.contents.push(content);
    self
  }

  pub fn set_group(mut self, group: Group) -> Jingle {
    self.group = Some(group);
    self
  }
}

impl TryFrom<Element> for Jingle {
  type Error = Error;

  fn try_from(root: Element) -> Result<Jingle, Error> {
    // a jingle without its own xmlns inherits jabber:client from the iq
    check_self!(root, "jingle", [JINGLE, JABBER_CLIENT]);
    check_attributes!(root, "jingle", ["action", "sid", "initiator", "responder"]);
    let mut jingle = Jingle {
      action: get_attr!(root, "action", RequiredParse),
      sid: get_attr!(root, "sid", Required),
      initiator: get_attr!(root, "initiator", Option),
      responder: get_attr!(root, "responder", Option),
      group: None,
      contents: vec![],
    };
    for child in root.children() {
      match child.name() {
        "content" => jingle.contents.extend(parse_or_skip!(child, Content)),
        "group" => {
          if let Some(group) = parse_or_skip!(child, Group) {
            jingle.group = Some(group);
          }
        },
        "bridge-session" => {},
        other => tracing::debug!("ignoring unknown child <{}> of <jingle>", other),
      }
    }
    Ok(jingle)
  }
}

impl From<Jingle> for Element {
  fn from(jingle: Jingle) -> Element {
    Element::builder("jingle")
      .ns(JINGLE)
      .attr("action", jingle.action)
      .attr("sid", jingle.sid)
      .attr("initiator", jingle.initiator)
      .attr("responder", jingle.responder)
      .append_all(jingle.contents.into_iter().map(Element::from))
      .append_all(jingle.group.map(Element::from))
      .build()
  }
}

/// Decodes a `<jingle/>` element.
pub fn parse(elem: &Element) -> Result<Jingle, Error> {
  Jingle::try_from(elem.clone())
}

/// Encodes a [`Jingle`]. Every element carries its own xmlns; absent optional
/// fields are omitted.
pub fn deparse(jingle: &Jingle) -> Element {
  Element::from(jingle.clone())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    jingle_dtls_srtp::Fingerprint,
    jingle_grouping::GroupSemantics,
    jingle_ice_udp::{Candidate, CandidateType},
    jingle_rtp::{Parameter, PayloadType, RtcpFeedback, RtpHeaderExt},
    jingle_ssma::{Source, SourceParameter, SsrcGroup, SsrcSemantics},
  };

  fn populated() -> Jingle {
    let mut opus = PayloadType::new(111, "opus", 48000);
    opus.channels = Some(2);
    opus.rtcp_fbs.push(RtcpFeedback {
      type_: "transport-cc".to_owned(),
      subtype: None,
    });
    opus.parameters.push(Parameter {
      name: "useinbandfec".to_owned(),
      value: "1".to_owned(),
    });

    let mut vp8 = PayloadType::new(100, "VP8", 90000);
    vp8.rtcp_fbs.push(RtcpFeedback {
      type_: "nack".to_owned(),
      subtype: Some("pli".to_owned()),
    });
    let mut rtx = PayloadType::new(96, "rtx", 90000);
    rtx.parameters.push(Parameter {
      name: "apt".to_owned(),
      value: "100".to_owned(),
    });

    let mut audio_source = Source::new(1111);
    audio_source.name = Some("abcd-a0".to_owned());
    audio_source.owner = Some("room@conference.example.org/abcd".to_owned());
    audio_source.parameters.push(SourceParameter {
      name: "msid".to_owned(),
      value: Some("stream track".to_owned()),
    });
    audio_source.parameters.push(SourceParameter {
      name: "cname".to_owned(),
      value: None,
    });

    let mut audio = RtpDescription::new("audio");
    audio.ssrc = Some(1111);
    audio.rtcp_mux = true;
    audio.payload_types.push(opus);
    audio.sources.push(audio_source);
    audio.hdrexts.push(RtpHeaderExt {
      id: 1,
      uri: "urn:ietf:params:rtp-hdrext:ssrc-audio-level".to_owned(),
    });

    let mut video = RtpDescription::new("video");
    video.payload_types.push(vp8);
    video.payload_types.push(rtx);
    video.sources.push(Source::new(2222));
    video.sources.push(Source::new(2222));
    video.sources.push(Source::new(3333));
    video.ssrc_groups.push(SsrcGroup {
      semantics: SsrcSemantics::Fid,
      ssrcs: vec![2222, 3333],
    });

    let transport = IceUdpTransport {
      pwd: "pwd".to_owned(),
      ufrag: "ufrag".to_owned(),
      web_socket: "wss://jvb.example.org/colibri-ws/default-id/abc/def?pwd=x".to_owned(),
      rtcp_mux: true,
      fingerprints: vec![Fingerprint {
        hash: "AA:BB:CC".to_owned(),
        hash_type: "sha-256".to_owned(),
        setup: "actpass".to_owned(),
        required: false,
      }],
      candidates: vec![Candidate {
        component: 1,
        generation: 0,
        port: 10000,
        priority: 2130706431,
        type_: CandidateType::Host,
        foundation: "1".to_owned(),
        id: "c1".to_owned(),
        ip: "10.0.0.1".to_owned(),
      }],
    };

    let mut audio_content = Content::new("audio", true);
    audio_content.descriptions.push(audio);
    audio_content.transports.push(transport.clone());
    let mut video_content = Content::new("video", true);
    video_content.senders = Senders::Initiator;
    video_content.descriptions.push(video);
    video_content.transports.push(transport);

    Jingle::new(Action::SessionInitiate, "sid-1")
      .with_initiator("focus@auth.example.org/focus")
      .with_responder("room@conference.example.org/abcd")
      .add_content(audio_content)
      .add_content(video_content)
      .set_group(Group {
        semantics: GroupSemantics::Bundle,
        contents: vec!["audio".to_owned(), "video".to_owned()],
      })
  }

  #[test]
  fn round_trip() {
    let jingle = populated();
    assert_eq!(parse(&deparse(&jingle)).unwrap(), jingle);

    let minimal = Jingle::new(Action::SourceRemove, "sid-2");
    let elem = deparse(&minimal);
    assert_eq!(elem.attr("initiator"), None);
    assert!(elem.children().next().is_none());
    assert_eq!(parse(&elem).unwrap(), minimal);
  }

  #[test]
  fn enum_tables_are_total() {
    assert_eq!(Action::TABLE.len(), 17);
    for (value, wire) in Action::TABLE {
      assert_eq!(wire.parse::<Action>().unwrap(), *value);
      assert_eq!(value.as_str(), *wire);
    }
    for (value, wire) in Senders::TABLE {
      assert_eq!(wire.parse::<Senders>().unwrap(), *value);
    }
    for (value, wire) in GroupSemantics::TABLE {
      assert_eq!(wire.parse::<GroupSemantics>().unwrap(), *value);
    }
    for unknown in &["", "session_initiate", "Session-Initiate", "source-update"] {
      assert!(unknown.parse::<Action>().is_err());
    }
    assert!("all".parse::<Senders>().is_err());
  }

  #[test]
  fn parse_session_initiate() {
    let elem: Element = r#"<jingle xmlns="urn:xmpp:jingle:1" action="session-initiate" initiator="focus@auth.example.org/focus" sid="5bb83f4pin8ad">
        <content creator="initiator" name="audio" senders="both">
          <description xmlns="urn:xmpp:jingle:apps:rtp:1" media="audio">
            <payload-type id="111" name="opus" clockrate="48000" channels="2"/>
            <source xmlns="urn:xmpp:jingle:apps:rtp:ssma:0" ssrc="3028541926" name="jvb-a0">
              <ssrc-info xmlns="http://jitsi.org/jitmeet" owner="jvb"/>
            </source>
            <rtcp-mux/>
          </description>
          <transport xmlns="urn:xmpp:jingle:transports:ice-udp:1" pwd="pwd" ufrag="ufrag">
            <web-socket xmlns="http://jitsi.org/protocol/colibri" url="wss://example.org/colibri-ws"/>
            <rtcp-mux/>
          </transport>
        </content>
        <content creator="initiator" name="data">
          <description xmlns="urn:xmpp:jingle:apps:webrtc-datachannel:0"/>
        </content>
        <group xmlns="urn:xmpp:jingle:apps:grouping:0" semantics="BUNDLE">
          <content name="audio"/>
          <content name="data"/>
        </group>
        <bridge-session xmlns="http://jitsi.org/protocol/focus" id="ab"/>
      </jingle>"#
      .parse()
      .unwrap();
    let jingle = parse(&elem).unwrap();
    assert_eq!(jingle.action, Action::SessionInitiate);
    assert_eq!(jingle.sid, "5bb83f4pin8ad");
    assert_eq!(jingle.contents.len(), 2);
    assert!(jingle.contents[0].is_from_initiator);
    assert_eq!(jingle.contents[0].descriptions[0].sources[0].owner.as_deref(), Some("jvb"));
    assert!(jingle.contents[0].transports[0].rtcp_mux);
    assert!(jingle.contents[1].descriptions.is_empty());
    assert_eq!(jingle.group.unwrap().contents.len(), 2);
  }

  #[test]
  fn bad_children_are_skipped() {
    let elem: Element = r#"<jingle xmlns="urn:xmpp:jingle:1" action="source-add" sid="s">
        <content creator="initiator"/>
        <content creator="someone" name="bad-creator"/>
        <content name="bad-senders" senders="everyone"/>
        <content name="video" creator="responder"/>
        <group xmlns="urn:xmpp:jingle:apps:grouping:0"/>
      </jingle>"#
      .parse()
      .unwrap();
    let jingle = parse(&elem).unwrap();
    assert_eq!(jingle.contents.len(), 1);
    assert_eq!(jingle.contents[0].name, "video");
    assert!(!jingle.contents[0].is_from_initiator);
    assert_eq!(jingle.contents[0].senders, Senders::Both);
    assert_eq!(jingle.group, None);
  }

  #[test]
  fn required_root_attributes() {
    let no_sid: Element = r#"<jingle xmlns="urn:xmpp:jingle:1" action="session-initiate"/>"#
      .parse()
      .unwrap();
    assert!(parse(&no_sid).is_err());

    let no_action: Element = r#"<jingle xmlns="urn:xmpp:jingle:1" sid="s"/>"#.parse().unwrap();
    assert!(parse(&no_action).is_err());

    let bad_action: Element = r#"<jingle xmlns="urn:xmpp:jingle:1" action="session-jump" sid="s"/>"#
      .parse()
      .unwrap();
    assert!(parse(&bad_action).is_err());

    let wrong_ns: Element = r#"<jingle xmlns="urn:xmpp:jingle:0" action="session-initiate" sid="s"/>"#
      .parse()
      .unwrap();
    assert!(parse(&wrong_ns).is_err());
  }
}
