use std::{collections::HashMap, convert::TryFrom, fmt};

use anyhow::{anyhow, bail, Result};
use jitsi_xmpp_parsers::jingle::{self, Action, Jingle};
use maplit::btreemap;
use tracing::{debug, info, warn};
use xmpp_parsers::{
  caps::Caps,
  ecaps2::ECaps2,
  hashes::{Algo, Hash},
  iq::{Iq, IqType},
  muc::Muc,
  ns,
  ping::Ping,
  presence::{self, Presence},
  BareJid, Element, FullJid, Jid,
};

use crate::{
  codec::CodecType,
  disco::{CapsHashes, DISCO_INFO, DISCO_NODE},
  iq::{IqCallback, IqTable},
  source::MediaType,
  stanza::{to_xml, StanzaBuffer, Step},
  xmpp::{self, jitsi::parse_source_info},
};

#[derive(Debug, Clone)]
pub struct ConferenceConfig {
  /// Our bound JID, as reported by the bootstrap negotiation.
  pub jid: FullJid,
  pub room: String,
  pub nick: String,
  pub video_codec_type: CodecType,
  pub audio_muted: bool,
  pub video_muted: bool,
}

/// Another occupant of the conference MUC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
  /// MUC resource of the occupant; also the endpoint id used in source names.
  pub participant_id: String,
  pub nick: String,
  pub audio_muted: bool,
  pub video_muted: bool,
}

/// Collaborator of a [`Conference`].
///
/// Only `send_payload` is required; events nobody listens to default to no-ops.
pub trait ConferenceCallbacks {
  fn send_payload(&mut self, payload: &str) -> Result<()>;

  /// A `session-initiate` from the focus. Returns whether it was handled.
  fn on_jingle_initiate(&mut self, _jingle: Jingle) -> bool {
    false
  }

  /// A `source-add` from the focus. Returns whether it was handled.
  fn on_jingle_add_source(&mut self, _jingle: Jingle) -> bool {
    false
  }

  /// The focus answered our `session-accept`.
  fn on_jingle_accepted(&mut self, _success: bool) {}

  fn on_participant_joined(&mut self, _participant: &Participant) {}

  fn on_participant_left(&mut self, _participant: &Participant) {}

  fn on_mute_state_changed(&mut self, _participant: &Participant, _is_audio: bool, _muted: bool) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConferenceState {
  Idle,
  SettingUp { id: String },
  Joined,
  Failed,
}

pub struct Conference<C> {
  config: ConferenceConfig,
  callbacks: C,
  state: ConferenceState,
  hashes: CapsHashes,
  focus_jid: FullJid,
  muc_jid: BareJid,
  muc_local_jid: FullJid,
  muc_focus_jid: FullJid,
  audio_muted: bool,
  video_muted: bool,
  participants: HashMap<String, Participant>,
  buffer: StanzaBuffer,
  iq_table: IqTable,
  jingle_accept_id: Option<String>,
}

impl<C> fmt::Debug for Conference<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Conference")
      .field("muc_local_jid", &self.muc_local_jid)
      .field("state", &self.state)
      .field("participants", &self.participants.len())
      .field("iq_table", &self.iq_table)
      .finish()
  }
}

/// First non-empty `-`-separated segment of a node, which becomes our MUC resource.
fn muc_resource(node: &str) -> &str {
  node
    .split('-')
    .find(|segment| !segment.is_empty())
    .unwrap_or(node)
}

fn empty_result(id: &str, from: &FullJid, to: Jid) -> Element {
  Iq {
    from: Some(Jid::Full(from.clone())),
    to: Some(to),
    id: id.to_owned(),
    payload: IqType::Result(None),
  }
  .into()
}

fn parse_muted(element: &Element) -> Option<bool> {
  match element.text().as_str() {
    "true" => Some(true),
    "false" => Some(false),
    other => {
      warn!("invalid <{}> value: {:?}", element.name(), other);
      None
    },
  }
}

impl<C: ConferenceCallbacks> Conference<C> {
  pub fn new(config: ConferenceConfig, callbacks: C) -> Result<Conference<C>> {
    let hashes = CapsHashes::ours()?;
    let domain = config.jid.domain.clone();
    let node = config
      .jid
      .node
      .clone()
      .ok_or_else(|| anyhow!("own jid has no node: {}", config.jid))?;
    let muc_jid = BareJid::new(config.room.as_str(), format!("conference.{}", domain));
    let muc_local_jid = muc_jid.clone().with_resource(muc_resource(&node));
    let muc_focus_jid = muc_jid.clone().with_resource("focus");
    Ok(Conference {
      focus_jid: FullJid::new("focus", format!("auth.{}", domain), "focus"),
      muc_jid,
      muc_local_jid,
      muc_focus_jid,
      audio_muted: config.audio_muted,
      video_muted: config.video_muted,
      config,
      callbacks,
      state: ConferenceState::Idle,
      hashes,
      participants: HashMap::new(),
      buffer: StanzaBuffer::new(),
      iq_table: IqTable::new(),
      jingle_accept_id: None,
    })
  }

  /// Asks the focus for the conference. The MUC is joined once the focus reports it ready.
  #[tracing::instrument(level = "debug", skip(self), err)]
  pub fn start(&mut self) -> Result<()> {
    if self.state != ConferenceState::Idle {
      bail!("conference already started");
    }
    let id = self.iq_table.generate_id();
    let conference = xmpp::jitsi::Conference {
      machine_uid: format!("muid_{}", rand::random::<u32>()),
      room: self.muc_jid.to_string(),
      ready: None,
      properties: btreemap! {
        "stereo".to_owned() => "false".to_owned(),
        "startBitrate".to_owned() => "800".to_owned(),
      },
    };
    let iq = Iq::from_set(id.clone(), conference).with_to(Jid::Full(self.focus_jid.clone()));
    self.send(iq.into())?;
    self.state = ConferenceState::SettingUp { id };
    Ok(())
  }

  /// Feeds received text, which may hold a partial stanza or several stanzas.
  ///
  /// Never reports `Done`: the conference lasts until the caller tears it down.
  #[tracing::instrument(level = "trace", skip(self), err)]
  pub fn feed(&mut self, payload: &str) -> Result<Step> {
    match self.state {
      ConferenceState::Idle => bail!("conference not started"),
      ConferenceState::Failed => bail!("conference setup failed"),
      _ => {},
    }
    self.buffer.push(payload);
    while let Some(stanza) = self.buffer.next_stanza() {
      let element = match stanza {
        Ok(element) => element,
        Err(e) => {
          warn!("dropping malformed stanza: {:?}", e);
          continue;
        },
      };
      if let Err(e) = self.handle_stanza(element) {
        self.state = ConferenceState::Failed;
        return Err(e);
      }
    }
    Ok(Step::Continue)
  }

  pub fn is_joined(&self) -> bool {
    self.state == ConferenceState::Joined
  }

  pub fn config(&self) -> &ConferenceConfig {
    &self.config
  }

  pub fn focus_jid(&self) -> &FullJid {
    &self.focus_jid
  }

  pub fn muc_jid(&self) -> &BareJid {
    &self.muc_jid
  }

  pub fn muc_local_jid(&self) -> &FullJid {
    &self.muc_local_jid
  }

  pub fn muc_focus_jid(&self) -> &FullJid {
    &self.muc_focus_jid
  }

  pub fn caps_hashes(&self) -> &CapsHashes {
    &self.hashes
  }

  pub fn participants(&self) -> &HashMap<String, Participant> {
    &self.participants
  }

  pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
    self.participants.get(participant_id)
  }

  pub fn callbacks(&self) -> &C {
    &self.callbacks
  }

  pub fn callbacks_mut(&mut self) -> &mut C {
    &mut self.callbacks
  }

  /// Sends an IQ with a freshly generated id and tracks its response.
  pub fn send_iq(&mut self, mut iq: Element, on_result: Option<IqCallback>) -> Result<String> {
    let id = self.iq_table.register(on_result);
    iq.set_attr("id", id.as_str());
    self.send(iq)?;
    Ok(id)
  }

  /// Sends our `session-accept` to the focus.
  #[tracing::instrument(level = "debug", skip(self, jingle), err)]
  pub fn send_jingle_accept(&mut self, jingle: Jingle) -> Result<()> {
    let id = self.iq_table.register(None);
    let iq = Iq::from_set(id.clone(), jingle).with_to(Jid::Full(self.muc_focus_jid.clone()));
    self.send(iq.into())?;
    self.jingle_accept_id = Some(id);
    Ok(())
  }

  #[tracing::instrument(level = "debug", skip(self), err)]
  pub fn set_muted(&mut self, media_type: MediaType, muted: bool) -> Result<()> {
    match media_type {
      MediaType::Audio => self.audio_muted = muted,
      MediaType::Video => self.video_muted = muted,
    }
    self.send_presence()
  }

  /// Leaves the MUC.
  #[tracing::instrument(level = "debug", skip(self), err)]
  pub fn leave(&mut self) -> Result<()> {
    let presence =
      Presence::new(presence::Type::Unavailable).with_to(Jid::Full(self.muc_local_jid.clone()));
    self.send(presence.into())
  }

  /// Sends a keepalive ping to our server, returning its id.
  pub fn ping(&mut self) -> Result<String> {
    let id = self.iq_table.register(None);
    let iq = Iq::from_get(id.clone(), Ping)
      .with_from(Jid::Full(self.config.jid.clone()))
      .with_to(Jid::Bare(BareJid::domain(self.config.jid.domain.as_str())));
    self.send(iq.into())?;
    Ok(id)
  }

  fn send(&mut self, element: Element) -> Result<()> {
    let xml = to_xml(&element)?;
    self.callbacks.send_payload(&xml)
  }

  fn presence_payloads(&self) -> Result<Vec<Element>> {
    let text_element = |name: &str, text: &str| Element::builder(name).append(text).build();
    Ok(vec![
      Muc::new().into(),
      Caps::new(
        DISCO_NODE,
        Hash::from_base64(Algo::Sha_1, &self.hashes.sha1_base64)?,
      )
      .into(),
      ECaps2::new(vec![Hash::from_base64(
        Algo::Sha_256,
        &self.hashes.sha256_base64,
      )?])
      .into(),
      text_element("stats-id", "jitsi-signal"),
      text_element(
        "jitsi_participant_codecType",
        self.config.video_codec_type.presence_name(),
      ),
      text_element(
        MediaType::Video.jitsi_muted_presence_element_name(),
        &self.video_muted.to_string(),
      ),
      text_element(
        MediaType::Audio.jitsi_muted_presence_element_name(),
        &self.audio_muted.to_string(),
      ),
      Element::builder("nick")
        .ns(ns::NICK)
        .append(self.config.nick.as_str())
        .build(),
    ])
  }

  fn send_presence(&mut self) -> Result<()> {
    let mut presence =
      Presence::new(presence::Type::None).with_to(Jid::Full(self.muc_local_jid.clone()));
    presence.payloads = self.presence_payloads()?;
    self.send(presence.into())
  }

  fn handle_stanza(&mut self, element: Element) -> Result<()> {
    match self.state.clone() {
      ConferenceState::SettingUp { id } => {
        if element.name() != "iq" || element.attr("id") != Some(id.as_str()) {
          debug!("waiting for conference result, ignoring <{}>", element.name());
          return Ok(());
        }
        if element.attr("type") != Some("result") {
          bail!("focus rejected the conference request");
        }
        let conference = element
          .get_child("conference", xmpp::ns::JITSI_FOCUS)
          .cloned()
          .map(xmpp::jitsi::Conference::try_from)
          .transpose()?;
        if conference.and_then(|conference| conference.ready) != Some(true) {
          bail!("focus did not report the conference as ready");
        }
        info!("Conference ready, joining {}", self.muc_local_jid);
        self.send_presence()?;
        self.state = ConferenceState::Joined;
        Ok(())
      },
      ConferenceState::Joined => match element.name() {
        "iq" => self.handle_iq(&element),
        "presence" => self.handle_presence(&element),
        other => {
          debug!("ignoring <{}>", other);
          Ok(())
        },
      },
      ConferenceState::Idle | ConferenceState::Failed => Ok(()),
    }
  }

  fn handle_iq(&mut self, element: &Element) -> Result<()> {
    match element.attr("type") {
      Some("get") => self.handle_iq_get(element),
      Some("set") => self.handle_iq_set(element),
      Some("result") => {
        self.handle_iq_response(element, true);
        Ok(())
      },
      Some("error") => {
        self.handle_iq_response(element, false);
        Ok(())
      },
      other => {
        warn!("iq with unknown type {:?}", other);
        Ok(())
      },
    }
  }

  #[tracing::instrument(level = "debug", skip(self, element), err)]
  fn handle_iq_get(&mut self, element: &Element) -> Result<()> {
    let (from, id) = match (element.attr("from"), element.attr("id")) {
      (Some(from), Some(id)) => (from, id),
      _ => {
        warn!("iq get without from or id");
        return Ok(());
      },
    };
    let from: Jid = match from.parse() {
      Ok(from) => from,
      Err(e) => {
        warn!("iq get with invalid from {}: {}", from, e);
        return Ok(());
      },
    };

    if element.has_child("ping", ns::PING) {
      let result = empty_result(id, &self.config.jid, from);
      return self.send(result);
    }

    let query = match element.get_child("query", ns::DISCO_INFO) {
      Some(query) => query,
      None => {
        warn!("unsupported iq get from {}", from);
        return Ok(());
      },
    };
    let node = query.attr("node");
    if let Some(node) = node {
      match node.rsplit_once('#') {
        Some((uri, hash)) if uri == DISCO_NODE && hash == self.hashes.sha1_base64 => {},
        _ => {
          debug!("disco query for a node that is not ours: {}", node);
          return Ok(());
        },
      }
    }
    let mut disco_info = DISCO_INFO.clone();
    disco_info.node = node.map(ToOwned::to_owned);
    let iq = Iq::from_result(id, Some(disco_info))
      .with_from(Jid::Full(self.config.jid.clone()))
      .with_to(from);
    self.send(iq.into())
  }

  #[tracing::instrument(level = "debug", skip(self, element), err)]
  fn handle_iq_set(&mut self, element: &Element) -> Result<()> {
    let from = match element.attr("from").map(|from| from.parse::<FullJid>()) {
      Some(Ok(from)) if from.resource == "focus" => from,
      _ => {
        warn!("ignoring iq set from {:?}", element.attr("from"));
        return Ok(());
      },
    };
    let id = match element.attr("id") {
      Some(id) => id,
      None => {
        warn!("iq set without id");
        return Ok(());
      },
    };
    let jingle = match element.children().find(|child| child.name() == "jingle") {
      Some(child) => match jingle::parse(child) {
        Ok(jingle) => jingle,
        Err(e) => {
          warn!("dropping unparsable jingle: {}", e);
          return Ok(());
        },
      },
      None => {
        warn!("iq set without jingle");
        return Ok(());
      },
    };

    let action = jingle.action;
    match action {
      Action::SessionInitiate => {
        if !self.callbacks.on_jingle_initiate(jingle) {
          warn!("session-initiate was not handled");
        }
      },
      Action::SourceAdd => {
        if !self.callbacks.on_jingle_add_source(jingle) {
          warn!("source-add was not handled");
        }
      },
      _ => warn!("unimplemented jingle action: {}", action.as_str()),
    }
    let result = empty_result(id, &self.config.jid, Jid::Full(from));
    self.send(result)
  }

  fn handle_iq_response(&mut self, element: &Element, success: bool) {
    let id = match element.attr("id") {
      Some(id) => id,
      None => {
        warn!("iq response without id");
        return;
      },
    };
    if !self.iq_table.complete(id, success) {
      return;
    }
    if self.jingle_accept_id.as_deref() == Some(id) {
      self.jingle_accept_id = None;
      self.callbacks.on_jingle_accepted(success);
    }
  }

  #[tracing::instrument(level = "debug", skip(self, element), err)]
  fn handle_presence(&mut self, element: &Element) -> Result<()> {
    let from = match element.attr("from").map(|from| from.parse::<FullJid>()) {
      Some(Ok(from)) => from,
      _ => {
        debug!("ignoring presence from {:?}", element.attr("from"));
        return Ok(());
      },
    };
    if from.node != self.muc_jid.node || from.domain != self.muc_jid.domain {
      debug!("ignoring presence from outside the conference: {}", from);
      return Ok(());
    }
    let participant_id = from.resource;
    if participant_id == self.muc_local_jid.resource {
      return Ok(());
    }

    match element.attr("type") {
      None => {},
      Some("unavailable") => {
        match self.participants.remove(&participant_id) {
          Some(participant) => {
            info!("participant left: {}", participant_id);
            self.callbacks.on_participant_left(&participant);
          },
          None => warn!("unavailable presence from unknown participant {}", participant_id),
        }
        return Ok(());
      },
      Some(other) => {
        debug!("ignoring presence of type {}", other);
        return Ok(());
      },
    }

    let mut nick = None;
    let mut audio_muted = None;
    let mut video_muted = None;
    for child in element.children() {
      if child.is("nick", ns::NICK) {
        nick = Some(child.text());
      }
      else if child.name() == MediaType::Audio.jitsi_muted_presence_element_name() {
        if let Some(muted) = parse_muted(child) {
          audio_muted = Some(muted);
        }
      }
      else if child.name() == MediaType::Video.jitsi_muted_presence_element_name() {
        if let Some(muted) = parse_muted(child) {
          video_muted = Some(muted);
        }
      }
      else if child.name() == "SourceInfo" {
        let entries = match parse_source_info(&child.text()) {
          Ok(entries) => entries,
          Err(e) => {
            warn!("invalid SourceInfo from {}: {:?}", participant_id, e);
            continue;
          },
        };
        for (name, entry) in entries {
          match name.strip_prefix(participant_id.as_str()) {
            Some(suffix) if suffix == MediaType::Audio.source_name_suffix() => {
              audio_muted = Some(entry.muted)
            },
            Some(suffix) if suffix == MediaType::Video.source_name_suffix() => {
              video_muted = Some(entry.muted)
            },
            _ => warn!("ignoring source {} in presence of {}", name, participant_id),
          }
        }
      }
    }

    match self.participants.get_mut(&participant_id) {
      Some(participant) => {
        if let Some(nick) = nick {
          participant.nick = nick;
        }
        if let Some(muted) = audio_muted {
          if muted != participant.audio_muted {
            participant.audio_muted = muted;
            self.callbacks.on_mute_state_changed(participant, true, muted);
          }
        }
        if let Some(muted) = video_muted {
          if muted != participant.video_muted {
            participant.video_muted = muted;
            self.callbacks.on_mute_state_changed(participant, false, muted);
          }
        }
      },
      None => {
        let participant = Participant {
          participant_id: participant_id.clone(),
          nick: nick.unwrap_or_default(),
          audio_muted: audio_muted.unwrap_or(true),
          video_muted: video_muted.unwrap_or(true),
        };
        info!("participant joined: {:?}", participant);
        self.callbacks.on_participant_joined(&participant);
        self.participants.insert(participant_id, participant);
      },
    }
    Ok(())
  }
}
