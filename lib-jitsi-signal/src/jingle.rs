//! Bookkeeping for the Jingle session negotiated with the focus.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use jitsi_xmpp_parsers::{
  jingle::{Action, Content, Jingle, Senders},
  jingle_dtls_srtp::Fingerprint,
  jingle_ice_udp::{Candidate, Transport as IceUdpTransport},
  jingle_rtp::{Description as RtpDescription, Parameter, PayloadType, RtcpFeedback, RtpHeaderExt},
  jingle_ssma::{self, SourceParameter, SsrcGroup, SsrcSemantics},
};
use tracing::{debug, warn};
use xmpp_parsers::FullJid;

use crate::{
  codec::CodecType,
  source::{MediaType, Source},
  util::generate_id,
};

pub const RTP_HDREXT_SSRC_AUDIO_LEVEL: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const RTP_HDREXT_TRANSPORT_CC: &str =
  "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";

/// A codec offered by the focus that we know how to handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
  pub codec_type: CodecType,
  pub tx_pt: u8,
  /// Payload type of the `rtx` stream whose `apt` is `tx_pt`.
  pub rtx_pt: Option<u8>,
  pub rtcp_fbs: Vec<RtcpFeedback>,
}

impl Codec {
  pub fn is_audio(&self) -> bool {
    self.codec_type.media_type() == MediaType::Audio
  }

  pub fn is_video(&self) -> bool {
    self.codec_type.media_type() == MediaType::Video
  }
}

/// ICE, DTLS and SSRC material of our side, produced by the media layer.
#[derive(Debug, Clone)]
pub struct LocalMaterial {
  pub ufrag: String,
  pub pwd: String,
  /// SHA-256 fingerprint of our DTLS certificate, colon-separated hex.
  pub fingerprint: String,
  pub candidates: Vec<Candidate>,
  pub audio_ssrc: u32,
  pub video_ssrc: u32,
  pub video_rtx_ssrc: u32,
}

#[derive(Debug, Clone)]
pub struct JingleSession {
  initiate: Jingle,
  video_codec_type: CodecType,
  codecs: Vec<Codec>,
  remote_ssrc_map: HashMap<u32, Source>,
  colibri_url: Option<String>,
  audio_hdrext_ssrc_audio_level: Option<u16>,
  audio_hdrext_transport_cc: Option<u16>,
  video_hdrext_transport_cc: Option<u16>,
}

fn media_type_of(description: &RtpDescription) -> Option<MediaType> {
  description.media.as_deref()?.parse().ok()
}

fn codecs_of(description: &RtpDescription) -> Vec<Codec> {
  description
    .payload_types
    .iter()
    .filter_map(|pt| {
      let codec_type = CodecType::from_payload_name(pt.name.as_deref()?)?;
      let tx_pt = pt.id.to_string();
      let rtx_pt = description
        .payload_types
        .iter()
        .find(|rtx| {
          rtx
            .name
            .as_deref()
            .map(|name| name.eq_ignore_ascii_case("rtx"))
            .unwrap_or(false)
            && rtx.parameter("apt") == Some(tx_pt.as_str())
        })
        .map(|rtx| rtx.id);
      Some(Codec {
        codec_type,
        tx_pt: pt.id,
        rtx_pt,
        rtcp_fbs: pt.rtcp_fbs.clone(),
      })
    })
    .collect()
}

fn hdrext_id(description: &RtpDescription, uri: &str) -> Option<u16> {
  description
    .hdrexts
    .iter()
    .find(|hdrext| hdrext.uri == uri)
    .map(|hdrext| hdrext.id)
}

/// Adds the non-bridge sources of a Jingle to the map.
fn collect_sources(jingle: &Jingle, remote_ssrc_map: &mut HashMap<u32, Source>) {
  for content in &jingle.contents {
    for description in &content.descriptions {
      let media_type = match media_type_of(description) {
        Some(media_type) => media_type,
        None => continue,
      };
      for source in &description.sources {
        let owner = match &source.owner {
          Some(owner) => owner,
          None => {
            warn!("skipping ssrc {} without ssrc-info", source.ssrc);
            continue;
          },
        };
        if owner == "jvb" {
          debug!("skipping ssrc (owner = jvb)");
          continue;
        }
        let participant_id = match owner.split('/').nth(1) {
          Some(participant_id) => participant_id,
          None => {
            warn!("skipping ssrc {} with invalid owner {}", source.ssrc, owner);
            continue;
          },
        };
        debug!("adding ssrc {} of {} ({:?})", source.ssrc, participant_id, media_type);
        remote_ssrc_map.insert(
          source.ssrc,
          Source {
            ssrc: source.ssrc,
            participant_id: participant_id.to_owned(),
            media_type,
          },
        );
      }
    }
  }
}

fn source_parameters(source: &mut jingle_ssma::Source, msid: &str, cname: &str) {
  source.parameters.push(SourceParameter {
    name: "cname".to_owned(),
    value: Some(cname.to_owned()),
  });
  source.parameters.push(SourceParameter {
    name: "msid".to_owned(),
    value: Some(msid.to_owned()),
  });
}

impl JingleSession {
  /// Caches a `session-initiate` and derives what the media layer needs from it.
  #[tracing::instrument(level = "debug", skip(jingle), err)]
  pub fn initiate(jingle: Jingle, video_codec_type: CodecType) -> Result<JingleSession> {
    if jingle.action != Action::SessionInitiate {
      bail!("expected session-initiate, got {}", jingle.action.as_str());
    }
    let initiator = jingle
      .initiator
      .as_deref()
      .context("session-initiate with no initiator")?;
    debug!("Received Jingle session-initiate from {}", initiator);

    let mut codecs = vec![];
    let mut colibri_url = None;
    let mut audio_hdrext_ssrc_audio_level = None;
    let mut audio_hdrext_transport_cc = None;
    let mut video_hdrext_transport_cc = None;

    for content in &jingle.contents {
      for description in &content.descriptions {
        match media_type_of(description) {
          Some(MediaType::Audio) => {
            audio_hdrext_ssrc_audio_level = hdrext_id(description, RTP_HDREXT_SSRC_AUDIO_LEVEL);
            audio_hdrext_transport_cc = hdrext_id(description, RTP_HDREXT_TRANSPORT_CC);
          },
          Some(MediaType::Video) => {
            video_hdrext_transport_cc = hdrext_id(description, RTP_HDREXT_TRANSPORT_CC);
          },
          None => continue,
        }
        codecs.extend(codecs_of(description));
      }
      if colibri_url.is_none() {
        colibri_url = content
          .transports
          .iter()
          .find(|transport| !transport.web_socket.is_empty())
          .map(|transport| transport.web_socket.clone());
      }
    }

    let mut remote_ssrc_map = HashMap::new();
    collect_sources(&jingle, &mut remote_ssrc_map);

    Ok(JingleSession {
      initiate: jingle,
      video_codec_type,
      codecs,
      remote_ssrc_map,
      colibri_url,
      audio_hdrext_ssrc_audio_level,
      audio_hdrext_transport_cc,
      video_hdrext_transport_cc,
    })
  }

  /// Records the sources announced by a `source-add`.
  pub fn source_add(&mut self, jingle: &Jingle) {
    collect_sources(jingle, &mut self.remote_ssrc_map);
  }

  pub fn initiate_jingle(&self) -> &Jingle {
    &self.initiate
  }

  pub fn codecs(&self) -> &[Codec] {
    &self.codecs
  }

  pub fn find_codec_by_type(&self, codec_type: CodecType) -> Option<&Codec> {
    self.codecs.iter().find(|codec| codec.codec_type == codec_type)
  }

  pub fn find_codec_by_tx_pt(&self, tx_pt: u8) -> Option<&Codec> {
    self.codecs.iter().find(|codec| codec.tx_pt == tx_pt)
  }

  pub fn remote_ssrc_map(&self) -> &HashMap<u32, Source> {
    &self.remote_ssrc_map
  }

  pub fn remote_source(&self, ssrc: u32) -> Option<&Source> {
    self.remote_ssrc_map.get(&ssrc)
  }

  /// URL of the bridge's Colibri WebSocket, if the focus offered one.
  pub fn colibri_url(&self) -> Option<&str> {
    self.colibri_url.as_deref()
  }

  pub fn audio_hdrext_ssrc_audio_level(&self) -> Option<u16> {
    self.audio_hdrext_ssrc_audio_level
  }

  pub fn audio_hdrext_transport_cc(&self) -> Option<u16> {
    self.audio_hdrext_transport_cc
  }

  pub fn video_hdrext_transport_cc(&self) -> Option<u16> {
    self.video_hdrext_transport_cc
  }

  /// Builds our `session-accept`, one content per audio or video content of the initiate.
  ///
  /// Sources are named `<endpoint_id>-a0` and `<endpoint_id>-v0`.
  #[tracing::instrument(level = "debug", skip(self, local), err)]
  pub fn build_accept(
    &self,
    local: &LocalMaterial,
    responder: &FullJid,
    endpoint_id: &str,
  ) -> Result<Jingle> {
    debug!("building Jingle session-accept");
    let mut accept =
      Jingle::new(Action::SessionAccept, self.initiate.sid.clone()).with_responder(responder.to_string());
    if let Some(initiator) = &self.initiate.initiator {
      accept = accept.with_initiator(initiator.clone());
    }

    let msid_label = generate_id();
    let cname = generate_id();

    for initiate_content in &self.initiate.contents {
      let media_type = match initiate_content.descriptions.first().and_then(media_type_of) {
        Some(media_type) => media_type,
        None => {
          debug!("not accepting content {}", initiate_content.name);
          continue;
        },
      };

      let mut description = RtpDescription::new(media_type.as_str());
      description.rtcp_mux = true;
      let source_name = format!("{}{}", endpoint_id, media_type.source_name_suffix());
      let msid = format!("{} {}-{}", msid_label, msid_label, media_type.as_str());

      match media_type {
        MediaType::Audio => {
          let codec = self
            .find_codec_by_type(CodecType::Opus)
            .context("no opus payload type in jingle session-initiate")?;
          let mut payload_type = PayloadType::new(codec.tx_pt, CodecType::Opus.as_str(), 48000);
          payload_type.channels = Some(2);
          payload_type.rtcp_fbs = codec.rtcp_fbs.clone();
          description.payload_types.push(payload_type);

          if let Some(id) = self.audio_hdrext_ssrc_audio_level {
            description.hdrexts.push(RtpHeaderExt {
              id,
              uri: RTP_HDREXT_SSRC_AUDIO_LEVEL.to_owned(),
            });
          }
          if let Some(id) = self.audio_hdrext_transport_cc {
            description.hdrexts.push(RtpHeaderExt {
              id,
              uri: RTP_HDREXT_TRANSPORT_CC.to_owned(),
            });
          }

          let mut source = jingle_ssma::Source::new(local.audio_ssrc);
          source.name = Some(source_name);
          source_parameters(&mut source, &msid, &cname);
          description.sources.push(source);
        },
        MediaType::Video => {
          let codec = self.find_codec_by_type(self.video_codec_type).with_context(|| {
            format!(
              "no {} payload type in jingle session-initiate",
              self.video_codec_type
            )
          })?;
          let mut payload_type = PayloadType::new(codec.tx_pt, codec.codec_type.as_str(), 90000);
          payload_type.rtcp_fbs = codec.rtcp_fbs.clone();
          description.payload_types.push(payload_type);

          let mut source = jingle_ssma::Source::new(local.video_ssrc);
          source.name = Some(source_name.clone());
          source_parameters(&mut source, &msid, &cname);
          description.sources.push(source);

          if let Some(rtx_pt) = codec.rtx_pt {
            let mut rtx = PayloadType::new(rtx_pt, "rtx", 90000);
            rtx.parameters.push(Parameter {
              name: "apt".to_owned(),
              value: codec.tx_pt.to_string(),
            });
            description.payload_types.push(rtx);

            let mut rtx_source = jingle_ssma::Source::new(local.video_rtx_ssrc);
            rtx_source.name = Some(source_name);
            source_parameters(&mut rtx_source, &msid, &cname);
            description.sources.push(rtx_source);
            description.ssrc_groups.push(SsrcGroup {
              semantics: SsrcSemantics::Fid,
              ssrcs: vec![local.video_ssrc, local.video_rtx_ssrc],
            });
          }

          if let Some(id) = self.video_hdrext_transport_cc {
            description.hdrexts.push(RtpHeaderExt {
              id,
              uri: RTP_HDREXT_TRANSPORT_CC.to_owned(),
            });
          }
        },
      }

      let transport = IceUdpTransport {
        pwd: local.pwd.clone(),
        ufrag: local.ufrag.clone(),
        web_socket: String::new(),
        rtcp_mux: true,
        fingerprints: vec![Fingerprint {
          hash: local.fingerprint.clone(),
          hash_type: "sha-256".to_owned(),
          setup: "active".to_owned(),
          required: true,
        }],
        candidates: local.candidates.clone(),
      };

      let mut content = Content::new(initiate_content.name.clone(), false);
      content.senders = Senders::Both;
      content.descriptions.push(description);
      content.transports.push(transport);
      accept = accept.add_content(content);
    }

    if let Some(group) = &self.initiate.group {
      accept = accept.set_group(group.clone());
    }
    Ok(accept)
  }
}
