use std::{fmt, str::FromStr};

use anyhow::{anyhow, Result};

use crate::source::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
  Opus,
  H264,
  Vp8,
  Vp9,
}

impl CodecType {
  /// Payload type names as they appear in Jingle descriptions.
  pub const TABLE: &'static [(CodecType, &'static str)] = &[
    (CodecType::Opus, "opus"),
    (CodecType::H264, "H264"),
    (CodecType::Vp8, "VP8"),
    (CodecType::Vp9, "VP9"),
  ];

  /// `TABLE` lists the variants in declaration order.
  pub fn as_str(self) -> &'static str {
    CodecType::TABLE[self as usize].1
  }

  /// Value of the `jitsi_participant_codecType` presence element.
  pub fn presence_name(self) -> &'static str {
    match self {
      CodecType::Opus => "opus",
      CodecType::H264 => "h264",
      CodecType::Vp8 => "vp8",
      CodecType::Vp9 => "vp9",
    }
  }

  pub fn media_type(self) -> MediaType {
    match self {
      CodecType::Opus => MediaType::Audio,
      CodecType::H264 | CodecType::Vp8 | CodecType::Vp9 => MediaType::Video,
    }
  }

  /// Matches a payload type name; SDP encoding names are case-insensitive.
  pub fn from_payload_name(name: &str) -> Option<CodecType> {
    CodecType::TABLE
      .iter()
      .find(|(_, wire)| wire.eq_ignore_ascii_case(name))
      .map(|(codec_type, _)| *codec_type)
  }
}

impl FromStr for CodecType {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<CodecType> {
    CodecType::TABLE
      .iter()
      .find(|(_, wire)| *wire == s)
      .map(|(codec_type, _)| *codec_type)
      .ok_or_else(|| anyhow!("unknown codec: {}", s))
  }
}

impl fmt::Display for CodecType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
