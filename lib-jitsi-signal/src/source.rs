use std::str::FromStr;

use anyhow::{bail, Result};

/// Remote media source learnt from a Jingle description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
  pub ssrc: u32,
  pub participant_id: String,
  pub media_type: MediaType,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum MediaType {
  Video,
  Audio,
}

impl MediaType {
  pub(crate) fn jitsi_muted_presence_element_name(&self) -> &'static str {
    match self {
      MediaType::Video => "videomuted",
      MediaType::Audio => "audiomuted",
    }
  }

  /// Suffix of this media type's source name in `SourceInfo` (`<endpoint>-a0`).
  pub(crate) fn source_name_suffix(&self) -> &'static str {
    match self {
      MediaType::Video => "-v0",
      MediaType::Audio => "-a0",
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      MediaType::Video => "video",
      MediaType::Audio => "audio",
    }
  }
}

impl FromStr for MediaType {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<MediaType> {
    match s {
      "audio" => Ok(MediaType::Audio),
      "video" => Ok(MediaType::Video),
      other => bail!("unsupported media type: {}", other),
    }
  }
}
