use std::{collections::BTreeMap, convert::TryFrom};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::warn;
use xmpp_parsers::{iq::IqSetPayload, Element};

use crate::xmpp::ns;

/// Conference request sent to the focus before joining the MUC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Conference {
  pub(crate) machine_uid: String,
  pub(crate) room: String,
  pub(crate) ready: Option<bool>,
  pub(crate) properties: BTreeMap<String, String>,
}

impl IqSetPayload for Conference {}

impl TryFrom<Element> for Conference {
  type Error = anyhow::Error;

  fn try_from(element: Element) -> Result<Conference> {
    if !element.is("conference", ns::JITSI_FOCUS) {
      bail!("not a conference element");
    }
    let ready = match element.attr("ready") {
      Some("true") => Some(true),
      Some("false") => Some(false),
      Some(other) => bail!("invalid ready attribute: {}", other),
      None => None,
    };
    let mut properties = BTreeMap::new();
    for property in element.children().filter(|child| child.name() == "property") {
      properties.insert(
        property
          .attr("name")
          .context("property without name")?
          .to_owned(),
        property.attr("value").unwrap_or_default().to_owned(),
      );
    }
    Ok(Conference {
      machine_uid: element.attr("machine-uid").unwrap_or_default().to_owned(),
      room: element.attr("room").unwrap_or_default().to_owned(),
      ready,
      properties,
    })
  }
}

impl From<Conference> for Element {
  fn from(conference: Conference) -> Element {
    Element::builder("conference")
      .ns(ns::JITSI_FOCUS)
      .attr("machine-uid", conference.machine_uid)
      .attr("room", conference.room)
      .attr("ready", conference.ready.map(|ready| ready.to_string()))
      .append_all(conference.properties.into_iter().map(|(name, value)| {
        Element::builder("property")
          .ns(ns::JITSI_FOCUS)
          .attr("name", name)
          .attr("value", value)
          .build()
      }))
      .build()
  }
}

/// One entry of the JSON carried in a `<SourceInfo/>` presence child.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SourceInfoEntry {
  pub(crate) muted: bool,
  #[serde(rename = "videoType")]
  pub(crate) video_type: Option<String>,
}

/// Decodes a `SourceInfo` payload into `(source name, entry)` pairs.
///
/// Entries without a boolean `muted` field are skipped.
pub(crate) fn parse_source_info(json: &str) -> Result<Vec<(String, SourceInfoEntry)>> {
  let map: serde_json::Map<String, serde_json::Value> =
    serde_json::from_str(json).context("SourceInfo is not a JSON object")?;
  Ok(
    map
      .into_iter()
      .filter_map(
        |(name, value)| match serde_json::from_value::<SourceInfoEntry>(value) {
          Ok(entry) => Some((name, entry)),
          Err(e) => {
            warn!("skipping SourceInfo entry {}: {}", name, e);
            None
          },
        },
      )
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use maplit::btreemap;

  use super::*;

  #[test]
  fn conference_request() {
    let conference = Conference {
      machine_uid: "muid_42".to_owned(),
      room: "room@conference.example.org".to_owned(),
      ready: None,
      properties: btreemap! {
        "stereo".to_owned() => "false".to_owned(),
        "startBitrate".to_owned() => "800".to_owned(),
      },
    };
    let element = Element::from(conference.clone());
    assert!(element.is("conference", "http://jitsi.org/protocol/focus"));
    assert_eq!(element.attr("ready"), None);
    assert_eq!(element.children().count(), 2);
    assert_eq!(Conference::try_from(element).unwrap(), conference);
  }

  #[test]
  fn conference_result() {
    let element: Element = r#"<conference xmlns="http://jitsi.org/protocol/focus" room="room@conference.example.org" ready="true" focusjid="focus@auth.example.org"><property name="authentication" value="false"/></conference>"#
      .parse()
      .unwrap();
    let conference = Conference::try_from(element).unwrap();
    assert_eq!(conference.ready, Some(true));
    assert_eq!(conference.properties["authentication"], "false");

    let element: Element = r#"<conference xmlns="http://jitsi.org/protocol/focus" ready="yes"/>"#
      .parse()
      .unwrap();
    assert!(Conference::try_from(element).is_err());
  }

  #[test]
  fn source_info() {
    let entries = parse_source_info(
      r#"{"abcd-a0":{"muted":true},"abcd-v0":{"muted":false,"videoType":"camera"},"abcd-d0":{"muted":"no"},"abcd-x0":3}"#,
    )
    .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "abcd-a0");
    assert!(entries[0].1.muted);
    assert_eq!(entries[1].1.video_type.as_deref(), Some("camera"));
    assert!(parse_source_info("[1, 2]").is_err());
  }
}
