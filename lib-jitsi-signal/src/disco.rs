//! XEP-0115 capability string and hashes advertised in our MUC presence.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use tracing::debug;
use xmpp_parsers::{
  caps,
  disco::{DiscoInfoResult, Feature, Identity},
  hashes::Algo,
  ns, Element,
};

/// Node advertised in `<c/>`; disco queries for `<DISCO_NODE>#<sha1>` are answered.
pub const DISCO_NODE: &str = "http://jitsi.org/jitsimeet";

pub(crate) static DISCO_INFO: Lazy<DiscoInfoResult> = Lazy::new(|| DiscoInfoResult {
  node: None,
  identities: vec![Identity::new("client", "bot", "en", "jitsi-signal")],
  features: vec![
    Feature::new(ns::DISCO_INFO),
    Feature::new(ns::JINGLE_RTP_VIDEO),
    Feature::new(ns::JINGLE_RTP_AUDIO),
    Feature::new(ns::JINGLE_ICE_UDP),
    Feature::new(ns::JINGLE_DTLS),
    // rtp-bundle
    Feature::new("urn:ietf:rfc:5888"),
    // rtcp-mux
    Feature::new("urn:ietf:rfc:5761"),
    // rtx
    Feature::new("urn:ietf:rfc:4588"),
    // transport-cc
    Feature::new("http://jitsi.org/tcc"),
  ],
  extensions: vec![],
});

/// Builds `category/type/lang/name<` followed by `var<` for every feature.
///
/// Features are taken in document order.
pub fn compute_disco_str(disco: &Element) -> Result<String> {
  let identity = disco
    .children()
    .find(|child| child.name() == "identity")
    .context("disco info has no identity")?;
  let attr = |name: &str| {
    identity
      .attr(name)
      .with_context(|| format!("identity has no {} attribute", name))
  };
  let mut disco_str = format!(
    "{}/{}/{}/{}<",
    attr("category")?,
    attr("type")?,
    attr("xml:lang")?,
    attr("name")?
  );
  for feature in disco.children().filter(|child| child.name() == "feature") {
    disco_str.push_str(feature.attr("var").context("feature has no var attribute")?);
    disco_str.push('<');
  }
  Ok(disco_str)
}

/// Base64 encoded SHA-1 and SHA-256 digests of a capability string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsHashes {
  pub sha1_base64: String,
  pub sha256_base64: String,
}

impl CapsHashes {
  pub fn compute(disco: &Element) -> Result<CapsHashes> {
    let disco_str = compute_disco_str(disco)?;
    debug!("disco string: {}", disco_str);
    let sha1 = caps::hash_caps(disco_str.as_bytes(), Algo::Sha_1).map_err(|e| anyhow!(e))?;
    let sha256 = caps::hash_caps(disco_str.as_bytes(), Algo::Sha_256).map_err(|e| anyhow!(e))?;
    Ok(CapsHashes {
      sha1_base64: sha1.to_base64(),
      sha256_base64: sha256.to_base64(),
    })
  }

  /// Hashes of the static capability set of this client.
  pub fn ours() -> Result<CapsHashes> {
    let disco: Element = DISCO_INFO.clone().into();
    CapsHashes::compute(&disco)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const OUR_DISCO_STR: &str = "client/bot/en/jitsi-signal<http://jabber.org/protocol/disco#info<urn:xmpp:jingle:apps:rtp:video<urn:xmpp:jingle:apps:rtp:audio<urn:xmpp:jingle:transports:ice-udp:1<urn:xmpp:jingle:apps:dtls:0<urn:ietf:rfc:5888<urn:ietf:rfc:5761<urn:ietf:rfc:4588<http://jitsi.org/tcc<";

  #[test]
  fn our_disco_str() {
    let disco: Element = DISCO_INFO.clone().into();
    assert_eq!(compute_disco_str(&disco).unwrap(), OUR_DISCO_STR);
  }

  #[test]
  fn our_hashes() {
    let hashes = CapsHashes::ours().unwrap();
    assert_eq!(hashes.sha1_base64, "iRTkCrKOmpREQKs8JGGmK+KXZ2Q=");
    assert_eq!(hashes.sha256_base64, "PuKeum4wWKFvZofc7yB1MBqUdWqYPIHmS+E/DwTj5DI=");
    assert_eq!(CapsHashes::ours().unwrap(), hashes);
  }

  #[test]
  fn features_keep_document_order() {
    let disco: Element = r#"<query xmlns="http://jabber.org/protocol/disco#info">
        <identity category="client" type="pc" xml:lang="en" name="test"/>
        <feature var="b"/>
        <feature var="a"/>
      </query>"#
      .parse()
      .unwrap();
    assert_eq!(compute_disco_str(&disco).unwrap(), "client/pc/en/test<b<a<");
  }

  #[test]
  fn identity_attributes_are_required() {
    let disco: Element = r#"<query xmlns="http://jabber.org/protocol/disco#info"><identity category="client" type="pc" name="test"/></query>"#
      .parse()
      .unwrap();
    assert!(compute_disco_str(&disco).is_err());

    let disco: Element = r#"<query xmlns="http://jabber.org/protocol/disco#info"><feature var="a"/></query>"#
      .parse()
      .unwrap();
    assert!(compute_disco_str(&disco).is_err());
  }

  #[test]
  fn feature_without_var_fails() {
    let disco: Element = r#"<query xmlns="http://jabber.org/protocol/disco#info">
        <identity category="client" type="pc" xml:lang="en" name="test"/>
        <feature var="a"/>
        <feature/>
      </query>"#
      .parse()
      .unwrap();
    assert!(compute_disco_str(&disco).is_err());
  }
}
