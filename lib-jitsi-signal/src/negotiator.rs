//! XMPP stream bootstrap: open, SASL ANONYMOUS, bind and service discovery.

use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};
use xmpp_parsers::{
  bind::BindQuery,
  disco::DiscoInfoQuery,
  iq::Iq,
  sasl::{Auth, Mechanism},
  websocket::Open,
  BareJid, Element, FullJid, Jid,
};

use crate::{
  iq::IqTable,
  stanza::{to_xml, StanzaBuffer, Step},
  xmpp::extdisco::{self, Service, ServicesQuery},
};

/// Transport used by a negotiator to emit serialised stanzas.
pub trait NegotiatorCallbacks {
  fn send_payload(&mut self, payload: &str) -> Result<()>;
}

/// What the bootstrap learnt about our session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResult {
  pub jid: FullJid,
  pub external_services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NegotiatorState {
  Idle,
  OpeningPreAuthentication,
  ReceivingFeaturesPreAuthentication,
  Authenticating,
  OpeningPostAuthentication,
  Binding { id: String },
  Discovering { id: String },
  DiscoveringExternalServices { id: String },
  Done,
  Failed,
}

pub struct Negotiator<C> {
  host: BareJid,
  callbacks: C,
  state: NegotiatorState,
  buffer: StanzaBuffer,
  iq_table: IqTable,
  jid: Option<FullJid>,
  external_services: Vec<Service>,
}

impl<C> fmt::Debug for Negotiator<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Negotiator")
      .field("host", &self.host)
      .field("state", &self.state)
      .field("jid", &self.jid)
      .finish()
  }
}

impl<C: NegotiatorCallbacks> Negotiator<C> {
  pub fn new(host: &str, callbacks: C) -> Result<Negotiator<C>> {
    Ok(Negotiator {
      host: host.parse().context("invalid XMPP domain")?,
      callbacks,
      state: NegotiatorState::Idle,
      buffer: StanzaBuffer::new(),
      iq_table: IqTable::new(),
      jid: None,
      external_services: vec![],
    })
  }

  /// Opens the stream. Must be called once before the first `feed`.
  #[tracing::instrument(level = "debug", skip(self), err)]
  pub fn start(&mut self) -> Result<()> {
    if self.state != NegotiatorState::Idle {
      bail!("negotiation already started");
    }
    self.send(Open::new(self.host.clone()).into())?;
    self.state = NegotiatorState::OpeningPreAuthentication;
    Ok(())
  }

  /// Feeds received text, which may hold a partial stanza or several stanzas.
  ///
  /// Once `Done` is returned, text following the last handled stanza can be taken with
  /// [`Negotiator::take_unprocessed`].
  #[tracing::instrument(level = "trace", skip(self), err)]
  pub fn feed(&mut self, payload: &str) -> Result<Step> {
    match self.state {
      NegotiatorState::Idle => bail!("negotiation not started"),
      NegotiatorState::Failed => bail!("negotiation failed"),
      NegotiatorState::Done => return Ok(Step::Done),
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
        self.state = NegotiatorState::Failed;
        return Err(e);
      }
      if self.state == NegotiatorState::Done {
        return Ok(Step::Done);
      }
    }
    Ok(Step::Continue)
  }

  pub fn is_done(&self) -> bool {
    self.state == NegotiatorState::Done
  }

  pub fn result(&self) -> Option<NegotiationResult> {
    if !self.is_done() {
      return None;
    }
    Some(NegotiationResult {
      jid: self.jid.clone()?,
      external_services: self.external_services.clone(),
    })
  }

  /// Buffered text not consumed by the negotiation.
  pub fn take_unprocessed(&mut self) -> String {
    self.buffer.take()
  }

  pub fn callbacks(&self) -> &C {
    &self.callbacks
  }

  pub fn into_callbacks(self) -> C {
    self.callbacks
  }

  fn send(&mut self, element: Element) -> Result<()> {
    let xml = to_xml(&element)?;
    self.callbacks.send_payload(&xml)
  }

  fn jid(&self) -> Result<FullJid> {
    self.jid.clone().ok_or_else(|| anyhow!("missing jid"))
  }

  fn handle_stanza(&mut self, element: Element) -> Result<()> {
    use NegotiatorState::*;
    match self.state.clone() {
      OpeningPreAuthentication => {
        if element.name() == "open" && element.attr("from") == Some(self.host.domain.as_str()) {
          info!("Connected XMPP WebSocket");
          self.state = ReceivingFeaturesPreAuthentication;
        }
        else {
          debug!("waiting for <open/>, ignoring <{}>", element.name());
        }
      },
      ReceivingFeaturesPreAuthentication => {
        if element.name() == "features" {
          self.send(
            Auth {
              mechanism: Mechanism::Anonymous,
              data: vec![],
            }
            .into(),
          )?;
          self.state = Authenticating;
        }
        else {
          debug!("waiting for <stream:features/>, ignoring <{}>", element.name());
        }
      },
      Authenticating => match element.name() {
        "success" => {
          self.send(Open::new(self.host.clone()).into())?;
          self.state = OpeningPostAuthentication;
        },
        "failure" => bail!("SASL authentication failed"),
        other => debug!("waiting for <success/>, ignoring <{}>", other),
      },
      OpeningPostAuthentication => {
        if element.name() == "open" {
          info!("Logged in anonymously");
          let id = self.iq_table.generate_id();
          self.send(Iq::from_set(id.clone(), BindQuery::new(None)).into())?;
          self.state = Binding { id };
        }
        else {
          debug!("waiting for <open/>, ignoring <{}>", element.name());
        }
      },
      Binding { id } => {
        if !is_response_to(&element, &id) {
          debug!("waiting for bind response, ignoring <{}>", element.name());
          return Ok(());
        }
        if element.attr("type") != Some("result") {
          bail!("bind failed");
        }
        let jid: FullJid = element
          .children()
          .find(|child| child.name() == "bind")
          .and_then(|bind| bind.children().find(|child| child.name() == "jid"))
          .context("bind response has no jid")?
          .text()
          .trim()
          .parse()
          .context("bind response has an invalid jid")?;
        info!("My JID: {}", jid);
        self.jid = Some(jid.clone());

        let id = self.iq_table.generate_id();
        let iq = Iq::from_get(id.clone(), DiscoInfoQuery { node: None })
          .with_from(Jid::Full(jid))
          .with_to(Jid::Bare(self.host.clone()));
        self.send(iq.into())?;
        self.state = Discovering { id };
      },
      Discovering { id } => {
        if !is_response_to(&element, &id) {
          debug!("waiting for disco response, ignoring <{}>", element.name());
          return Ok(());
        }
        if element.attr("type") != Some("result") {
          bail!("disco failed");
        }
        // server capabilities are not used yet

        let id = self.iq_table.generate_id();
        let iq = Iq::from_get(id.clone(), ServicesQuery {})
          .with_from(Jid::Full(self.jid()?))
          .with_to(Jid::Bare(self.host.clone()));
        self.send(iq.into())?;
        self.state = DiscoveringExternalServices { id };
      },
      DiscoveringExternalServices { id } => {
        if !is_response_to(&element, &id) {
          debug!(
            "waiting for external services response, ignoring <{}>",
            element.name()
          );
          return Ok(());
        }
        match element.children().find(|child| child.name() == "services") {
          Some(services) if element.attr("type") == Some("result") => {
            self.external_services = extdisco::parse_services(services);
            debug!("external services: {:?}", self.external_services);
          },
          _ => warn!("discovering external services failed: STUN/TURN will not work"),
        }
        self.state = Done;
      },
      Idle | Done | Failed => {},
    }
    Ok(())
  }
}

fn is_response_to(element: &Element, id: &str) -> bool {
  element.name() == "iq"
    && element.attr("id") == Some(id)
    && matches!(element.attr("type"), Some("result") | Some("error"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Default)]
  struct Recorder {
    sent: Vec<Element>,
  }

  impl NegotiatorCallbacks for Recorder {
    fn send_payload(&mut self, payload: &str) -> Result<()> {
      self.sent.push(payload.parse().unwrap());
      Ok(())
    }
  }

  fn started() -> Negotiator<Recorder> {
    let mut negotiator = Negotiator::new("example.org", Recorder::default()).unwrap();
    negotiator.start().unwrap();
    negotiator
  }

  #[test]
  fn end_to_end() {
    let mut negotiator = started();
    let steps = [
      r#"<open xmlns="urn:ietf:params:xml:ns:xmpp-framing" from="example.org" version="1.0"/>"#,
      "<stream:features/>",
      "<success/>",
      "<open/>",
      r#"<iq id="iq_1" type="result"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"><jid>room123@example.org/abcde</jid></bind></iq>"#,
      r#"<iq id="iq_2" type="result"/>"#,
    ];
    for step in steps.iter() {
      assert_eq!(negotiator.feed(step).unwrap(), Step::Continue);
    }
    assert_eq!(
      negotiator
        .feed(r#"<iq id="iq_3" type="result"><services xmlns="urn:xmpp:extdisco:2"/></iq>"#)
        .unwrap(),
      Step::Done
    );

    let result = negotiator.result().unwrap();
    assert_eq!(result.jid, FullJid::new("room123", "example.org", "abcde"));
    assert!(result.external_services.is_empty());

    let sent = &negotiator.callbacks().sent;
    let names: Vec<_> = sent.iter().map(|element| element.name().to_owned()).collect();
    assert_eq!(names, vec!["open", "auth", "open", "iq", "iq", "iq"]);
    assert_eq!(sent[0].attr("to"), Some("example.org"));
    assert_eq!(sent[1].attr("mechanism"), Some("ANONYMOUS"));
    assert_eq!(sent[3].attr("id"), Some("iq_1"));
    assert_eq!(sent[3].attr("type"), Some("set"));
    assert_eq!(sent[4].attr("id"), Some("iq_2"));
    assert_eq!(sent[4].attr("from"), Some("room123@example.org/abcde"));
    assert_eq!(sent[5].attr("id"), Some("iq_3"));
    assert!(sent[5].has_child("services", "urn:xmpp:extdisco:2"));

    assert_eq!(negotiator.feed("<presence/>").unwrap(), Step::Done);
  }

  #[test]
  fn unrelated_stanzas_are_ignored() {
    let mut negotiator = started();
    negotiator.feed(r#"<open from="other.org"/>"#).unwrap();
    negotiator.feed("<message/>").unwrap();
    negotiator.feed(r#"<open from="example.org"/><stream:features/>"#).unwrap();
    assert_eq!(negotiator.callbacks().sent.len(), 2);
    negotiator.feed("<success/><open/>").unwrap();
    negotiator.feed(r#"<iq id="iq_7" type="result"/><presence/>"#).unwrap();
    negotiator.feed("<broken></oops>").unwrap();
    negotiator
      .feed(r#"<iq id="iq_1" type="result"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"><jid>"#)
      .unwrap();
    negotiator.feed("abc@example.org/x</jid></bind></iq>").unwrap();
    assert_eq!(negotiator.callbacks().sent.len(), 5);
    assert!(negotiator.result().is_none());
  }

  #[test]
  fn services_are_reported() {
    let mut negotiator = started();
    negotiator
      .feed(r#"<open from="example.org"/><stream:features/><success/><open/>"#)
      .unwrap();
    negotiator
      .feed(r#"<iq id="iq_1" type="result"><bind><jid>a@example.org/b</jid></bind></iq><iq id="iq_2" type="result"/>"#)
      .unwrap();
    let step = negotiator
      .feed(r#"<iq id="iq_3" type="result"><services xmlns="urn:xmpp:extdisco:2"><service type="stun" host="example.org" port="3478"/></services></iq><presence/>"#)
      .unwrap();
    assert_eq!(step, Step::Done);
    assert_eq!(negotiator.result().unwrap().external_services.len(), 1);
    assert_eq!(negotiator.take_unprocessed(), "<presence/>");
  }

  #[test]
  fn bind_without_jid_is_fatal() {
    let mut negotiator = started();
    negotiator
      .feed(r#"<open from="example.org"/><stream:features/><success/><open/>"#)
      .unwrap();
    assert!(negotiator
      .feed(r#"<iq id="iq_1" type="result"><bind xmlns="urn:ietf:params:xml:ns:xmpp-bind"/></iq>"#)
      .is_err());
    assert!(negotiator.feed("<presence/>").is_err());
  }

  #[test]
  fn sasl_failure_is_fatal() {
    let mut negotiator = started();
    negotiator
      .feed(r#"<open from="example.org"/><stream:features/>"#)
      .unwrap();
    assert!(negotiator
      .feed(r#"<failure xmlns="urn:ietf:params:xml:ns:xmpp-sasl"><not-authorized/></failure>"#)
      .is_err());
  }

  #[test]
  fn feed_before_start() {
    let mut negotiator = Negotiator::new("example.org", Recorder::default()).unwrap();
    assert!(negotiator.feed("<open/>").is_err());
    negotiator.start().unwrap();
    assert!(negotiator.start().is_err());
  }
}
