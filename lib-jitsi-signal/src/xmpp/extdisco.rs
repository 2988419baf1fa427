use std::convert::TryFrom;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};
use xmpp_parsers::{iq::IqGetPayload, Element};

use crate::xmpp::ns;

#[derive(Debug)]
pub(crate) struct ServicesQuery {}

impl TryFrom<Element> for ServicesQuery {
  type Error = anyhow::Error;

  fn try_from(elem: Element) -> Result<ServicesQuery> {
    if !elem.is("services", ns::EXTDISCO) {
      bail!("not a services element");
    }
    Ok(ServicesQuery {})
  }
}

impl From<ServicesQuery> for Element {
  fn from(_services: ServicesQuery) -> Element {
    Element::builder("services").ns(ns::EXTDISCO).build()
  }
}

impl IqGetPayload for ServicesQuery {}

/// A STUN or TURN server announced by the XMPP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
  pub r#type: String,
  pub host: String,
  pub name: Option<String>,
  pub port: Option<u16>,
  pub transport: Option<String>,
  pub restricted: bool,
  pub username: Option<String>,
  pub password: Option<String>,
  pub expires: Option<String>,
}

impl TryFrom<&Element> for Service {
  type Error = anyhow::Error;

  fn try_from(elem: &Element) -> Result<Service> {
    let mut service = Service {
      r#type: elem.attr("type").context("missing type attr")?.to_owned(),
      host: elem.attr("host").context("missing host attr")?.to_owned(),
      name: None,
      port: None,
      transport: None,
      restricted: false,
      username: None,
      password: None,
      expires: None,
    };
    for (key, value) in elem.attrs() {
      match key {
        "type" | "host" => {},
        "name" => service.name = Some(value.to_owned()),
        "port" => service.port = Some(value.parse().context("invalid port")?),
        "transport" => service.transport = Some(value.to_owned()),
        "restricted" => {
          service.restricted = match value {
            "1" | "parse" => true,
            "0" => false,
            other => bail!("invalid restricted value: {}", other),
          }
        },
        "username" => service.username = Some(value.to_owned()),
        "password" => service.password = Some(value.to_owned()),
        "expires" => service.expires = Some(value.to_owned()),
        other => debug!("ignoring unknown service attribute {}", other),
      }
    }
    Ok(service)
  }
}

/// Services listed in a `<services/>` result. Services that fail to parse are dropped.
pub(crate) fn parse_services(elem: &Element) -> Vec<Service> {
  elem
    .children()
    .filter(|child| child.name() == "service")
    .filter_map(|child| match Service::try_from(child) {
      Ok(service) => Some(service),
      Err(e) => {
        warn!("dropping external service: {:?}", e);
        None
      },
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn services() {
    let elem: Element = r#"<services xmlns="urn:xmpp:extdisco:2">
        <service type="stun" host="meet.example.org" port="3478"/>
        <service type="turn" host="meet.example.org" port="3478" transport="udp" restricted="1" username="u" password="p" expires="2026-10-19T12:00:00Z"/>
        <service type="turns" host="meet.example.org" restricted="parse"/>
        <service type="turn" host="meet.example.org" restricted="yes"/>
        <service host="missing-type.example.org"/>
        <service type="stun" host="meet.example.org" port="99999"/>
      </services>"#
      .parse()
      .unwrap();
    let services = parse_services(&elem);
    assert_eq!(services.len(), 3);
    assert_eq!(services[0].port, Some(3478));
    assert!(!services[0].restricted);
    assert_eq!(services[1].transport.as_deref(), Some("udp"));
    assert!(services[1].restricted);
    assert_eq!(services[1].username.as_deref(), Some("u"));
    assert!(services[2].restricted);
    assert_eq!(services[2].port, None);
  }

  #[test]
  fn empty_services() {
    let elem: Element = r#"<services xmlns="urn:xmpp:extdisco:2"/>"#.parse().unwrap();
    assert!(parse_services(&elem).is_empty());
    assert!(ServicesQuery::try_from(elem).is_ok());
  }
}
