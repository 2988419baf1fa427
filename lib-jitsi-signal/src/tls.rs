//! TLS connectors for the XMPP and Colibri WebSockets, selected by cargo feature.

use anyhow::Result;

#[cfg(any(feature = "tls-native", feature = "tls-native-vendored"))]
pub(crate) use self::native::wss_connector;
#[cfg(any(
  feature = "tls-rustls-native-roots",
  feature = "tls-rustls-webpki-roots"
))]
pub(crate) use self::with_rustls::wss_connector;

/// Fails when certificate checks are to be skipped but the build does not allow it.
fn check_insecure(insecure: bool) -> Result<()> {
  if !insecure {
    return Ok(());
  }
  if cfg!(feature = "tls-insecure") {
    tracing::warn!("TLS certificate verification is disabled");
    Ok(())
  }
  else {
    Err(anyhow::anyhow!(
      "--tls-insecure requires the tls-insecure feature to be enabled at compile time"
    ))
  }
}

#[cfg(any(
  feature = "tls-rustls-native-roots",
  feature = "tls-rustls-webpki-roots"
))]
mod with_rustls {
  use std::sync::Arc;

  use anyhow::{Context, Result};
  use rustls::{ClientConfig, RootCertStore};
  use tokio_tungstenite::Connector;

  #[cfg(feature = "tls-rustls-native-roots")]
  fn trusted_roots() -> Result<RootCertStore> {
    let certs =
      rustls_native_certs::load_native_certs().context("failed to load platform root certs")?;
    let mut store = RootCertStore::empty();
    let der: Vec<Vec<u8>> = certs.into_iter().map(|cert| cert.0).collect();
    let (added, ignored) = store.add_parsable_certificates(&der);
    tracing::debug!("trusting {} platform root certs ({} unparsable)", added, ignored);
    Ok(store)
  }

  #[cfg(feature = "tls-rustls-webpki-roots")]
  fn trusted_roots() -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    store.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|anchor| {
      rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
        anchor.subject,
        anchor.spki,
        anchor.name_constraints,
      )
    }));
    Ok(store)
  }

  pub(crate) fn wss_connector(insecure: bool) -> Result<Connector> {
    super::check_insecure(insecure)?;
    #[allow(unused_mut)]
    let mut config = ClientConfig::builder()
      .with_safe_defaults()
      .with_root_certificates(trusted_roots()?)
      .with_no_client_auth();
    #[cfg(feature = "tls-insecure")]
    if insecure {
      config
        .dangerous()
        .set_certificate_verifier(Arc::new(AcceptAnyCert));
    }
    Ok(Connector::Rustls(Arc::new(config)))
  }

  #[cfg(feature = "tls-insecure")]
  struct AcceptAnyCert;

  #[cfg(feature = "tls-insecure")]
  impl rustls::client::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
      &self,
      _end_entity: &rustls::Certificate,
      _intermediates: &[rustls::Certificate],
      _server_name: &rustls::ServerName,
      _scts: &mut dyn Iterator<Item = &[u8]>,
      _ocsp_response: &[u8],
      _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
      Ok(rustls::client::ServerCertVerified::assertion())
    }
  }
}

#[cfg(any(feature = "tls-native", feature = "tls-native-vendored"))]
mod native {
  use anyhow::{Context, Result};
  use native_tls::{Protocol, TlsConnector};
  use tokio_tungstenite::Connector;

  pub(crate) fn wss_connector(insecure: bool) -> Result<Connector> {
    super::check_insecure(insecure)?;
    let connector = TlsConnector::builder()
      .min_protocol_version(Some(Protocol::Tlsv12))
      .danger_accept_invalid_certs(insecure)
      .danger_accept_invalid_hostnames(insecure)
      .build()
      .context("failed to build native TLS connector")?;
    Ok(Connector::NativeTls(connector))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn insecure_needs_feature() {
    assert!(check_insecure(false).is_ok());
    assert_eq!(check_insecure(true).is_ok(), cfg!(feature = "tls-insecure"));
  }
}
