pub mod codec;
pub mod colibri;
pub mod conference;
pub mod connection;
pub mod disco;
pub mod iq;
pub mod jingle;
pub mod negotiator;
mod pinger;
pub mod source;
pub mod stanza;
mod tls;
mod util;
mod xmpp;

pub use crate::{
  codec::CodecType,
  colibri::{ColibriChannel, ColibriMessage},
  conference::{Conference, ConferenceCallbacks, ConferenceConfig, Participant},
  connection::{ConferenceEvent, Connection, JoinOptions},
  disco::{compute_disco_str, CapsHashes},
  iq::IqTable,
  jingle::{Codec, JingleSession, LocalMaterial},
  negotiator::{NegotiationResult, Negotiator, NegotiatorCallbacks},
  source::{MediaType, Source},
  stanza::{StanzaBuffer, Step},
  xmpp::extdisco::Service,
};

/// Installs a global `fmt` subscriber logging at `level` and above.
#[cfg(feature = "tracing-subscriber")]
pub fn init_tracing(level: tracing::Level) {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
    .with_target(false)
    .init();
}
