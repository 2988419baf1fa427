//! Typed model of the Jingle dialect spoken by Jitsi Meet, with conversions to
//! and from [`minidom::Element`].
//!
//! Unknown attributes and children are logged and ignored. A malformed child
//! element is dropped with a warning; only a missing required attribute of the
//! element being parsed fails that element.

#[macro_use]
mod macros;

mod helpers;

pub mod jingle;
pub mod jingle_dtls_srtp;
pub mod jingle_grouping;
pub mod jingle_ice_udp;
pub mod jingle_rtp;
pub mod jingle_ssma;
pub mod ns;

pub use xmpp_parsers::Error;
