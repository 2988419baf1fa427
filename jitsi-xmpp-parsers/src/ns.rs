pub use xmpp_parsers::ns::{
  JINGLE, JINGLE_DTLS, JINGLE_ICE_UDP, JINGLE_RTCP_FB, JINGLE_RTP, JINGLE_SSMA,
};

/// RTP header extensions
pub const JINGLE_RTP_HDREXT: &str = "urn:xmpp:jingle:apps:rtp:rtp-hdrext:0";

/// Jingle grouping framework (BUNDLE, LS)
pub const JINGLE_GROUPING: &str = "urn:xmpp:jingle:apps:grouping:0";

/// Jitsi Meet general namespace
pub const JITSI_MEET: &str = "http://jitsi.org/jitmeet";

/// Jitsi Meet Colibri namespace
pub const JITSI_COLIBRI: &str = "http://jitsi.org/protocol/colibri";
