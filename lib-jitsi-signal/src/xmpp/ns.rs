/// XEP-0215: External Service Discovery
pub(crate) const EXTDISCO: &str = "urn:xmpp:extdisco:2";

pub(crate) const JITSI_FOCUS: &str = "http://jitsi.org/protocol/focus";
