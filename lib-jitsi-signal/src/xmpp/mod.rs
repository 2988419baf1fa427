pub(crate) mod extdisco;
pub(crate) mod jitsi;
pub(crate) mod ns;
