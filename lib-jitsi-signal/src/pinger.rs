use std::{
  sync::Weak,
  time::Duration,
};

use tokio::{
  sync::Mutex,
  task::JoinHandle,
  time::{self, Instant},
};
use tracing::{debug, warn};

use crate::connection::ConnectionInner;

const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Pings the server while the conference is alive. Stops when dropped.
#[derive(Debug)]
pub(crate) struct Pinger {
  ping_task: JoinHandle<()>,
}

impl Pinger {
  pub(crate) fn new(inner: Weak<Mutex<ConnectionInner>>) -> Pinger {
    let ping_task = tokio::spawn(async move {
      let mut interval = time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
      loop {
        interval.tick().await;
        let inner = match inner.upgrade() {
          Some(inner) => inner,
          None => break,
        };
        let mut locked_inner = inner.lock().await;
        match locked_inner.conference_mut() {
          Some(conference) => {
            if let Err(e) = conference.ping() {
              warn!("failed to send XMPP ping: {:?}", e);
            }
          },
          None => break,
        }
      }
      debug!("pinger stopped");
    });
    Pinger { ping_task }
  }
}

impl Drop for Pinger {
  fn drop(&mut self) {
    self.ping_task.abort();
  }
}
