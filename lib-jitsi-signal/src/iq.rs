use std::fmt;

use tracing::{debug, warn};

/// Invoked once with `true` for a result and `false` for an error.
pub type IqCallback = Box<dyn FnOnce(bool) + Send>;

struct PendingIq {
  id: String,
  on_result: Option<IqCallback>,
}

/// Outstanding IQ requests of one negotiator, keyed by generated id.
#[derive(Default)]
pub struct IqTable {
  serial: u64,
  pending: Vec<PendingIq>,
}

impl fmt::Debug for IqTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IqTable")
      .field("serial", &self.serial)
      .field(
        "pending",
        &self.pending.iter().map(|iq| &iq.id).collect::<Vec<_>>(),
      )
      .finish()
  }
}

impl IqTable {
  pub fn new() -> IqTable {
    IqTable::default()
  }

  /// Allocates the next id (`iq_1`, `iq_2`, ...) without tracking it.
  pub fn generate_id(&mut self) -> String {
    self.serial += 1;
    format!("iq_{}", self.serial)
  }

  /// Allocates an id and records it as awaiting a response.
  pub fn register(&mut self, on_result: Option<IqCallback>) -> String {
    let id = self.generate_id();
    self.pending.push(PendingIq {
      id: id.clone(),
      on_result,
    });
    id
  }

  pub fn is_pending(&self, id: &str) -> bool {
    self.pending.iter().any(|iq| iq.id == id)
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  /// Completes the first pending request with this id. Returns `false` for a stray response.
  pub fn complete(&mut self, id: &str, success: bool) -> bool {
    match self.pending.iter().position(|iq| iq.id == id) {
      Some(index) => {
        let iq = self.pending.remove(index);
        debug!("iq {} completed (success: {})", id, success);
        if let Some(on_result) = iq.on_result {
          on_result(success);
        }
        true
      },
      None => {
        warn!("stray iq response: {}", id);
        false
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use super::*;

  fn recorder(log: &Arc<Mutex<Vec<(String, bool)>>>, name: &str) -> Option<IqCallback> {
    let log = log.clone();
    let name = name.to_owned();
    Some(Box::new(move |success| {
      log.lock().unwrap().push((name, success))
    }))
  }

  #[test]
  fn ids_are_per_instance() {
    let mut a = IqTable::new();
    let mut b = IqTable::new();
    assert_eq!(a.generate_id(), "iq_1");
    assert_eq!(a.register(None), "iq_2");
    assert_eq!(b.generate_id(), "iq_1");
    assert!(a.is_pending("iq_2"));
    assert!(!a.is_pending("iq_1"));
  }

  #[test]
  fn out_of_order_results() {
    let log = Arc::new(Mutex::new(vec![]));
    let mut table = IqTable::new();
    let first = table.register(recorder(&log, "first"));
    let second = table.register(recorder(&log, "second"));
    let third = table.register(None);
    assert_eq!(table.len(), 3);

    assert!(table.complete(&third, true));
    assert!(table.complete(&second, false));
    assert!(table.complete(&first, true));
    assert!(table.is_empty());
    assert_eq!(
      *log.lock().unwrap(),
      vec![("second".to_owned(), false), ("first".to_owned(), true)]
    );

    // late duplicate
    assert!(!table.complete(&second, true));
    assert_eq!(log.lock().unwrap().len(), 2);
  }

  #[test]
  fn unknown_id_is_stray() {
    let mut table = IqTable::new();
    table.register(None);
    assert!(!table.complete("iq_99", true));
    assert_eq!(table.len(), 1);
  }
}
