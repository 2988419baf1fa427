use rand::{distributions::Alphanumeric, Rng};

/// Random alphanumeric label, used for stream ids and cnames.
pub(crate) fn generate_id() -> String {
  rand::thread_rng()
    .sample_iter(&Alphanumeric)
    .take(16)
    .map(char::from)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_alphanumeric() {
    let id = generate_id();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(id, generate_id());
  }
}
