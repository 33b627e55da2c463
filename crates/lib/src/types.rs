//! Identifiers shared across the synchronizer.
//!
//! Entity ids are random UUIDs; transaction ids are assigned by the loadout
//! database and give a total order over every committed write.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A transaction id assigned by [`crate::db::Database`] on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub u64);

impl TxId {
  pub fn next(self) -> TxId {
    TxId(self.0 + 1)
  }
}

impl fmt::Display for TxId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "tx{}", self.0)
  }
}

macro_rules! uuid_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(pub Uuid);

    impl $name {
      pub fn new() -> Self {
        Self(Uuid::new_v4())
      }
    }

    impl Default for $name {
      fn default() -> Self {
        Self::new()
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl FromStr for $name {
      type Err = uuid::Error;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
      }
    }
  };
}

uuid_id!(
  /// Identifies a managed game installation.
  InstallationId
);
uuid_id!(
  /// Identifies a loadout across all of its revisions.
  LoadoutId
);
uuid_id!(
  /// Identifies a mod (loadout item group) within a loadout.
  ModId
);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tx_ids_are_ordered() {
    assert!(TxId(1) < TxId(2));
    assert_eq!(TxId(4).next(), TxId(5));
    assert_eq!(TxId(7).to_string(), "tx7");
  }

  #[test]
  fn uuid_ids_parse_from_display() {
    let id = LoadoutId::new();
    let parsed: LoadoutId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
    assert!("not-a-uuid".parse::<ModId>().is_err());
  }

  #[test]
  fn uuid_ids_serialize_as_plain_strings() {
    let id = InstallationId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", id));
  }
}
