use serde::{Deserialize, Serialize};

use crate::segment::Version;

/// One entry of the update stream.
///
/// Versions are assigned by the producer and must be non-decreasing in
/// delivery order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent<V> {
    pub version: Version,
    pub payload: V,
}

impl<V> UpdateEvent<V> {
    pub fn new(version: Version, payload: V) -> Self {
        Self { version, payload }
    }

    /// Replace the payload, keeping the version
    pub fn map<W>(self, f: impl FnOnce(V) -> W) -> UpdateEvent<W> {
        UpdateEvent {
            version: self.version,
            payload: f(self.payload),
        }
    }
}

/// Highest version in a batch, `None` for an empty batch
pub fn max_version<V>(events: &[UpdateEvent<V>]) -> Option<Version> {
    events.iter().map(|e| e.version).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_version() {
        let events = vec![
            UpdateEvent::new(3, "a"),
            UpdateEvent::new(9, "b"),
            UpdateEvent::new(5, "c"),
        ];
        assert_eq!(max_version(&events), Some(9));
        assert_eq!(max_version::<&str>(&[]), None);
    }

    #[test]
    fn test_map_keeps_version() {
        let event = UpdateEvent::new(7, 21u32).map(|v| v * 2);
        assert_eq!(event, UpdateEvent::new(7, 42u32));
    }
}
