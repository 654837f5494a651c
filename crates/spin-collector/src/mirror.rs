//! Persistence mirror for the retained spin list
//!
//! The in-memory list is authoritative. The mirror is overwritten after every
//! accepted spin and read once at startup; write failures are logged and the
//! collector keeps running.

use shared::{Color, Spin};
use std::sync::Arc;

use crate::error::CollectorError;
use crate::store::KeyValueStore;

/// Mirrors the retained list under a single store key
#[derive(Clone)]
pub struct PersistenceMirror {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl PersistenceMirror {
    pub fn new(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }

    /// Store key the list is mirrored under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Overwrite the mirror with `spins` (newest first)
    ///
    /// Returns whether the write succeeded.
    pub fn save(&self, spins: &[Spin]) -> bool {
        let result = serde_json::to_string(spins)
            .map_err(CollectorError::from)
            .and_then(|json| self.store.set(&self.key, &json));

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    key = %self.key,
                    count = spins.len(),
                    error = %e,
                    "Failed to persist retained spins"
                );
                false
            }
        }
    }

    /// Read the mirrored list
    ///
    /// Missing or malformed data yields an empty list. Records whose number
    /// is not a pocket are dropped, and colors are re-derived from the number.
    pub fn load(&self) -> Vec<Spin> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read persisted spins");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Spin>>(&raw) {
            Ok(spins) => {
                let spins: Vec<Spin> = spins
                    .into_iter()
                    .filter_map(|spin| self.validated(spin))
                    .collect();
                tracing::info!(key = %self.key, count = spins.len(), "Loaded persisted spins");
                spins
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "Persisted spins are malformed, starting empty"
                );
                Vec::new()
            }
        }
    }

    fn validated(&self, mut spin: Spin) -> Option<Spin> {
        let Some(color) = Color::of(spin.number) else {
            tracing::warn!(
                key = %self.key,
                number = spin.number,
                "Dropping persisted spin with an invalid number"
            );
            return None;
        };

        if spin.color != color {
            tracing::warn!(
                key = %self.key,
                number = spin.number,
                stored = %spin.color,
                derived = %color,
                "Persisted spin color contradicts its number, re-deriving"
            );
            spin.color = color;
        }

        Some(spin)
    }

    /// Remove the mirrored list
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            tracing::error!(key = %self.key, error = %e, "Failed to remove persisted spins");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn spin(number: u8) -> Spin {
        Spin::new(number, Utc::now(), "live_casino", "auto_roulette_1").unwrap()
    }

    #[test]
    fn test_save_then_load() {
        let mirror = PersistenceMirror::new(Arc::new(MemoryStore::new()), "rouletteData");
        let spins = vec![spin(3), spin(0), spin(26)];

        assert!(mirror.save(&spins));
        assert_eq!(mirror.load(), spins);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let mirror = PersistenceMirror::new(Arc::new(MemoryStore::new()), "rouletteData");
        assert!(mirror.load().is_empty());
    }

    #[test]
    fn test_load_malformed_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set("rouletteData", "{not json").unwrap();
        let mirror = PersistenceMirror::new(store, "rouletteData");

        assert!(mirror.load().is_empty());
    }

    #[test]
    fn test_load_drops_invalid_numbers() {
        let store = Arc::new(MemoryStore::new());
        let valid = spin(7);
        let mut records = serde_json::to_value(vec![valid.clone(), spin(8)]).unwrap();
        records[1]["number"] = serde_json::json!(40);
        store.set("rouletteData", &records.to_string()).unwrap();

        let mirror = PersistenceMirror::new(store, "rouletteData");
        assert_eq!(mirror.load(), vec![valid]);
    }

    #[test]
    fn test_load_rederives_color() {
        let store = Arc::new(MemoryStore::new());
        let mut records = serde_json::to_value(vec![spin(12)]).unwrap();
        records[0]["color"] = serde_json::json!("black");
        store.set("rouletteData", &records.to_string()).unwrap();

        let loaded = PersistenceMirror::new(store, "rouletteData").load();
        assert_eq!(loaded[0].number, 12);
        assert_eq!(loaded[0].color, Color::Red);
    }

    #[test]
    fn test_save_failure_reported() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let mirror = PersistenceMirror::new(store, "rouletteData");

        assert!(!mirror.save(&[spin(1)]));
    }

    #[test]
    fn test_clear_removes_key() {
        let store = Arc::new(MemoryStore::new());
        let mirror = PersistenceMirror::new(store.clone(), "rouletteData");
        mirror.save(&[spin(1)]);
        mirror.clear();

        assert_eq!(store.get("rouletteData").unwrap(), None);
    }
}
