//! Per-session context document with last-writer-wins resolution.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::trace;

use super::{ContextValue, MergeError};
use crate::envelope::{DeltaOpKind, PatchOp};

/// Result of a successfully processed patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The document changed.
    Applied,
    /// The stored field is at least as new; nothing changed.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: ContextValue,
    ts: i64,
}

/// Top-level key to (value, last-write timestamp).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextDocument {
    entries: BTreeMap<String, Entry>,
}

/// Top-level key addressed by `path`.
///
/// `"/battery"`, `"battery"` and `"/battery/level"` all address `battery`.
pub fn first_segment(path: &str) -> Result<&str, MergeError> {
    let key = path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default();
    if key.is_empty() {
        return Err(MergeError::InvalidPath(path.to_string()));
    }
    Ok(key)
}

impl ContextDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one patch operation.
    ///
    /// On error the document is unchanged.
    pub fn apply(&mut self, op: &PatchOp) -> Result<ApplyOutcome, MergeError> {
        let key = first_segment(&op.path)?;
        let kind = op.kind().ok_or(MergeError::UnknownOp(op.op))?;

        if let Some(entry) = self.entries.get(key) {
            if entry.ts >= op.ts {
                trace!(key, stored = entry.ts, incoming = op.ts, "stale patch op ignored");
                return Ok(ApplyOutcome::Stale);
            }
        }

        let data = ContextValue::from_json_slice(&op.data).map_err(|e| MergeError::InvalidData {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match kind {
            DeltaOpKind::Replace => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value: data,
                        ts: op.ts,
                    },
                );
            }
            DeltaOpKind::Merge => self.merge(key, data, op.ts)?,
        }
        Ok(ApplyOutcome::Applied)
    }

    fn merge(&mut self, key: &str, data: ContextValue, ts: i64) -> Result<(), MergeError> {
        let ContextValue::Mapping(incoming) = data else {
            return Err(MergeError::PayloadNotMapping {
                key: key.to_string(),
                found: data.kind(),
            });
        };

        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: ContextValue::empty_mapping(),
            ts,
        });
        match &mut entry.value {
            ContextValue::Mapping(existing) => {
                existing.extend(incoming);
                entry.ts = ts;
                Ok(())
            }
            other => Err(MergeError::TypeConflict {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }

    /// Apply `ops` in order; returns the index and error of each rejected op.
    ///
    /// A rejected op does not roll back earlier ones.
    pub fn apply_all<'a>(
        &mut self,
        ops: impl IntoIterator<Item = &'a PatchOp>,
    ) -> Vec<(usize, MergeError)> {
        ops.into_iter()
            .enumerate()
            .filter_map(|(i, op)| self.apply(op).err().map(|e| (i, e)))
            .collect()
    }

    /// Write a value directly, bypassing LWW.
    pub fn insert(&mut self, key: impl Into<String>, value: ContextValue, ts: i64) {
        self.entries.insert(key.into(), Entry { value, ts });
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Last-write timestamp of `key`.
    pub fn timestamp(&self, key: &str) -> Option<i64> {
        self.entries.get(key).map(|e| e.ts)
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Document values as a JSON object (timestamps omitted).
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, e)| (k.clone(), e.value.clone().into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lab_document() -> ContextDocument {
        let mut doc = ContextDocument::new();
        doc.insert("battery", json!(80).into(), 0);
        doc.insert("location", json!("Lab").into(), 0);
        doc
    }

    #[test]
    fn test_replace_then_merge() {
        let mut doc = lab_document();

        doc.apply(&PatchOp::replace("/battery", &json!(95), 100)).unwrap();
        doc.apply(&PatchOp::merge("/metrics", &json!({"steps": 1200}), 101))
            .unwrap();

        assert_eq!(
            doc.to_json(),
            json!({"battery": 95, "location": "Lab", "metrics": {"steps": 1200}})
        );
    }

    #[test]
    fn test_stale_op_ignored() {
        let mut doc = lab_document();
        doc.apply(&PatchOp::replace("/battery", &json!(95), 100)).unwrap();

        let outcome = doc.apply(&PatchOp::replace("/battery", &json!(10), 99)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);
        assert_eq!(doc.get("battery"), Some(&json!(95).into()));
        assert_eq!(doc.timestamp("battery"), Some(100));

        // Equal timestamps are stale too.
        let outcome = doc.apply(&PatchOp::replace("/battery", &json!(10), 100)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);
    }

    #[test]
    fn test_merge_overwrites_same_keys() {
        let mut doc = ContextDocument::new();
        doc.apply(&PatchOp::merge("/m", &json!({"a": 1, "b": 2}), 1)).unwrap();
        doc.apply(&PatchOp::merge("/m", &json!({"b": 3, "c": 4}), 2)).unwrap();

        assert_eq!(doc.to_json(), json!({"m": {"a": 1, "b": 3, "c": 4}}));
        assert_eq!(doc.timestamp("m"), Some(2));
    }

    #[test]
    fn test_merge_on_scalar_conflicts() {
        let mut doc = lab_document();
        let err = doc
            .apply(&PatchOp::merge("/battery", &json!({"level": 1}), 5))
            .unwrap_err();

        assert_eq!(
            err,
            MergeError::TypeConflict {
                key: "battery".into(),
                found: "number"
            }
        );
        assert_eq!(doc.get("battery"), Some(&json!(80).into()));
        assert_eq!(doc.timestamp("battery"), Some(0));
    }

    #[test]
    fn test_merge_non_mapping_payload() {
        let mut doc = ContextDocument::new();
        let err = doc.apply(&PatchOp::merge("/m", &json!([1, 2]), 1)).unwrap_err();
        assert!(matches!(err, MergeError::PayloadNotMapping { .. }));
        assert!(doc.is_empty());
    }

    #[test]
    fn test_replace_discards_structure() {
        let mut doc = ContextDocument::new();
        doc.apply(&PatchOp::merge("/m", &json!({"a": 1}), 1)).unwrap();
        doc.apply(&PatchOp::replace("/m", &json!("flat"), 2)).unwrap();
        assert_eq!(doc.to_json(), json!({"m": "flat"}));
    }

    #[test]
    fn test_multi_segment_path_targets_top_level() {
        let mut doc = ContextDocument::new();
        doc.apply(&PatchOp::replace("/device/battery", &json!(1), 1)).unwrap();
        assert_eq!(doc.get("device"), Some(&json!(1).into()));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_invalid_path_and_data() {
        let mut doc = ContextDocument::new();
        assert_eq!(
            doc.apply(&PatchOp::replace("/", &json!(1), 1)),
            Err(MergeError::InvalidPath("/".into()))
        );

        let bad = PatchOp {
            data: b"{oops".to_vec(),
            ..PatchOp::replace("/k", &json!(null), 1)
        };
        assert!(matches!(doc.apply(&bad), Err(MergeError::InvalidData { .. })));

        let unknown = PatchOp {
            op: 9,
            ..PatchOp::replace("/k", &json!(null), 1)
        };
        assert_eq!(doc.apply(&unknown), Err(MergeError::UnknownOp(9)));
    }

    #[test]
    fn test_apply_all_continues_after_failure() {
        let mut doc = lab_document();
        let ops = vec![
            PatchOp::replace("/battery", &json!(50), 10),
            PatchOp::merge("/location", &json!({"room": 2}), 11),
            PatchOp::replace("/mode", &json!("idle"), 12),
        ];

        let rejected = doc.apply_all(&ops);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 1);
        assert_eq!(doc.get("battery"), Some(&json!(50).into()));
        assert_eq!(doc.get("mode"), Some(&json!("idle").into()));
    }

    #[test]
    fn test_first_segment() {
        assert_eq!(first_segment("/battery").unwrap(), "battery");
        assert_eq!(first_segment("battery").unwrap(), "battery");
        assert_eq!(first_segment("//a/b").unwrap(), "a");
        assert!(first_segment("").is_err());
    }
}
