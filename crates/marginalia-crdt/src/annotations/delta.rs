//! Replaying sequence deltas against a plain `Vec`.

/// One step of a sequence delta.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOp<T> {
    /// Skip this many existing items.
    Retain(usize),
    /// Insert a run of items at the current offset.
    Insert(Vec<T>),
    /// Remove this many items at the current offset.
    Delete(usize),
}

/// Apply `ops` to `target` with a running offset.
///
/// A retain advances the offset. An insert splices its run in at the offset,
/// keeping the run's order, then advances past it. A delete removes items at
/// the offset without advancing. Operations that run past the end are
/// clamped. Returns whether `target` changed.
pub fn apply_sequence<T>(target: &mut Vec<T>, ops: impl IntoIterator<Item = SequenceOp<T>>) -> bool {
    let mut offset = 0usize;
    let mut changed = false;
    for op in ops {
        match op {
            SequenceOp::Retain(n) => {
                offset = (offset + n).min(target.len());
            }
            SequenceOp::Insert(items) => {
                let at = offset.min(target.len());
                let count = items.len();
                // Each item goes in at the same index, last first, so the
                // run ends up in its original order.
                for item in items.into_iter().rev() {
                    target.insert(at, item);
                }
                offset = at + count;
                changed |= count > 0;
            }
            SequenceOp::Delete(n) => {
                let end = (offset + n).min(target.len());
                if offset < end {
                    target.drain(offset..end);
                    changed = true;
                }
                if offset + n > end {
                    tracing::debug!(offset, n, len = target.len(), "delete ran past end of sequence");
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_inserts_at_head_replay_in_order() {
        // Remote inserted t1 at 0, then t2 at 0.
        let mut local: Vec<&str> = vec![];
        let changed = apply_sequence(
            &mut local,
            [SequenceOp::Insert(vec!["t2", "t1"]), SequenceOp::Retain(1)],
        );
        assert!(changed);
        assert_eq!(local, ["t2", "t1"]);
    }

    #[test]
    fn test_retain_insert_delete() {
        let mut local = vec!["a", "b", "c", "d"];
        apply_sequence(
            &mut local,
            [
                SequenceOp::Retain(1),
                SequenceOp::Insert(vec!["x", "y"]),
                SequenceOp::Delete(1),
                SequenceOp::Retain(1),
                SequenceOp::Insert(vec!["z"]),
            ],
        );
        assert_eq!(local, ["a", "x", "y", "c", "z", "d"]);
    }

    #[test]
    fn test_delete_then_insert_replaces_in_place() {
        let mut local = vec!["c1", "c2"];
        apply_sequence(
            &mut local,
            [SequenceOp::Delete(1), SequenceOp::Insert(vec!["c1'"])],
        );
        assert_eq!(local, ["c1'", "c2"]);

        let mut local = vec!["c1", "c2"];
        apply_sequence(
            &mut local,
            [SequenceOp::Insert(vec!["c1'"]), SequenceOp::Delete(1)],
        );
        assert_eq!(local, ["c1'", "c2"]);
    }

    #[test]
    fn test_out_of_range_ops_are_clamped() {
        let mut local = vec![1, 2];
        let changed = apply_sequence(
            &mut local,
            [SequenceOp::Retain(5), SequenceOp::Insert(vec![3]), SequenceOp::Delete(4)],
        );
        assert!(changed);
        assert_eq!(local, [1, 2, 3]);
    }

    #[test]
    fn test_retain_only_is_not_a_change() {
        let mut local = vec![1];
        assert!(!apply_sequence(&mut local, [SequenceOp::Retain(1)]));
    }
}
