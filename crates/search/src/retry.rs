use std::sync::Mutex;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOp {
    Put(Value),
    Delete,
}

/// A failed index write waiting to be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryItem {
    pub code: String,
    pub id: String,
    pub op: RetryOp,
}

/// Failed index writes, at most one per document.
///
/// A newer write for the same document replaces the queued one, so replay
/// preserves commit order per document.
#[derive(Debug, Default)]
pub struct IndexRetryQueue {
    items: Mutex<Vec<RetryItem>>,
}

impl IndexRetryQueue {
    pub fn new() -> Self {
        IndexRetryQueue::default()
    }

    pub fn enqueue(&self, item: RetryItem) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.retain(|i| !(i.code == item.code && i.id == item.id));
        items.push(item);
    }

    /// Take every queued item, oldest first.
    pub fn drain(&self) -> Vec<RetryItem> {
        std::mem::take(&mut *self.items.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newer_write_replaces_queued_one() {
        let queue = IndexRetryQueue::new();
        let item = |id: &str, op: RetryOp| RetryItem {
            code: "sample".to_string(),
            id: id.to_string(),
            op,
        };
        queue.enqueue(item("a", RetryOp::Put(json!({"v": 1}))));
        queue.enqueue(item("b", RetryOp::Put(json!({"v": 1}))));
        queue.enqueue(item("a", RetryOp::Delete));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, "b");
        assert_eq!(drained[1].op, RetryOp::Delete);
        assert!(queue.is_empty());
    }
}
