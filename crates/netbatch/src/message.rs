use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque payload flowing through the pipeline.
/// The pipeline never looks inside `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    data: Bytes,
    /// Wall clock at intake, used for end-to-end latency only
    received_at: DateTime<Utc>,
}

impl Message {
    #[inline]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            received_at: Utc::now(),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replace the payload, keeping the intake timestamp.
    pub fn with_data(self, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            received_at: self.received_at,
        }
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

/// Ordered group of messages collected in one assembly window.
///
/// Never empty: [`Batch::new`] refuses an empty item list. Items cannot be
/// added or removed after construction.
#[derive(Debug, Clone)]
pub struct Batch {
    id: Uuid,
    created_at: DateTime<Utc>,
    items: Vec<Message>,
}

impl Batch {
    /// Build a batch with a fresh v4 id. Returns `None` when `items` is empty.
    pub fn new(items: Vec<Message>) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            items,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total payload bytes across all items
    pub fn payload_bytes(&self) -> usize {
        self.items.iter().map(Message::len).sum()
    }

    /// Intake time of the earliest item
    pub fn oldest_received_at(&self) -> DateTime<Utc> {
        self.items
            .iter()
            .map(Message::received_at)
            .min()
            .unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_empty_batch_is_refused() {
        assert!(Batch::new(Vec::new()).is_none());
    }

    #[test]
    fn test_batch_keeps_item_order() {
        let items = vec![Message::new("a"), Message::new("b"), Message::new("c")];
        let batch = Batch::new(items).unwrap();

        let data: Vec<&[u8]> = batch.items().iter().map(|m| m.data().as_ref()).collect();
        assert_eq!(data, vec![b"a".as_ref(), b"b".as_ref(), b"c".as_ref()]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.payload_bytes(), 3);
    }

    #[test]
    fn test_batch_ids_are_unique() {
        let ids: HashSet<Uuid> = (0..1000)
            .map(|i| Batch::new(vec![Message::new(format!("m{}", i))]).unwrap().id())
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_with_data_keeps_timestamp() {
        let original = Message::new("raw");
        let received = original.received_at();
        let transformed = original.with_data("cooked");
        assert_eq!(transformed.data().as_ref(), b"cooked");
        assert_eq!(transformed.received_at(), received);
    }

    #[test]
    fn test_oldest_received_at() {
        let first = Message::new("first");
        let second = Message::new("second");
        let oldest = first.received_at();
        let batch = Batch::new(vec![second, first]).unwrap();
        assert_eq!(batch.oldest_received_at(), oldest);
    }
}
