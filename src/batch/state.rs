//! Stateless queries over ordered collections of message records.

use std::collections::HashMap;

use super::record::{MessageRecord, MessageState};

/// Filter and count helpers. None of these mutate or retain records.
pub struct MessageStateManager;

impl MessageStateManager {
    /// Records in the given state, original order preserved
    pub fn get_by_state(records: &[MessageRecord], state: MessageState) -> Vec<&MessageRecord> {
        records.iter().filter(|r| r.state == state).collect()
    }

    pub fn get_pending(records: &[MessageRecord]) -> Vec<&MessageRecord> {
        Self::get_by_state(records, MessageState::Pending)
    }

    pub fn get_sending(records: &[MessageRecord]) -> Vec<&MessageRecord> {
        Self::get_by_state(records, MessageState::Sending)
    }

    pub fn get_sent(records: &[MessageRecord]) -> Vec<&MessageRecord> {
        Self::get_by_state(records, MessageState::Sent)
    }

    pub fn get_failed(records: &[MessageRecord]) -> Vec<&MessageRecord> {
        Self::get_by_state(records, MessageState::Failed)
    }

    /// Drop every SENT record, keeping the rest in order
    pub fn remove_sent_messages(records: Vec<MessageRecord>) -> Vec<MessageRecord> {
        records.into_iter().filter(|r| !r.is_sent()).collect()
    }

    /// Count records per state. Every state is present in the map, zero if absent.
    pub fn count_by_state<'a, I>(records: I) -> HashMap<MessageState, usize>
    where
        I: IntoIterator<Item = &'a MessageRecord>,
    {
        let mut counts = HashMap::from([
            (MessageState::Pending, 0),
            (MessageState::Sending, 0),
            (MessageState::Sent, 0),
            (MessageState::Failed, 0),
        ]);
        for record in records {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records_in(states: &[MessageState]) -> Vec<MessageRecord> {
        states
            .iter()
            .enumerate()
            .map(|(i, state)| {
                let mut record = MessageRecord::new("user-1", "conn1", json!({ "seq": i }));
                record.state = *state;
                record
            })
            .collect()
    }

    #[test]
    fn test_filters_preserve_order() {
        use MessageState::*;
        let records = records_in(&[Pending, Sent, Pending, Failed, Sending, Pending]);

        let pending = MessageStateManager::get_pending(&records);
        let seqs: Vec<_> = pending.iter().map(|r| r.content["seq"].as_u64().unwrap()).collect();
        assert_eq!(seqs, vec![0, 2, 5]);

        assert_eq!(MessageStateManager::get_sending(&records).len(), 1);
        assert_eq!(MessageStateManager::get_sent(&records).len(), 1);
        assert_eq!(MessageStateManager::get_failed(&records).len(), 1);
    }

    #[test]
    fn test_remove_sent_messages() {
        use MessageState::*;
        let records = records_in(&[Sent, Pending, Sent, Failed]);

        let remaining = MessageStateManager::remove_sent_messages(records);
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| !r.is_sent()));
        assert_eq!(remaining[0].content["seq"], 1);
        assert_eq!(remaining[1].content["seq"], 3);
    }

    #[test]
    fn test_count_by_state() {
        use MessageState::*;
        let records = records_in(&[Pending, Pending, Failed]);

        let counts = MessageStateManager::count_by_state(&records);
        assert_eq!(counts[&Pending], 2);
        assert_eq!(counts[&Failed], 1);
        assert_eq!(counts[&Sending], 0);
        assert_eq!(counts[&Sent], 0);
    }

    #[test]
    fn test_count_by_state_empty() {
        let counts = MessageStateManager::count_by_state(&Vec::new());
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|c| *c == 0));
    }
}
