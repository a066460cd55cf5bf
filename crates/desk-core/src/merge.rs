use crate::record::Record;
use std::collections::HashMap;

/// Merges the immutable seed slice with the durable local slice for one
/// partition. Local always wins on an id collision: the local copy is the
/// only one that can carry mutated state (read flags, status edits, appended
/// messages). Local-only records are appended after the seed block;
/// chat-originated ones newest-first, the rest in store order. The result
/// never contains two records with the same id.
pub fn merge_slices(seed: &[Record], local: &[Record]) -> Vec<Record> {
    let mut merged: Vec<Record> = Vec::with_capacity(seed.len() + local.len());
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for record in seed {
        if index_by_id.contains_key(&record.id) {
            continue;
        }
        index_by_id.insert(record.id.clone(), merged.len());
        merged.push(record.clone());
    }

    let mut local_only: Vec<Record> = Vec::new();
    for record in local {
        match index_by_id.get(&record.id) {
            Some(&slot) => {
                merged[slot] = record.clone();
            }
            None => {
                if local_only.iter().any(|seen| seen.id == record.id) {
                    continue;
                }
                local_only.push(record.clone());
            }
        }
    }

    let (mut chat, mut rest): (Vec<Record>, Vec<Record>) = local_only
        .into_iter()
        .partition(|record| record.is_chat_originated());
    chat.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    merged.append(&mut rest);
    merged.extend(chat);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Message, Priority, RecordKind, RecordStatus, Sender};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    fn record(id: &str, minute: u32) -> Record {
        Record {
            id: id.to_string(),
            partition_key: "support".to_string(),
            kind: RecordKind::Email,
            subject: format!("subject {id}"),
            preview: String::new(),
            thread: Vec::new(),
            status: RecordStatus::New,
            priority: None,
            is_read: Some(false),
            tags: Vec::new(),
            assigned_to: None,
            origin_instance: None,
            created_at: ts(minute),
            updated_at: ts(minute),
            extra: HashMap::new(),
        }
    }

    fn chat_record(id: &str, minute: u32) -> Record {
        let mut record = record(id, minute);
        record.kind = RecordKind::Ticket;
        record.priority = Some(Priority::Low);
        record.thread.push(Message {
            id: format!("{id}-m1"),
            from: Sender {
                name: "Guest".to_string(),
                email: String::new(),
                support: false,
            },
            content: "hello".to_string(),
            created_at: ts(minute),
        });
        record
    }

    #[test]
    fn empty_local_is_seed_only() {
        let seed = vec![record("a", 0), record("b", 1)];
        let merged = merge_slices(&seed, &[]);
        assert_eq!(merged, seed);
    }

    #[test]
    fn local_wins_on_shared_id() {
        let seed = vec![record("a", 0)];
        let mut edited = record("a", 0);
        edited.is_read = Some(true);
        let merged = merge_slices(&seed, &[edited.clone()]);
        assert_eq!(merged, vec![edited]);
    }

    #[test]
    fn local_only_records_are_appended_after_seed() {
        let seed = vec![record("a", 0)];
        let local = vec![record("b", 5)];
        let merged = merge_slices(&seed, &local);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn no_duplicate_ids_for_any_input() {
        let seed = vec![record("a", 0), record("a", 1), record("b", 2)];
        let local = vec![record("b", 3), record("c", 4), record("c", 5)];
        let merged = merge_slices(&seed, &local);
        let mut ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(total, 3);
    }

    #[test]
    fn seed_order_is_preserved_under_overlay() {
        let seed = vec![record("a", 0), record("b", 1), record("c", 2)];
        let mut edited = record("b", 1);
        edited.status = RecordStatus::Replied;
        let merged = merge_slices(&seed, &[edited]);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[1].status, RecordStatus::Replied);
    }

    #[test]
    fn chat_originated_local_only_sorts_newest_first() {
        let seed = vec![record("a", 0)];
        let local = vec![
            chat_record("old-chat", 1),
            record("plain", 2),
            chat_record("new-chat", 9),
        ];
        let merged = merge_slices(&seed, &local);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "plain", "new-chat", "old-chat"]);
    }
}
