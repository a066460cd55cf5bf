use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A synchronizable record: an email thread or a support ticket. Both kinds
/// share one shape; `priority` is only meaningful for tickets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub partition_key: String,
    pub kind: RecordKind,
    pub subject: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub thread: Vec<Message>,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// `None` models legacy payloads that never carried the flag; the unread
    /// fold applies a status-based fallback for those (tickets only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Assignee>,
    /// Instance that created this record at runtime; absent for seed records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_instance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub support: bool,
}

/// Weak reference to an assignee; the referenced person may disappear
/// without invalidating the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Assignee {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Email,
    Ticket,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Email => "email",
            RecordKind::Ticket => "ticket",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "email" => Ok(RecordKind::Email),
            "ticket" => Ok(RecordKind::Ticket),
            other => Err(format!("Unknown record kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    New,
    Replied,
    Pending,
    Open,
    InProgress,
    Resolved,
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::New
    }
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::New => "new",
            RecordStatus::Replied => "replied",
            RecordStatus::Pending => "pending",
            RecordStatus::Open => "open",
            RecordStatus::InProgress => "in-progress",
            RecordStatus::Resolved => "resolved",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, RecordStatus::Resolved)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "new" => Ok(RecordStatus::New),
            "replied" => Ok(RecordStatus::Replied),
            "pending" => Ok(RecordStatus::Pending),
            "open" => Ok(RecordStatus::Open),
            "in-progress" | "in_progress" | "inprogress" => Ok(RecordStatus::InProgress),
            "resolved" => Ok(RecordStatus::Resolved),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Low
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("Unknown priority: {other}")),
        }
    }
}

impl Message {
    pub fn new(from: Sender, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            from,
            content: content.into(),
            created_at: now,
        }
    }
}

impl Record {
    /// Creates a runtime ticket. The caller supplies the priority from the
    /// triage classifier; it is assigned exactly once here.
    pub fn new_ticket(
        partition_key: impl Into<String>,
        subject: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        author: Sender,
        origin_instance: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let subject = subject.into();
        let description = description.into();
        let opening = Message::new(author, description.clone(), now);
        Self {
            id: format!("tic-{}", uuid::Uuid::new_v4()),
            partition_key: partition_key.into(),
            kind: RecordKind::Ticket,
            preview: preview_of(&description),
            subject,
            thread: vec![opening],
            status: RecordStatus::Open,
            priority: Some(priority),
            is_read: Some(false),
            tags: Vec::new(),
            assigned_to: None,
            origin_instance: Some(origin_instance.into()),
            created_at: now,
            updated_at: now,
            extra: HashMap::new(),
        }
    }

    /// Unread test used for badge counts. Records carrying an explicit flag
    /// use it verbatim. A ticket without the flag counts unread unless its
    /// status is resolved; an email without the flag counts unread. The
    /// ticket fallback is a legacy-compatibility rule and must not change.
    pub fn is_unread(&self) -> bool {
        match self.is_read {
            Some(read) => !read,
            None => match self.kind {
                RecordKind::Ticket => !self.status.is_resolved(),
                RecordKind::Email => true,
            },
        }
    }

    /// Whether the record's thread was opened by a non-support sender.
    /// Chat-originated records sort newest-first among local-only appends.
    pub fn is_chat_originated(&self) -> bool {
        self.thread
            .first()
            .map(|message| !message.from.support)
            .unwrap_or(false)
    }

    /// Appends a message and advances `updated_at`. Messages are immutable
    /// once appended; the thread only ever grows.
    pub fn append_message(&mut self, message: Message) {
        let ts = message.created_at;
        self.thread.push(message);
        self.touch(ts);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

fn preview_of(description: &str) -> String {
    const PREVIEW_MAX_CHARS: usize = 120;
    let flat = description.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_MAX_CHARS {
        return flat;
    }
    let mut preview: String = flat.chars().take(PREVIEW_MAX_CHARS).collect();
    preview.push('…');
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn ticket(status: RecordStatus, is_read: Option<bool>) -> Record {
        Record {
            id: "tic-1".to_string(),
            partition_key: "client:acme".to_string(),
            kind: RecordKind::Ticket,
            subject: "Billing question".to_string(),
            preview: String::new(),
            thread: Vec::new(),
            status,
            priority: Some(Priority::Low),
            is_read,
            tags: Vec::new(),
            assigned_to: None,
            origin_instance: None,
            created_at: ts(),
            updated_at: ts(),
            extra: HashMap::new(),
        }
    }

    #[test]
    fn explicit_flag_wins_over_status() {
        assert!(!ticket(RecordStatus::Open, Some(true)).is_unread());
        assert!(ticket(RecordStatus::Resolved, Some(false)).is_unread());
    }

    #[test]
    fn legacy_ticket_falls_back_to_status() {
        assert!(!ticket(RecordStatus::Resolved, None).is_unread());
        assert!(ticket(RecordStatus::Open, None).is_unread());
        assert!(ticket(RecordStatus::InProgress, None).is_unread());
    }

    #[test]
    fn legacy_email_counts_unread() {
        let mut email = ticket(RecordStatus::Replied, None);
        email.kind = RecordKind::Email;
        assert!(email.is_unread());
    }

    #[test]
    fn append_message_grows_thread_and_advances_updated_at() {
        let mut record = ticket(RecordStatus::Open, Some(false));
        let before = record.updated_at;
        record.append_message(Message {
            id: "msg-1".to_string(),
            from: Sender {
                name: "Dana".to_string(),
                email: "dana@acme.test".to_string(),
                support: false,
            },
            content: "any update?".to_string(),
            created_at: ts(),
        });
        assert_eq!(record.thread.len(), 1);
        assert!(record.updated_at >= before);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            RecordStatus::New,
            RecordStatus::Replied,
            RecordStatus::Pending,
            RecordStatus::Open,
            RecordStatus::InProgress,
            RecordStatus::Resolved,
        ] {
            assert_eq!(status.as_str().parse::<RecordStatus>(), Ok(status));
        }
        assert_eq!("in_progress".parse(), Ok(RecordStatus::InProgress));
    }

    #[test]
    fn new_ticket_starts_unread_with_one_message() {
        let ticket = Record::new_ticket(
            "client:acme",
            "Falha no export",
            "o export de CSV   falha toda vez",
            Priority::Medium,
            Sender {
                name: "Dana".to_string(),
                email: "dana@acme.test".to_string(),
                support: false,
            },
            "inst-1",
            ts(),
        );
        assert_eq!(ticket.kind, RecordKind::Ticket);
        assert_eq!(ticket.status, RecordStatus::Open);
        assert_eq!(ticket.is_read, Some(false));
        assert_eq!(ticket.thread.len(), 1);
        assert_eq!(ticket.preview, "o export de CSV falha toda vez");
        assert_eq!(ticket.origin_instance.as_deref(), Some("inst-1"));
        assert!(ticket.is_chat_originated());
    }

    #[test]
    fn record_json_uses_camel_case_and_omits_absent_flag() {
        let record = ticket(RecordStatus::Open, None);
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json.get("partitionKey").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("isRead").is_none());

        let explicit = ticket(RecordStatus::Open, Some(false));
        let json = serde_json::to_value(&explicit).expect("serialize");
        assert_eq!(json.get("isRead"), Some(&Value::Bool(false)));
    }
}
