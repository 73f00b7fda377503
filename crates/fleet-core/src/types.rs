//! Data model entities shared across feature stores. Field names match the
//! wire format each feature exposes: most entities serialize as camelCase
//! JSON (the dashboard's native shape); the API-key and usage-analytics
//! entities mirror their SQL column names instead, since those stores are
//! backed by an embedded relational engine rather than a JSON document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids;
use crate::log_store::LogRecord;

// ---------------------------------------------------------------------------
// Board: Task, Note, Artifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    InReview,
    Blocked,
    Done,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    Finding,
    Blocker,
    Question,
    Update,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Branch,
    Report,
    Deploy,
    Diff,
    File,
    Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub author: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: NoteType,
    pub created_at: String,
}

impl Note {
    pub fn new(author: impl Into<String>, content: impl Into<String>, kind: NoteType) -> Self {
        Self {
            id: ids::new_id(),
            author: author.into(),
            content: content.into(),
            kind,
            created_at: ids::now_iso(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub url: String,
    pub label: String,
    pub added_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl Task {
    pub fn new(title: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = ids::now_iso();
        Self {
            id: ids::new_id(),
            title: title.into(),
            description: None,
            status: TaskStatus::Open,
            assignee: None,
            tags: Vec::new(),
            dependencies: Vec::new(),
            created_by: created_by.into(),
            created_at: now.clone(),
            updated_at: now,
            score: 0.0,
            notes: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = ids::now_iso();
    }

    /// Score only ever moves up; a `bump` with a non-positive delta is a
    /// no-op rather than an error, preserving monotonicity.
    pub fn bump_score(&mut self, delta: f64) {
        if delta > 0.0 {
            self.score += delta;
        }
        self.touch();
    }
}

// ---------------------------------------------------------------------------
// Reports and share links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub title: String,
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Report {
    pub fn new(title: impl Into<String>, author: impl Into<String>, content: impl Into<String>) -> Self {
        let now = ids::now_iso();
        Self {
            id: ids::new_id(),
            title: title.into(),
            author: author.into(),
            content: content.into(),
            tags: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub link_id: String,
    pub report_id: String,
    pub created_by: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ShareLink {
    pub fn new(report_id: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            link_id: ids::new_id(),
            report_id: report_id.into(),
            created_by: created_by.into(),
            created_at: ids::now_iso(),
            expires_at: None,
            revoked: false,
            label: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        if self.revoked {
            return false;
        }
        match &self.expires_at {
            Some(exp) => chrono::DateTime::parse_from_rfc3339(exp)
                .map(|t| t > chrono::Utc::now())
                .unwrap_or(false),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    #[serde(default)]
    pub id: String,
    pub link_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl LogRecord for AccessEntry {
    fn id(&self) -> &str {
        &self.id
    }
    fn ensure_id_and_timestamp(&mut self) {
        crate::log_store::new_id_if_empty(&mut self.id);
        crate::log_store::now_if_empty(&mut self.timestamp);
    }
}

// ---------------------------------------------------------------------------
// Registered VMs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VmRole {
    Infra,
    Lieutenant,
    Worker,
    Golden,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredVm {
    pub id: String,
    pub name: String,
    pub role: VmRole,
    pub status: VmStatus,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub registered_by: String,
    pub registered_at: String,
    pub last_seen: String,
}

impl RegisteredVm {
    pub fn new(name: impl Into<String>, role: VmRole, address: impl Into<String>, registered_by: impl Into<String>) -> Self {
        let now = ids::now_iso();
        Self {
            id: ids::new_id(),
            name: name.into(),
            role,
            status: VmStatus::Running,
            address: address.into(),
            services: None,
            metadata: None,
            registered_by: registered_by.into(),
            registered_at: now.clone(),
            last_seen: now,
        }
    }

    pub fn is_stale(&self, threshold: chrono::Duration) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&self.last_seen) {
            Ok(last_seen) => chrono::Utc::now().signed_duration_since(last_seen) > threshold,
            Err(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// API keys (public fields only — the hash never lives in this type)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicApiKey {
    pub id: String,
    pub name: String,
    pub key_prefix: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Commits (VM snapshot ledger)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEntry {
    #[serde(default)]
    pub id: String,
    pub commit_id: String,
    pub vm_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl LogRecord for CommitEntry {
    fn id(&self) -> &str {
        &self.id
    }
    fn ensure_id_and_timestamp(&mut self) {
        crate::log_store::new_id_if_empty(&mut self.id);
        crate::log_store::now_if_empty(&mut self.timestamp);
    }
}

// ---------------------------------------------------------------------------
// Skills / Extensions and the agent manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillItem {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub description: String,
    pub content: String,
    pub published_by: String,
    pub published_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl SkillItem {
    pub fn new(name: impl Into<String>, description: impl Into<String>, content: impl Into<String>, published_by: impl Into<String>) -> Self {
        let now = ids::now_iso();
        Self {
            id: ids::new_id(),
            name: name.into(),
            version: 1,
            description: description.into(),
            content: content.into(),
            published_by: published_by.into(),
            published_at: now.clone(),
            updated_at: now,
            tags: Vec::new(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRef {
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    #[serde(default)]
    pub skills: Vec<VersionedRef>,
    #[serde(default)]
    pub extensions: Vec<VersionedRef>,
    pub last_sync: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventKind {
    Skill,
    Extension,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Publish,
    Update,
    Remove,
    Enable,
    Disable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChangeEventKind,
    pub name: String,
    pub version: u32,
    pub action: ChangeAction,
    #[serde(default)]
    pub timestamp: String,
}

impl ChangeEvent {
    pub fn new(kind: ChangeEventKind, name: impl Into<String>, version: u32, action: ChangeAction) -> Self {
        Self {
            id: ids::new_id(),
            kind,
            name: name.into(),
            version,
            action,
            timestamp: ids::now_iso(),
        }
    }
}

/// Install/update/remove plan entry emitted by the sync protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlanEntry {
    #[serde(rename = "type")]
    pub kind: ChangeEventKindWire,
    pub name: String,
    pub version: u32,
    pub action: SyncAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventKindWire {
    Skill,
    Extension,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Install,
    Update,
    Remove,
}

// ---------------------------------------------------------------------------
// Feed events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    #[serde(default)]
    pub id: String,
    pub agent: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: String,
}

impl LogRecord for FeedEvent {
    fn id(&self) -> &str {
        &self.id
    }
    fn ensure_id_and_timestamp(&mut self) {
        crate::log_store::new_id_if_empty(&mut self.id);
        crate::log_store::now_if_empty(&mut self.timestamp);
    }
}

// ---------------------------------------------------------------------------
// Journal / log entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl TextEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            timestamp: String::new(),
            text: text.into(),
            author: None,
            agent: None,
            mood: None,
            tags: None,
        }
    }
}

impl LogRecord for TextEntry {
    fn id(&self) -> &str {
        &self.id
    }
    fn ensure_id_and_timestamp(&mut self) {
        crate::log_store::new_id_if_empty(&mut self.id);
        crate::log_store::now_if_empty(&mut self.timestamp);
    }
}

// ---------------------------------------------------------------------------
// Config entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryType {
    Config,
    Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: ConfigEntryType,
    pub updated_at: String,
}

impl ConfigEntry {
    /// First six characters followed by `***`, the masking rule applied
    /// to every secret-typed entry on ordinary reads.
    pub fn masked_value(&self) -> String {
        match self.kind {
            ConfigEntryType::Config => self.value.clone(),
            ConfigEntryType::Secret => {
                let visible: String = self.value.chars().take(6).collect();
                format!("{visible}***")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Usage analytics: sessions and VM accounting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    #[serde(default)]
    pub input: i64,
    #[serde(default)]
    pub output: i64,
    #[serde(default)]
    pub cache_read: i64,
    #[serde(default)]
    pub cache_write: i64,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostCounts {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub session_id: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent: Option<String>,
    pub model: String,
    #[serde(default)]
    pub tokens: TokenCounts,
    #[serde(default)]
    pub cost: CostCounts,
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub tool_calls: HashMap<String, i64>,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmAccountingRecord {
    pub id: String,
    pub vm_id: String,
    pub role: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroyed_at: Option<String>,
    pub recorded_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_new_sets_equal_created_and_updated() {
        let task = Task::new("fix bug", "alice");
        assert_eq!(task.created_at, task.updated_at);
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.score, 0.0);
    }

    #[test]
    fn bump_score_is_monotonic() {
        let mut task = Task::new("t", "a");
        task.bump_score(5.0);
        task.bump_score(-100.0);
        assert_eq!(task.score, 5.0);
    }

    #[test]
    fn share_link_valid_without_expiry() {
        let link = ShareLink::new("r1", "alice");
        assert!(link.is_valid());
    }

    #[test]
    fn share_link_invalid_when_revoked() {
        let mut link = ShareLink::new("r1", "alice");
        link.revoked = true;
        assert!(!link.is_valid());
    }

    #[test]
    fn config_entry_masks_secret_value() {
        let entry = ConfigEntry {
            key: "api_key".into(),
            value: "sk_abcdefghijklmnop".into(),
            kind: ConfigEntryType::Secret,
            updated_at: ids::now_iso(),
        };
        assert_eq!(entry.masked_value(), "sk_abc***");
    }

    #[test]
    fn config_entry_does_not_mask_plain_config() {
        let entry = ConfigEntry {
            key: "theme".into(),
            value: "dark".into(),
            kind: ConfigEntryType::Config,
            updated_at: ids::now_iso(),
        };
        assert_eq!(entry.masked_value(), "dark");
    }

    #[test]
    fn registered_vm_is_stale_past_threshold() {
        let mut vm = RegisteredVm::new("w1", VmRole::Worker, "10.0.0.1", "ops");
        vm.last_seen = (chrono::Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        assert!(vm.is_stale(chrono::Duration::minutes(5)));
    }

    #[test]
    fn registered_vm_fresh_heartbeat_not_stale() {
        let vm = RegisteredVm::new("w1", VmRole::Worker, "10.0.0.1", "ops");
        assert!(!vm.is_stale(chrono::Duration::minutes(5)));
    }
}
