//! Skill hub: published skills/extensions, agent manifests, the change
//! event bus, and the sync protocol that diffs an agent's inventory
//! against the hub.

use std::path::Path;

use fleet_core::map_store::MapStore;
use fleet_core::types::{
    AgentManifest, ChangeAction, ChangeEvent, ChangeEventKind, ChangeEventKindWire, SkillItem, SyncAction, SyncPlanEntry, VersionedRef,
};
use fleet_core::{CoreError, CoreResult};

use crate::event_bus::EventBus;

const CHANGE_BUS_CAP: usize = 1000;

#[derive(Clone)]
pub struct SkillsStore {
    skills: MapStore<SkillItem>,
    extensions: MapStore<SkillItem>,
    manifests: MapStore<AgentManifest>,
    pub changes: EventBus<ChangeEvent>,
}

impl SkillsStore {
    pub async fn open(
        skills_path: impl AsRef<Path>,
        extensions_path: impl AsRef<Path>,
        manifests_path: impl AsRef<Path>,
    ) -> CoreResult<Self> {
        Ok(Self {
            skills: MapStore::open(skills_path.as_ref().to_owned()).await?,
            extensions: MapStore::open(extensions_path.as_ref().to_owned()).await?,
            manifests: MapStore::open(manifests_path.as_ref().to_owned()).await?,
            changes: EventBus::new(CHANGE_BUS_CAP),
        })
    }

    fn store_for(&self, kind: ChangeEventKind) -> &MapStore<SkillItem> {
        match kind {
            ChangeEventKind::Skill => &self.skills,
            ChangeEventKind::Extension => &self.extensions,
        }
    }

    /// Republishing an existing name increments its version; a brand-new
    /// name starts at version 1.
    pub async fn publish(&self, kind: ChangeEventKind, name: &str, description: &str, content: &str, published_by: &str) -> CoreResult<SkillItem> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::validation("name must not be empty"));
        }
        let store = self.store_for(kind);
        let item = store
            .mutate(|m| match m.values_mut().find(|i| i.name == name) {
                Some(existing) => {
                    existing.version += 1;
                    existing.description = description.to_string();
                    existing.content = content.to_string();
                    existing.updated_at = fleet_core::ids::now_iso();
                    existing.clone()
                }
                None => {
                    let item = SkillItem::new(name, description, content, published_by);
                    m.insert(item.id.clone(), item.clone());
                    item
                }
            })
            .await;

        let action = if item.version == 1 { ChangeAction::Publish } else { ChangeAction::Update };
        self.changes.publish(ChangeEvent::new(kind, &item.name, item.version, action));
        Ok(item)
    }

    pub async fn list(&self, kind: ChangeEventKind) -> Vec<SkillItem> {
        let mut items = self.store_for(kind).with_map(|m| m.values().cloned().collect::<Vec<_>>()).await;
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    pub async fn set_enabled(&self, kind: ChangeEventKind, id: &str, enabled: bool) -> CoreResult<SkillItem> {
        let store = self.store_for(kind);
        let item = store
            .mutate(|m| match m.get_mut(id) {
                Some(item) => {
                    item.enabled = enabled;
                    item.updated_at = fleet_core::ids::now_iso();
                    Ok(item.clone())
                }
                None => Err(CoreError::not_found(format!("{id} not found"))),
            })
            .await?;
        let action = if enabled { ChangeAction::Enable } else { ChangeAction::Disable };
        self.changes.publish(ChangeEvent::new(kind, &item.name, item.version, action));
        Ok(item)
    }

    pub async fn manifest(&self, agent_id: &str) -> Option<AgentManifest> {
        self.manifests.get(agent_id).await
    }

    /// Diff the agent's reported inventory against the hub and emit an
    /// install/update/remove plan; records the submitted manifest with
    /// `lastSync = now` as a side effect.
    pub async fn sync(&self, agent_id: &str, vm_id: Option<&str>, skills: Vec<VersionedRef>, extensions: Vec<VersionedRef>) -> CoreResult<Vec<SyncPlanEntry>> {
        let mut plan = Vec::new();
        plan.extend(self.diff_one(ChangeEventKind::Skill, &skills).await);
        plan.extend(self.diff_one(ChangeEventKind::Extension, &extensions).await);

        let manifest = AgentManifest {
            agent_id: agent_id.to_string(),
            vm_id: vm_id.map(|s| s.to_string()),
            skills,
            extensions,
            last_sync: fleet_core::ids::now_iso(),
        };
        self.manifests.mutate(|m| m.insert(agent_id.to_string(), manifest)).await;

        Ok(plan)
    }

    async fn diff_one(&self, kind: ChangeEventKind, agent_items: &[VersionedRef]) -> Vec<SyncPlanEntry> {
        let hub_items = self.store_for(kind).with_map(|m| m.values().filter(|i| i.enabled).cloned().collect::<Vec<_>>()).await;
        let wire_kind = match kind {
            ChangeEventKind::Skill => ChangeEventKindWire::Skill,
            ChangeEventKind::Extension => ChangeEventKindWire::Extension,
        };

        let mut plan = Vec::new();
        for hub_item in &hub_items {
            match agent_items.iter().find(|a| a.name == hub_item.name) {
                None => plan.push(SyncPlanEntry {
                    kind: wire_kind,
                    name: hub_item.name.clone(),
                    version: hub_item.version,
                    action: SyncAction::Install,
                }),
                Some(agent_item) if agent_item.version < hub_item.version => plan.push(SyncPlanEntry {
                    kind: wire_kind,
                    name: hub_item.name.clone(),
                    version: hub_item.version,
                    action: SyncAction::Update,
                }),
                Some(_) => {}
            }
        }
        for agent_item in agent_items {
            let present_and_enabled = hub_items.iter().any(|h| h.name == agent_item.name);
            if !present_and_enabled {
                plan.push(SyncPlanEntry {
                    kind: wire_kind,
                    name: agent_item.name.clone(),
                    version: agent_item.version,
                    action: SyncAction::Remove,
                });
            }
        }
        plan
    }

    pub async fn flush(&self) -> CoreResult<()> {
        self.skills.flush().await?;
        self.extensions.flush().await?;
        self.manifests.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, SkillsStore) {
        let dir = tempdir().unwrap();
        let store = SkillsStore::open(
            dir.path().join("skills.json"),
            dir.path().join("extensions.json"),
            dir.path().join("agent-manifests.json"),
        )
        .await
        .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn republish_increments_version() {
        let (_dir, store) = store().await;
        store.publish(ChangeEventKind::Skill, "git", "d1", "c1", "ops").await.unwrap();
        let second = store.publish(ChangeEventKind::Skill, "git", "d2", "c2", "ops").await.unwrap();
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn sync_plan_installs_missing_and_updates_stale() {
        let (_dir, store) = store().await;
        store.publish(ChangeEventKind::Skill, "git", "d", "c", "ops").await.unwrap();
        store.publish(ChangeEventKind::Skill, "git", "d2", "c2", "ops").await.unwrap(); // v2
        store.publish(ChangeEventKind::Skill, "lint", "d", "c", "ops").await.unwrap();

        let plan = store
            .sync("agent1", None, vec![VersionedRef { name: "git".into(), version: 1 }], vec![])
            .await
            .unwrap();

        assert!(plan.iter().any(|p| p.name == "git" && p.action == SyncAction::Update));
        assert!(plan.iter().any(|p| p.name == "lint" && p.action == SyncAction::Install));
    }

    #[tokio::test]
    async fn sync_plan_removes_items_absent_from_hub() {
        let (_dir, store) = store().await;
        let plan = store
            .sync("agent1", None, vec![VersionedRef { name: "stale-skill".into(), version: 1 }], vec![])
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, SyncAction::Remove);
    }

    #[tokio::test]
    async fn sync_records_manifest_with_last_sync() {
        let (_dir, store) = store().await;
        store.sync("agent1", Some("vm1"), vec![], vec![]).await.unwrap();
        let manifest = store.manifest("agent1").await.unwrap();
        assert_eq!(manifest.vm_id.as_deref(), Some("vm1"));
        assert!(!manifest.last_sync.is_empty());
    }

    #[tokio::test]
    async fn publish_emits_change_event() {
        let (_dir, store) = store().await;
        let sub = store.changes.subscribe(|_| true, None);
        store.publish(ChangeEventKind::Skill, "git", "d", "c", "ops").await.unwrap();
        let event = sub.stream.recv().unwrap();
        assert_eq!(event.action, ChangeAction::Publish);
    }
}
