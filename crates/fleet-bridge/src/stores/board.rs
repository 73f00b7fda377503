//! Board store: tasks, the review workflow, and the notes/artifacts each
//! task carries.

use std::path::Path;

use fleet_core::map_store::MapStore;
use fleet_core::types::{Artifact, Note, NoteType, Task, TaskStatus};
use fleet_core::{CoreError, CoreResult};

#[derive(Clone)]
pub struct BoardStore {
    tasks: MapStore<Task>,
}

impl BoardStore {
    pub async fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Ok(Self {
            tasks: MapStore::open(path.as_ref().to_owned()).await?,
        })
    }

    pub async fn create(&self, title: &str, created_by: &str) -> CoreResult<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CoreError::validation("title must not be empty"));
        }
        let task = Task::new(title, created_by);
        self.tasks
            .mutate(|m| {
                m.insert(task.id.clone(), task.clone());
            })
            .await;
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> CoreResult<Task> {
        self.tasks
            .get(id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("task {id} not found")))
    }

    pub async fn list(&self, status: Option<TaskStatus>, assignee: Option<&str>, tag: Option<&str>) -> Vec<Task> {
        let mut tasks = self
            .tasks
            .with_map(|m| {
                m.values()
                    .filter(|t| status.is_none_or(|s| t.status == s))
                    .filter(|t| assignee.is_none_or(|a| t.assignee.as_deref() == Some(a)))
                    .filter(|t| tag.is_none_or(|tg| t.tags.iter().any(|x| x == tg)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub async fn update(&self, id: &str, f: impl FnOnce(&mut Task)) -> CoreResult<Task> {
        self.tasks
            .mutate(|m| match m.get_mut(id) {
                Some(task) => {
                    f(task);
                    task.touch();
                    Ok(task.clone())
                }
                None => Err(CoreError::not_found(format!("task {id} not found"))),
            })
            .await
    }

    pub async fn bump_score(&self, id: &str, delta: f64) -> CoreResult<Task> {
        self.update(id, |t| t.bump_score(delta)).await
    }

    pub async fn add_note(&self, id: &str, author: &str, content: &str, kind: NoteType) -> CoreResult<Task> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::validation("note content must not be empty"));
        }
        self.update(id, |t| t.notes.push(Note::new(author, content, kind))).await
    }

    pub async fn add_artifact(&self, id: &str, artifact: Artifact) -> CoreResult<Task> {
        self.update(id, |t| t.artifacts.push(artifact)).await
    }

    /// Submit for review: atomically append the review note, append any
    /// supplied artifacts, and move the task to `in_review`. No partial
    /// state is observable — every field changes under one `mutate` call.
    pub async fn submit_for_review(
        &self,
        id: &str,
        summary: &str,
        reviewed_by: &str,
        artifacts: Vec<Artifact>,
    ) -> CoreResult<Task> {
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CoreError::validation("review summary must not be empty"));
        }
        self.update(id, |t| {
            t.status = TaskStatus::InReview;
            t.notes.push(Note::new(reviewed_by, summary, NoteType::Update));
            t.artifacts.extend(artifacts);
        })
        .await
    }

    pub async fn approve(&self, id: &str, approved_by: &str) -> CoreResult<Task> {
        self.update(id, |t| {
            t.status = TaskStatus::Done;
            t.notes.push(Note::new(approved_by, format!("Approved by {approved_by}"), NoteType::Update));
        })
        .await
    }

    pub async fn reject(&self, id: &str, rejected_by: &str, reason: &str) -> CoreResult<Task> {
        self.update(id, |t| {
            t.status = TaskStatus::Open;
            t.notes.push(Note::new(rejected_by, reason, NoteType::Update));
        })
        .await
    }

    pub async fn review_queue(&self) -> Vec<Task> {
        self.list(Some(TaskStatus::InReview), None, None).await
    }

    pub async fn flush(&self) -> CoreResult<()> {
        self.tasks.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let dir = tempdir().unwrap();
        let store = BoardStore::open(dir.path().join("board.json")).await.unwrap();
        assert!(store.create("   ", "alice").await.is_err());
    }

    #[tokio::test]
    async fn submit_review_approve_lifecycle() {
        let dir = tempdir().unwrap();
        let store = BoardStore::open(dir.path().join("board.json")).await.unwrap();
        let task = store.create("T", "a").await.unwrap();

        let reviewed = store
            .submit_for_review(
                &task.id,
                "done",
                "a",
                vec![Artifact {
                    kind: fleet_core::types::ArtifactType::Branch,
                    url: "u".into(),
                    label: "b".into(),
                    added_at: fleet_core::ids::now_iso(),
                    added_by: None,
                }],
            )
            .await
            .unwrap();
        assert_eq!(reviewed.status, TaskStatus::InReview);
        assert_eq!(reviewed.notes.last().unwrap().content, "done");
        assert_eq!(reviewed.artifacts.len(), 1);

        let approved = store.approve(&task.id, "r").await.unwrap();
        assert_eq!(approved.status, TaskStatus::Done);
        assert_eq!(approved.notes.last().unwrap().content, "Approved by r");
    }

    #[tokio::test]
    async fn bump_score_stays_monotonic_through_store() {
        let dir = tempdir().unwrap();
        let store = BoardStore::open(dir.path().join("board.json")).await.unwrap();
        let task = store.create("T", "a").await.unwrap();
        store.bump_score(&task.id, 10.0).await.unwrap();
        let bumped = store.bump_score(&task.id, -5.0).await.unwrap();
        assert_eq!(bumped.score, 10.0);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let dir = tempdir().unwrap();
        let store = BoardStore::open(dir.path().join("board.json")).await.unwrap();
        store.create("T1", "a").await.unwrap();
        let t2 = store.create("T2", "a").await.unwrap();
        store.submit_for_review(&t2.id, "x", "a", vec![]).await.unwrap();

        let open = store.list(Some(TaskStatus::Open), None, None).await;
        assert_eq!(open.len(), 1);
        assert_eq!(store.review_queue().await.len(), 1);
    }
}
