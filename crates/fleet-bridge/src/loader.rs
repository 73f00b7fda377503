//! Service loader: turns a set of named, interdependent feature bundles
//! into one mounted router, running each bundle's `init` hook in
//! dependency order once every router is attached.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use fleet_harness::auth::AuthLayer;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

type InitHook = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct Bundle {
    pub name: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub path: String,
    pub router: Router,
    /// Whether the mounted router sits behind the auth middleware. Defaults
    /// to `true` — a bundle must opt out explicitly.
    pub auth: bool,
    pub ui: Option<serde_json::Value>,
    pub init: Option<InitHook>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, description: impl Into<String>, path: impl Into<String>, router: Router) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            dependencies: Vec::new(),
            path: path.into(),
            router,
            auth: true,
            ui: None,
            init: None,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.auth = false;
        self
    }

    pub fn with_ui(mut self, ui: serde_json::Value) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.init = Some(Box::new(move || Box::pin(hook())));
        self
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("dependency cycle detected involving `{0}`")]
    Cycle(String),
}

#[derive(Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct UiManifest {
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Default)]
pub struct ServiceLoader {
    bundles: Vec<Bundle>,
    names: HashSet<String>,
}

impl ServiceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects a duplicate name by logging a warning and dropping the new
    /// bundle; registration order otherwise does not matter — `mount`
    /// resolves the actual order from `dependencies`.
    pub fn register(&mut self, bundle: Bundle) {
        if !self.names.insert(bundle.name.clone()) {
            warn!(name = %bundle.name, "duplicate service bundle registration, skipping");
            return;
        }
        self.bundles.push(bundle);
    }

    pub fn ui_manifest(&self) -> UiManifest {
        UiManifest {
            services: self
                .bundles
                .iter()
                .map(|b| ServiceDescriptor {
                    name: b.name.clone(),
                    description: b.description.clone(),
                    ui: b.ui.clone(),
                })
                .collect(),
        }
    }

    /// Topologically sorts by `dependencies` (a missing dependency is
    /// warned, not fatal), mounts each router under its auth policy, then
    /// runs every `init` hook in the same order, awaiting each in turn.
    pub async fn mount(mut self, auth: Arc<AuthLayerFactory>) -> Result<Router, LoaderError> {
        let order = topological_order(&self.bundles)?;

        let mut by_name: HashMap<String, Bundle> = self.bundles.drain(..).map(|b| (b.name.clone(), b)).collect();
        let mut router = Router::new();
        let mut init_hooks = Vec::new();

        for name in &order {
            let Some(bundle) = by_name.remove(name) else { continue };
            let mounted = if bundle.auth {
                bundle.router.layer(auth.make())
            } else {
                bundle.router
            };
            router = router.nest(&bundle.path, mounted);
            if let Some(init) = bundle.init {
                init_hooks.push(init);
            }
        }

        for hook in init_hooks {
            hook().await;
        }

        Ok(router)
    }
}

/// Mounting needs a fresh `AuthLayer` per bundle (each layers a distinct
/// inner router), so the loader takes a factory rather than one instance.
pub struct AuthLayerFactory {
    auth_token: Option<String>,
    api_keys: Option<Arc<fleet_harness::api_keys::ApiKeyStore>>,
}

impl AuthLayerFactory {
    pub fn new(auth_token: Option<String>, api_keys: Option<Arc<fleet_harness::api_keys::ApiKeyStore>>) -> Self {
        Self { auth_token, api_keys }
    }

    fn make(&self) -> AuthLayer {
        AuthLayer::new(self.auth_token.clone(), self.api_keys.clone())
    }
}

fn topological_order(bundles: &[Bundle]) -> Result<Vec<String>, LoaderError> {
    let known: HashSet<&str> = bundles.iter().map(|b| b.name.as_str()).collect();
    let mut order = Vec::with_capacity(bundles.len());
    let mut visited: HashMap<&str, VisitState> = HashMap::new();

    for bundle in bundles {
        visit(bundle.name.as_str(), bundles, &known, &mut visited, &mut order)?;
    }

    Ok(order)
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    InProgress,
    Done,
}

fn visit<'a>(
    name: &'a str,
    bundles: &'a [Bundle],
    known: &HashSet<&str>,
    visited: &mut HashMap<&'a str, VisitState>,
    order: &mut Vec<String>,
) -> Result<(), LoaderError> {
    match visited.get(name) {
        Some(VisitState::Done) => return Ok(()),
        Some(VisitState::InProgress) => return Err(LoaderError::Cycle(name.to_string())),
        None => {}
    }

    visited.insert(name, VisitState::InProgress);
    let bundle = bundles.iter().find(|b| b.name == name).expect("name originates from bundles");
    for dep in &bundle.dependencies {
        if !known.contains(dep.as_str()) {
            warn!(service = %name, dependency = %dep, "missing service dependency, mounting anyway");
            continue;
        }
        visit(dep.as_str(), bundles, known, visited, order)?;
    }

    visited.insert(name, VisitState::Done);
    order.push(name.to_string());
    Ok(())
}
