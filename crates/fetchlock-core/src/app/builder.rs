//! Engine wiring.
//!
//! `EngineBuilder` assembles one engine from its ports; `EngineRegistryBuilder`
//! collects engines and checks at build time that the default engine exists.
//! Misconfiguration surfaces as `BuildError` at startup rather than as a
//! failing request later.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::app::auth::{Authentication, Credentials, authenticate};
use crate::app::handler::{FetchAndLockHandler, TimeoutBounds};
use crate::app::service::ExternalTaskService;
use crate::app::suspension::SuspensionManager;
use crate::config::FetchLockConfig;
use crate::domain::AuthError;
use crate::impls::{InMemoryIdentityService, InMemoryTaskStore};
use crate::ports::{Clock, IdGenerator, IdentityService, SystemClock, TaskStore, UlidGenerator};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("engine name must not be empty")]
    EmptyName,

    #[error("engine '{0}' has no identity service")]
    MissingIdentity(String),

    #[error("engine '{engine}': min timeout {min_ms} ms must be positive and not exceed max timeout {max_ms} ms")]
    InvalidTimeoutBounds {
        engine: String,
        min_ms: i64,
        max_ms: i64,
    },

    #[error("engine '{0}' is registered twice")]
    DuplicateEngine(String),

    #[error("default engine '{0}' is not registered")]
    MissingDefaultEngine(String),
}

/// One process engine: its store, identity service, fetch handler and
/// lifecycle service.
pub struct Engine {
    name: String,
    store: Arc<dyn TaskStore>,
    identity: Arc<dyn IdentityService>,
    suspension: Arc<SuspensionManager>,
    handler: FetchAndLockHandler,
    service: ExternalTaskService,
}

impl Engine {
    pub fn builder(name: impl Into<String>) -> EngineBuilder {
        EngineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &FetchAndLockHandler {
        &self.handler
    }

    pub fn service(&self) -> &ExternalTaskService {
        &self.service
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn suspension(&self) -> &Arc<SuspensionManager> {
        &self.suspension
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Authentication, AuthError> {
        authenticate(self.identity.as_ref(), credentials).await
    }
}

pub struct EngineBuilder {
    name: String,
    store: Option<Arc<dyn TaskStore>>,
    identity: Option<Arc<dyn IdentityService>>,
    clock: Option<Arc<dyn Clock>>,
    bounds: TimeoutBounds,
}

impl EngineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: None,
            identity: None,
            clock: None,
            bounds: TimeoutBounds::default(),
        }
    }

    /// Defaults to a fresh `InMemoryTaskStore`.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn timeout_bounds(mut self, bounds: TimeoutBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        if self.name.trim().is_empty() {
            return Err(BuildError::EmptyName);
        }
        let Some(identity) = self.identity else {
            return Err(BuildError::MissingIdentity(self.name));
        };
        if self.bounds.min_ms <= 0 || self.bounds.min_ms > self.bounds.max_ms {
            return Err(BuildError::InvalidTimeoutBounds {
                engine: self.name,
                min_ms: self.bounds.min_ms,
                max_ms: self.bounds.max_ms,
            });
        }

        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryTaskStore::new()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let suspension = Arc::new(SuspensionManager::new());

        let handler = FetchAndLockHandler::new(
            self.name.clone(),
            Arc::clone(&store),
            Arc::clone(&suspension),
            Arc::clone(&clock),
            Arc::clone(&ids),
            self.bounds,
        );
        let service = ExternalTaskService::new(Arc::clone(&store), Arc::clone(&suspension), clock, ids);

        Ok(Engine {
            name: self.name,
            store,
            identity,
            suspension,
            handler,
            service,
        })
    }
}

/// Engines by name plus the one served without a name.
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<Engine>>,
    default_engine: Arc<Engine>,
}

impl EngineRegistry {
    pub fn builder() -> EngineRegistryBuilder {
        EngineRegistryBuilder::default()
    }

    /// Builds in-memory engines for every configured name, sharing one
    /// identity service seeded with the configured users.
    pub fn from_config(config: &FetchLockConfig) -> Result<Self, BuildError> {
        let identity: Arc<dyn IdentityService> =
            Arc::new(InMemoryIdentityService::new(config.users.iter().cloned()));

        let mut builder = Self::builder();
        if let Some(name) = &config.default_engine {
            builder = builder.default_engine(name);
        }
        for name in &config.engines {
            let engine = Engine::builder(name)
                .identity(Arc::clone(&identity))
                .timeout_bounds(config.timeout_bounds())
                .build()?;
            builder = builder.register(engine)?;
        }
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Engine>> {
        self.engines.get(name).cloned()
    }

    pub fn default_engine(&self) -> Arc<Engine> {
        Arc::clone(&self.default_engine)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }
}

#[derive(Default)]
pub struct EngineRegistryBuilder {
    engines: BTreeMap<String, Arc<Engine>>,
    default_engine: Option<String>,
}

impl EngineRegistryBuilder {
    pub fn register(mut self, engine: Engine) -> Result<Self, BuildError> {
        if self.engines.contains_key(engine.name()) {
            return Err(BuildError::DuplicateEngine(engine.name().to_string()));
        }
        self.engines.insert(engine.name().to_string(), Arc::new(engine));
        Ok(self)
    }

    /// Without this, the only registered engine becomes the default.
    pub fn default_engine(mut self, name: impl Into<String>) -> Self {
        self.default_engine = Some(name.into());
        self
    }

    pub fn build(self) -> Result<EngineRegistry, BuildError> {
        let name = match self.default_engine {
            Some(name) => name,
            None if self.engines.len() == 1 => self.engines.keys().next().cloned().unwrap_or_default(),
            None => crate::config::DEFAULT_ENGINE.to_string(),
        };
        let Some(default_engine) = self.engines.get(&name).cloned() else {
            return Err(BuildError::MissingDefaultEngine(name));
        };
        Ok(EngineRegistry {
            engines: self.engines,
            default_engine,
        })
    }
}
