use super::registry::HookRegistry;
use super::{Hook, HookContext, HookPayload, HookStage, PayloadKind};
use crate::cache::{CacheStore, FileCacheStore, NoopCacheStore};
use crate::config::HooksConfig;
use crate::error::{Error, Result};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cumulative hook execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HookRunStats {
    /// Successful `process` calls
    pub executed: u64,
    pub cache_hits: u64,
    /// Failed, panicked, timed out or rejected for payload kind
    pub failed: u64,
    /// Store reads or writes that failed and were skipped
    pub cache_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    executed: AtomicU64,
    cache_hits: AtomicU64,
    failed: AtomicU64,
    cache_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HookRunStats {
        HookRunStats {
            executed: self.executed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
        }
    }
}

/// Result of one stage run, with the failures that were recovered from
#[derive(Debug)]
pub struct HookRun {
    pub payload: HookPayload,
    pub failures: Vec<Error>,
}

/// Registers hooks per stage and runs them with cache-backed memoization
pub struct HookManager {
    hooks: HashMap<HookStage, Vec<Arc<dyn Hook>>>,
    store: Arc<dyn CacheStore>,
    hook_timeout: Option<Duration>,
    counters: Counters,
}

impl HookManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            hooks: HashMap::new(),
            store,
            hook_timeout: None,
            counters: Counters::default(),
        }
    }

    /// Manager whose results are never persisted
    pub fn without_cache() -> Self {
        Self::new(Arc::new(NoopCacheStore))
    }

    /// Bound every `process` call; an elapsed timeout counts as a failure
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = Some(timeout);
        self
    }

    /// Build a manager from the `hooks` config section. Every descriptor must
    /// resolve through the registry; unknown types fail startup.
    pub fn from_config(
        config: &HooksConfig,
        registry: &HookRegistry,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self> {
        let mut manager = Self::new(store);
        if let Some(timeout) = config.hook_timeout() {
            manager = manager.with_hook_timeout(timeout);
        }

        if !config.enabled {
            info!("Hooks are disabled in config");
            return Ok(manager);
        }

        for stage in HookStage::ALL {
            for (position, descriptor) in config.descriptors(stage).iter().enumerate() {
                if descriptor.hook_type.is_none() {
                    return Err(Error::MissingHookType(format!("{}[{}]", stage, position)));
                }
                let hook = registry.create(descriptor)?;
                info!(
                    "Registered {} hook at {}: {}",
                    hook.name(),
                    stage,
                    descriptor.description
                );
                manager.register(stage, hook);
            }
        }

        Ok(manager)
    }

    /// Open the store named by `cache_directory`, or a no-op store
    pub fn open_store(config: &HooksConfig) -> Result<Arc<dyn CacheStore>> {
        match &config.cache_directory {
            Some(dir) => {
                info!("Hook cache directory: {}", dir.display());
                Ok(Arc::new(FileCacheStore::new(dir)?))
            }
            None => Ok(Arc::new(NoopCacheStore)),
        }
    }

    /// Append a hook to a stage. The same hook registered twice runs twice.
    pub fn register(&mut self, stage: HookStage, hook: Arc<dyn Hook>) {
        debug!("Registered hook {} at {}", hook.name(), stage);
        self.hooks.entry(stage).or_default().push(hook);
    }

    pub fn hook_names(&self, stage: HookStage) -> Vec<&str> {
        self.hooks
            .get(&stage)
            .map(|hooks| hooks.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> HookRunStats {
        self.counters.snapshot()
    }

    /// Run every hook at `stage` in registration order and return the final payload.
    /// With no hooks registered this returns `payload` untouched.
    pub async fn run(
        &self,
        stage: HookStage,
        payload: HookPayload,
        context: &HookContext,
    ) -> HookPayload {
        self.run_traced(stage, payload, context).await.payload
    }

    /// Like [`run`](Self::run), also returning the failures that were absorbed
    pub async fn run_traced(
        &self,
        stage: HookStage,
        payload: HookPayload,
        context: &HookContext,
    ) -> HookRun {
        let mut run = HookRun {
            payload,
            failures: Vec::new(),
        };
        let Some(hooks) = self.hooks.get(&stage) else {
            return run;
        };

        let context = context.at_stage(stage);
        for hook in hooks {
            match self.run_one(hook.as_ref(), &run.payload, &context).await {
                Ok(Some(next)) => run.payload = next,
                Ok(None) => {}
                Err(err) => {
                    Counters::bump(&self.counters.failed);
                    warn!(
                        "Hook {} failed for {} at {}: {}",
                        hook.name(),
                        context.item_identifier,
                        stage,
                        err
                    );
                    run.failures.push(err);
                }
            }
        }
        run
    }

    /// `Ok(None)` keeps the current payload
    async fn run_one(
        &self,
        hook: &dyn Hook,
        payload: &HookPayload,
        context: &HookContext,
    ) -> Result<Option<HookPayload>> {
        let kind = payload.kind();
        if !hook.accepts().contains(&kind) {
            return Err(Error::PayloadMismatch {
                hook: hook.name().to_string(),
                expected: describe_kinds(hook),
                found: kind.to_string(),
            });
        }

        let key = hook.cache_key(payload, context);
        if let Some(key) = &key {
            if let Some(cached) = self.load_cached(hook, key, kind) {
                return Ok(Some(cached));
            }
        }

        let attempt = AssertUnwindSafe(hook.process(payload, context)).catch_unwind();
        let outcome = match self.hook_timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .map_err(|_| Error::HookTimeout {
                    hook: hook.name().to_string(),
                    timeout,
                })?,
            None => attempt.await,
        };

        let enriched = match outcome {
            Ok(Ok(enriched)) => enriched,
            Ok(Err(failure)) => {
                return Err(Error::HookExecution {
                    hook: hook.name().to_string(),
                    message: failure.message,
                })
            }
            Err(_) => {
                return Err(Error::HookExecution {
                    hook: hook.name().to_string(),
                    message: "hook panicked".to_string(),
                })
            }
        };

        if enriched.kind() != kind {
            return Err(Error::PayloadMismatch {
                hook: hook.name().to_string(),
                expected: kind.to_string(),
                found: format!("{} output", enriched.kind()),
            });
        }

        Counters::bump(&self.counters.executed);
        if let Some(key) = &key {
            if let Err(e) = self.store.put(key, &enriched.to_value()) {
                Counters::bump(&self.counters.cache_errors);
                warn!("Could not cache {} result under {}: {}", hook.name(), key, e);
            }
        }
        Ok(Some(enriched))
    }

    /// A read error, an entry of the wrong shape or one of another payload kind
    /// counts as a miss
    fn load_cached(&self, hook: &dyn Hook, key: &str, kind: PayloadKind) -> Option<HookPayload> {
        let value = match self.store.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                Counters::bump(&self.counters.cache_errors);
                warn!("Cache read failed for {}, running hook: {}", key, e);
                return None;
            }
        };

        match HookPayload::from_value(value) {
            Some(cached) if cached.kind() == kind => {
                Counters::bump(&self.counters.cache_hits);
                debug!("Using cached result for {} ({})", hook.name(), key);
                Some(cached)
            }
            Some(cached) => {
                Counters::bump(&self.counters.cache_errors);
                warn!(
                    "Cache entry {} holds a {} payload, {} needs {}; running hook",
                    key,
                    cached.kind(),
                    hook.name(),
                    kind
                );
                None
            }
            None => {
                debug!("Ignoring cache entry {} of unexpected shape", key);
                None
            }
        }
    }
}

fn describe_kinds(hook: &dyn Hook) -> String {
    hook.accepts()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}
