// Lazy engine loader for EchoNote Core
// Constructs the engine on first use; reload() rebuilds it after credential
// or settings changes

use std::sync::{Arc, Mutex};

use crate::error::{CoreError, CoreResult};

type Factory<T> = Box<dyn Fn() -> CoreResult<Arc<T>> + Send + Sync>;

/// Interior-mutability cell holding a lazily constructed engine.
pub struct EngineLoader<T: ?Sized> {
    factory: Factory<T>,
    instance: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> EngineLoader<T> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> CoreResult<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            instance: Mutex::new(None),
        }
    }

    /// Get the engine, constructing it on first use. Construction failures
    /// are not cached; the next call retries.
    pub fn get(&self) -> CoreResult<Arc<T>> {
        let mut guard = self
            .instance
            .lock()
            .map_err(|_| CoreError::fatal("engine loader poisoned"))?;

        if let Some(engine) = guard.as_ref() {
            return Ok(engine.clone());
        }

        let engine = (self.factory)()?;
        *guard = Some(engine.clone());
        Ok(engine)
    }

    /// Drop the cached instance and construct a fresh one eagerly so
    /// configuration errors surface immediately.
    pub fn reload(&self) -> CoreResult<Arc<T>> {
        let mut guard = self
            .instance
            .lock()
            .map_err(|_| CoreError::fatal("engine loader poisoned"))?;

        let engine = (self.factory)()?;
        *guard = Some(engine.clone());
        Ok(engine)
    }

    pub fn is_initialized(&self) -> bool {
        self.instance
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}
