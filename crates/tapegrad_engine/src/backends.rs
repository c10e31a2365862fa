use crate::engine::Engine;
use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tapegrad_core::{
    backend::{Backend, BackendFactory, BackendInit, BoxFuture},
    error::{Error, Result},
};

pub(crate) struct FactoryEntry {
    factory: BackendFactory,
    priority: i32,
}

pub(crate) struct PendingInit {
    id: usize,
    name: String,
    /// Taken by whichever caller drives the initialization.
    init: Option<BoxFuture<'static, Result<Arc<dyn Backend>>>>,
}

#[derive(Default)]
pub(crate) struct BackendSlots {
    factories: BTreeMap<String, FactoryEntry>,
    instances: BTreeMap<String, Arc<dyn Backend>>,
    active: Option<String>,
    pending_init_id: usize,
    pending: Option<PendingInit>,
}

impl BackendSlots {
    /// Invalidates any in-flight initialization.
    fn cancel_pending(&mut self) {
        self.pending_init_id += 1;
        self.pending = None;
    }
}

enum InitOutcome {
    Ready(bool),
    Pending(usize),
}

/// Yields once to the executor.
#[derive(Default)]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Abandons pending initialization `id` if its driver is dropped before the
/// init future completes; the future is gone, so nothing else could finish it.
struct PendingDriver<'a> {
    engine: &'a Engine,
    id: usize,
    armed: bool,
}

impl Drop for PendingDriver<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut slots) = self.engine.backends.try_borrow_mut() {
            let abandoned = slots.pending.as_ref().filter(|p| p.id == self.id).map(|p| p.name.clone());
            if let Some(name) = abandoned {
                tracing::debug!(backend = %name, "backend initialization was abandoned");
                slots.cancel_pending();
            }
        }
    }
}

impl Engine {
    /// Returns false, keeping the existing factory, when `name` is taken.
    pub fn register_backend<F>(&self, name: &str, factory: F, priority: i32) -> bool
    where
        F: Fn() -> Result<BackendInit> + 'static,
    {
        let mut slots = self.backends.borrow_mut();
        if slots.factories.contains_key(name) {
            tracing::warn!(backend = name, "backend was already registered, reusing existing backend factory");
            return false;
        }
        slots.factories.insert(
            name.to_string(),
            FactoryEntry {
                factory: Arc::new(factory),
                priority,
            },
        );
        true
    }

    /// Disposes the backend's kernels and instance and forgets its factory.
    pub fn remove_backend(&self, name: &str) -> Result<()> {
        let instance = {
            let mut slots = self.backends.borrow_mut();
            if slots.factories.remove(name).is_none() {
                return Err(Error::BackendNotFound(name.to_string()));
            }
            let is_active = slots.active.as_deref() == Some(name);
            let is_pending = slots.pending.as_ref().map(|p| p.name == name).unwrap_or(false);
            if is_active || is_pending {
                slots.cancel_pending();
            }
            if is_active {
                slots.active = None;
            }
            slots.instances.remove(name)
        };
        if let Some(instance) = instance {
            self.dispose_registered_kernels(name, instance.as_ref());
            instance.dispose();
        }
        tracing::debug!(backend = name, "removed backend");
        Ok(())
    }

    /// Makes `name` the active backend, initializing it first if needed.
    ///
    /// Any initialization still in flight is abandoned. Returns `Ok(false)`
    /// when initialization fails or is superseded by a later call.
    pub async fn set_backend(&self, name: &str) -> Result<bool> {
        let existing = {
            let mut slots = self.backends.borrow_mut();
            if !slots.factories.contains_key(name) {
                return Err(Error::BackendNotFound(name.to_string()));
            }
            slots.cancel_pending();
            let existing = slots.instances.get(name).cloned();
            if existing.is_none() {
                slots.active = None;
            }
            existing
        };

        let instance = match existing {
            Some(instance) => instance,
            None => {
                let initialized = match self.initialize_backend(name)? {
                    InitOutcome::Ready(success) => success,
                    InitOutcome::Pending(id) => self.drive_pending(id).await,
                };
                match self.backend_instance(name) {
                    Some(instance) if initialized => instance,
                    _ => return Ok(false),
                }
            },
        };
        self.activate(name, instance.as_ref());
        Ok(true)
    }

    /// Waits until the best available backend is initialized and active.
    pub async fn ready(&self) -> Result<()> {
        let pending = self.backends.borrow().pending.as_ref().map(|p| (p.id, p.name.clone()));
        if let Some((id, name)) = pending {
            if self.drive_pending(id).await && self.backend_name().is_none() {
                if let Some(instance) = self.backend_instance(&name) {
                    self.activate(&name, instance.as_ref());
                }
            }
        }
        if self.backend_name().is_some() {
            return Ok(());
        }

        for name in self.sorted_backend_names() {
            let initialized = match self.backend_instance(&name) {
                Some(_) => true,
                None => match self.initialize_backend(&name)? {
                    InitOutcome::Ready(success) => success,
                    InitOutcome::Pending(id) => self.drive_pending(id).await,
                },
            };
            if let (true, Some(instance)) = (initialized, self.backend_instance(&name)) {
                self.activate(&name, instance.as_ref());
                return Ok(());
            }
        }
        Err(Error::NoBackendAvailable)
    }

    /// The active backend. Without one, backends are initialized in
    /// descending priority and the first that succeeds becomes active.
    pub fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.active_backend().map(|(_, backend)| backend)
    }

    pub(crate) fn active_backend(&self) -> Result<(String, Arc<dyn Backend>)> {
        {
            let slots = self.backends.borrow();
            if let Some(pending) = &slots.pending {
                return Err(Error::BackendNotReady(format!(
                    "backend '{}' has not yet been initialized, await ready() or set_backend() before running operations",
                    pending.name
                )));
            }
            if let Some(name) = &slots.active {
                if let Some(instance) = slots.instances.get(name) {
                    return Ok((name.clone(), instance.clone()));
                }
            }
        }

        for name in self.sorted_backend_names() {
            let outcome = match self.backend_instance(&name) {
                Some(_) => InitOutcome::Ready(true),
                None => self.initialize_backend(&name)?,
            };
            match outcome {
                InitOutcome::Ready(true) => {
                    if let Some(instance) = self.backend_instance(&name) {
                        self.activate(&name, instance.as_ref());
                        return Ok((name, instance));
                    }
                },
                InitOutcome::Ready(false) => continue,
                InitOutcome::Pending(_) => {
                    return Err(Error::BackendNotReady(format!(
                        "the highest priority backend '{}' has not yet been initialized, await ready() or set_backend() before running operations",
                        name
                    )))
                },
            }
        }
        Err(Error::NoBackendAvailable)
    }

    pub fn backend_name(&self) -> Option<String> {
        self.backends.borrow().active.clone()
    }

    /// Instance registered as `name`, initializing it synchronously when
    /// possible. `None` if it is unknown, failed, or initializes asynchronously.
    pub fn find_backend(&self, name: &str) -> Option<Arc<dyn Backend>> {
        if let Some(instance) = self.backend_instance(name) {
            return Some(instance);
        }
        match self.initialize_backend(name) {
            Ok(InitOutcome::Ready(true)) => self.backend_instance(name),
            _ => None,
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.borrow().factories.keys().cloned().collect()
    }

    /// Registered backend names by descending priority.
    pub fn sorted_backend_names(&self) -> Vec<String> {
        let slots = self.backends.borrow();
        let mut names: Vec<(&String, i32)> = slots.factories.iter().map(|(n, e)| (n, e.priority)).collect();
        names.sort_by(|a, b| b.1.cmp(&a.1));
        names.into_iter().map(|(n, _)| n.clone()).collect()
    }

    pub(crate) fn backend_instance(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.borrow().instances.get(name).cloned()
    }

    pub(crate) fn take_backend_instances(&self) -> BTreeMap<String, Arc<dyn Backend>> {
        let mut slots = self.backends.borrow_mut();
        slots.cancel_pending();
        slots.active = None;
        std::mem::take(&mut slots.instances)
    }

    pub(crate) fn dispose_registered_kernels(&self, name: &str, backend: &dyn Backend) {
        for config in self.kernels.kernels_for_backend(name) {
            if let Some(dispose) = &config.dispose_func {
                dispose(backend);
            }
        }
    }

    fn activate(&self, name: &str, backend: &dyn Backend) {
        self.backends.borrow_mut().active = Some(name.to_string());
        for config in self.kernels.kernels_for_backend(name) {
            if let Some(setup) = &config.setup_func {
                setup(backend);
            }
        }
        tracing::info!(backend = name, kind = backend.kind(), "backend is active");
    }

    /// Runs the factory of `name`. A factory error is logged and reported as
    /// an unsuccessful initialization.
    fn initialize_backend(&self, name: &str) -> Result<InitOutcome> {
        let factory = self
            .backends
            .borrow()
            .factories
            .get(name)
            .map(|entry| entry.factory.clone())
            .ok_or_else(|| Error::BackendNotFound(name.to_string()))?;

        match factory() {
            Ok(BackendInit::Ready(instance)) => {
                self.backends.borrow_mut().instances.insert(name.to_string(), instance);
                Ok(InitOutcome::Ready(true))
            },
            Ok(BackendInit::Pending(init)) => {
                let mut slots = self.backends.borrow_mut();
                slots.pending_init_id += 1;
                let id = slots.pending_init_id;
                slots.pending = Some(PendingInit {
                    id,
                    name: name.to_string(),
                    init: Some(init),
                });
                Ok(InitOutcome::Pending(id))
            },
            Err(err) => {
                tracing::warn!(backend = name, error = %err, "initialization of backend failed");
                Ok(InitOutcome::Ready(false))
            },
        }
    }

    /// Completes the pending initialization `id`. A completion that was
    /// superseded in the meantime is discarded and its instance disposed.
    async fn drive_pending(&self, id: usize) -> bool {
        let (name, init) = {
            let mut slots = self.backends.borrow_mut();
            match slots.pending.as_mut() {
                Some(pending) if pending.id == id => (pending.name.clone(), pending.init.take()),
                _ => return false,
            }
        };

        let Some(init) = init else {
            // another caller is driving this initialization
            loop {
                let settled = !matches!(&self.backends.borrow().pending, Some(p) if p.id == id);
                if settled {
                    break;
                }
                YieldNow::default().await;
            }
            return self.backend_instance(&name).is_some();
        };

        let mut driver = PendingDriver {
            engine: self,
            id,
            armed: true,
        };
        let result = init.await;
        driver.armed = false;
        let mut slots = self.backends.borrow_mut();
        let stale = id < slots.pending_init_id;
        if !stale {
            slots.pending = None;
        }
        match result {
            Ok(instance) if stale => {
                drop(slots);
                tracing::debug!(backend = %name, "discarding superseded backend initialization");
                instance.dispose();
                false
            },
            Ok(instance) => {
                slots.instances.insert(name, instance);
                true
            },
            Err(err) => {
                tracing::warn!(backend = %name, error = %err, "initialization of backend failed");
                false
            },
        }
    }
}
