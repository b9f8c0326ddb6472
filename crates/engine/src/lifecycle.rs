//! Ordered service startup and shutdown
//!
//! Services are started in the order they were added and stopped in
//! reverse. If a service fails to start, every service already started is
//! shut down before the error is returned.

use chronicle_core::Result;
use tracing::{info, warn};

type Step = Box<dyn FnMut() -> Result<()> + Send>;

struct Service {
    name: String,
    init: Step,
    shutdown: Step,
}

/// Ordered list of named (init, shutdown) pairs
#[derive(Default)]
pub struct Lifecycle {
    services: Vec<Service>,
    started: usize,
}

impl Lifecycle {
    /// Empty lifecycle
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a service
    pub fn add(
        &mut self,
        name: impl Into<String>,
        init: impl FnMut() -> Result<()> + Send + 'static,
        shutdown: impl FnMut() -> Result<()> + Send + 'static,
    ) -> &mut Self {
        self.services.push(Service {
            name: name.into(),
            init: Box::new(init),
            shutdown: Box::new(shutdown),
        });
        self
    }

    /// Start every service not yet started
    pub fn start(&mut self) -> Result<()> {
        while self.started < self.services.len() {
            let service = &mut self.services[self.started];
            if let Err(e) = (service.init)() {
                warn!(target: "chronicle::lifecycle", service = %service.name, error = %e, "Service failed to start");
                // Best effort; the init failure is what the caller needs
                let _ = self.shutdown();
                return Err(e);
            }
            info!(target: "chronicle::lifecycle", service = %service.name, "Service started");
            self.started += 1;
        }
        Ok(())
    }

    /// Stop started services in reverse order
    ///
    /// Every service is asked to stop even if an earlier one fails; the
    /// first failure is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first_error = None;
        while self.started > 0 {
            self.started -= 1;
            let service = &mut self.services[self.started];
            match (service.shutdown)() {
                Ok(()) => info!(target: "chronicle::lifecycle", service = %service.name, "Service stopped"),
                Err(e) => {
                    warn!(target: "chronicle::lifecycle", service = %service.name, error = %e, "Service failed to stop");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Names of the services currently started, in start order
    pub fn started_services(&self) -> Vec<&str> {
        self.services[..self.started]
            .iter()
            .map(|s| s.name.as_str())
            .collect()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("services", &self.services.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("started", &self.started)
            .finish()
    }
}
