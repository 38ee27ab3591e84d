//! Lookup-or-create service for shared admission gates.
//!
//! A registry owns at most one shared gate. The first non-private
//! acquisition creates it; later ones only raise its limit. Private
//! acquisitions never touch the shared gate.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::gate::{effective_limit, AdmissionGate};

/// Options for acquiring a gate from a [`GateRegistry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOptions {
    /// Admission limit; `None` or zero means the default of 200.
    pub limit: Option<usize>,
    /// Bypass the shared gate and create an independent one.
    pub private: bool,
}

impl GateOptions {
    /// Options for the shared gate with the given limit.
    pub fn shared(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            private: false,
        }
    }

    /// Options for an independent gate with the given limit.
    pub fn private(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            private: true,
        }
    }
}

/// Owner of at most one shared [`AdmissionGate`].
#[derive(Default)]
pub struct GateRegistry {
    shared: Mutex<Option<AdmissionGate>>,
}

impl GateRegistry {
    /// Creates a registry with no shared gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`AdmissionGate::shared`].
    pub fn global() -> &'static GateRegistry {
        static GLOBAL: OnceLock<GateRegistry> = OnceLock::new();
        GLOBAL.get_or_init(GateRegistry::new)
    }

    /// Returns the shared gate (creating it or raising its limit), or a new
    /// private gate when `options.private` is set.
    pub fn acquire(&self, options: GateOptions) -> AdmissionGate {
        let limit = effective_limit(options.limit);
        if options.private {
            return AdmissionGate::new(limit);
        }

        let existing = {
            let mut shared = self.shared.lock();
            match shared.as_ref() {
                Some(gate) => gate.clone(),
                None => {
                    let gate = AdmissionGate::new(limit);
                    *shared = Some(gate.clone());
                    debug!(limit, "installed shared admission gate");
                    return gate;
                }
            }
        };

        existing.raise_limit(limit);
        existing
    }

    /// Shorthand for a non-private [`acquire`](Self::acquire).
    pub fn shared(&self, limit: Option<usize>) -> AdmissionGate {
        self.acquire(GateOptions {
            limit,
            private: false,
        })
    }

    /// Shorthand for a private [`acquire`](Self::acquire).
    pub fn private(&self, limit: Option<usize>) -> AdmissionGate {
        self.acquire(GateOptions {
            limit,
            private: true,
        })
    }

    /// The shared gate, if one has been created.
    pub fn current(&self) -> Option<AdmissionGate> {
        self.shared.lock().clone()
    }
}
