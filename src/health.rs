//! Last-known health of each backing model

use crate::types::ModelHealth;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// Updated by every model invocation; read by status queries
#[derive(Debug, Default)]
pub struct ModelHealthTracker {
    models: RwLock<HashMap<String, ModelHealth>>,
}

impl ModelHealthTracker {
    pub fn new(model_ids: &[String]) -> Self {
        let models = model_ids
            .iter()
            .map(|id| (id.clone(), ModelHealth::default()))
            .collect();
        Self { models: RwLock::new(models) }
    }

    pub fn record_success(&self, model_id: &str) {
        self.record(model_id, true, None);
    }

    pub fn record_failure(&self, model_id: &str, error: impl Into<String>) {
        self.record(model_id, false, Some(error.into()));
    }

    /// Apply a probe result unless an invocation has been observed since
    pub fn record_probe(&self, model_id: &str, healthy: bool) {
        if let Ok(mut models) = self.models.write() {
            if let Some(health) = models.get_mut(model_id).filter(|h| h.healthy.is_none()) {
                health.healthy = Some(healthy);
                health.last_checked = Some(Utc::now());
            }
        }
    }

    /// Model ids with no observed outcome yet, sorted
    pub fn unobserved(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .models
            .read()
            .map(|m| {
                m.iter()
                    .filter(|(_, h)| h.healthy.is_none())
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> HashMap<String, ModelHealth> {
        self.models.read().map(|m| m.clone()).unwrap_or_default()
    }

    fn record(&self, model_id: &str, healthy: bool, error: Option<String>) {
        if let Ok(mut models) = self.models.write() {
            let entry = models.entry(model_id.to_string()).or_default();
            entry.healthy = Some(healthy);
            entry.last_checked = Some(Utc::now());
            if error.is_some() {
                entry.last_error = error;
            }
        }
    }
}
