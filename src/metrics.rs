use std::sync::Arc;

use prometheus_client::{
    encoding::text::encode, metrics::counter::Counter, registry::Registry,
};

pub struct Metrics {
    pub profiles_served: Counter,
    pub profiles_failed: Counter,
}

impl Metrics {
    fn new(registry: &mut Registry) -> Self {
        let profiles_served = Counter::default();
        registry.register(
            "profiles_served",
            "Number of CPU profiles captured and served",
            profiles_served.clone(),
        );

        let profiles_failed = Counter::default();
        registry.register(
            "profiles_failed",
            "Number of profile requests that failed",
            profiles_failed.clone(),
        );

        Metrics {
            profiles_served,
            profiles_failed,
        }
    }
}

#[derive(Clone)]
pub struct Exporter {
    registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Exporter {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("profd");
        let metrics = Arc::new(Metrics::new(&mut registry));
        let registry = Arc::new(registry);
        Exporter { registry, metrics }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Exporter::new()
    }
}
