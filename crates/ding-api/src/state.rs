use std::sync::Arc;

use ding_core::Dispatcher;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            metrics: Arc::new(Metrics::default()),
        }
    }
}
