use std::sync::Arc;

use chanwatch_core::Monitor;
use chanwatch_core::processing::ProcessingMachine;

use crate::webhook::CallbackAnswerer;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub monitor: Arc<Monitor>,
    pub machine: Arc<ProcessingMachine>,
    pub answerer: Arc<dyn CallbackAnswerer>,
}
