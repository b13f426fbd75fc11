//! Headless rendering surface and execution contexts.
//!
//! Nothing is drawn; the surface keeps track of what would be on screen so the
//! CLI can report it.

use slideflow_orchestrator::{
    ContextError, ContextFactory, ExecutionContext, ImageHandle, ImageId, RenderSurface, Renderer,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct SurfaceState {
    renderers: Vec<String>,
    shown: Option<ImageId>,
}

/// Surface that records attached renderers instead of drawing them.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    state: Mutex<SurfaceState>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the renderers currently attached.
    pub fn renderers(&self) -> Vec<String> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).renderers.clone()
    }

    /// Image of the last idle view.
    #[cfg(test)]
    pub fn shown_image(&self) -> Option<ImageId> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).shown.clone()
    }
}

impl RenderSurface for HeadlessSurface {
    fn stop_pipeline(&self) {
        debug!("Surface pipeline stopped");
    }

    fn remove_all_renderers(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.renderers.is_empty() {
            debug!(count = state.renderers.len(), "Detaching renderers");
        }
        state.renderers.clear();
    }

    fn add_renderer(&self, renderer: Arc<dyn Renderer>) {
        info!(renderer = renderer.name(), "Renderer attached");
        self.state.lock().unwrap_or_else(PoisonError::into_inner).renderers.push(renderer.name().to_string());
    }

    fn show_image(&self, image: &ImageHandle) {
        debug!(image = %image.id, "Showing image");
        self.state.lock().unwrap_or_else(PoisonError::into_inner).shown = Some(image.id.clone());
    }
}

/// Context with no GPU behind it. It can only be current on one thread.
#[derive(Debug, Default)]
struct HeadlessContext {
    current: Option<ThreadId>,
}

impl ExecutionContext for HeadlessContext {
    fn is_valid(&self) -> bool {
        true
    }

    fn is_sharing(&self) -> bool {
        true
    }

    fn make_current(&mut self) -> Result<(), ContextError> {
        let here = thread::current().id();
        match self.current {
            Some(owner) if owner != here => {
                Err(ContextError::MakeCurrent(format!("context is current on {owner:?}")))
            }
            _ => {
                self.current = Some(here);
                Ok(())
            }
        }
    }

    fn done_current(&mut self) {
        self.current = None;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessContextFactory;

impl ContextFactory for HeadlessContextFactory {
    fn create_shared(&self) -> Result<Box<dyn ExecutionContext>, ContextError> {
        Ok(Box::new(HeadlessContext::default()))
    }
}
