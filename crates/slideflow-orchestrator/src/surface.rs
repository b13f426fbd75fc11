//! Interactive rendering surface contract.

use crate::pipeline::{ImageHandle, Renderer};
use std::sync::Arc;

/// The interactive view pipeline output is displayed on.
///
/// The orchestrator never renders directly; it only stops the surface's own
/// pipeline and attaches or detaches output sinks. All calls happen on the
/// interactive thread.
pub trait RenderSurface: Send + Sync {
    /// Stops whatever the surface is currently computing for display.
    fn stop_pipeline(&self);

    /// Detaches every output sink.
    fn remove_all_renderers(&self);

    /// Attaches one output sink.
    fn add_renderer(&self, renderer: Arc<dyn Renderer>);

    /// Shows a plain view of `image` (the idle, pre-run state).
    fn show_image(&self, image: &ImageHandle);
}
