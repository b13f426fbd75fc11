//! Project access, injected instead of reached through a global main window.

use crate::pipeline::{ImageHandle, ImageId, PipelineInfo, PipelineOutput};

/// The collection of images a pipeline can be applied to, plus result storage.
pub trait ProjectProvider: Send + Sync {
    /// All images in project order.
    fn image_ids(&self) -> Vec<ImageId>;

    /// Resolves an identifier to a bindable image.
    fn image(&self, id: &ImageId) -> Option<ImageHandle>;

    /// The image currently selected by the user, if any.
    fn current_image(&self) -> Option<ImageId>;

    /// Persists the outputs of a completed run.
    ///
    /// Called synchronously on the interactive thread right before the
    /// `Finished` notification.
    fn save_results(
        &self,
        image: &ImageId,
        pipeline: &PipelineInfo,
        output: &PipelineOutput,
    ) -> Result<(), String>;
}
