//! Speech output seam

use async_trait::async_trait;

use crate::Result;

/// Renders text audibly
///
/// `speak` resolves when rendering finished or was cancelled by
/// [`stop`](Self::stop).
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render one unit of text
    ///
    /// # Errors
    ///
    /// Returns error if the text could not be rendered
    async fn speak(&self, text: &str) -> Result<()>;

    /// Cancel in-flight rendering
    fn stop(&self);

    /// Set the output language (BCP-47)
    fn set_language(&self, language: &str);
}
