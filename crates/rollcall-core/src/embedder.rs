//! Boundary to the face embedding service.

use crate::error::EmbedError;
use crate::types::Embedding;
use std::future::Future;

/// Maps raw image bytes to a face embedding.
///
/// Implementations report an image without a face as
/// [`EmbedError::NoFaceFound`]. When several faces are present the
/// implementation picks one; callers assume a single face per image.
pub trait Embedder: Send + Sync {
    fn extract<'a>(
        &'a self,
        image: &'a [u8],
    ) -> impl Future<Output = Result<Embedding, EmbedError>> + Send + 'a;
}
