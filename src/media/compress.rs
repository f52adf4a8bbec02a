use std::future::Future;
use std::pin::Pin;

/// External image compression collaborator.
///
/// Implementations receive raw bytes and must return bytes no larger than
/// `max_bytes`, or an error when that is not achievable.
pub trait ImageCompressor: Send + Sync {
    fn name(&self) -> &str;

    fn compress<'a>(
        &'a self,
        bytes: &'a [u8],
        mime_type: &'a str,
        max_bytes: usize,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + 'a>>;
}

/// Returns the input unchanged when it already fits the budget.
pub struct PassthroughCompressor;

impl ImageCompressor for PassthroughCompressor {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn compress<'a>(
        &'a self,
        bytes: &'a [u8],
        mime_type: &'a str,
        max_bytes: usize,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            anyhow::ensure!(
                bytes.len() <= max_bytes,
                "{mime_type} image of {} bytes exceeds budget of {max_bytes} bytes",
                bytes.len()
            );
            Ok(bytes.to_vec())
        })
    }
}
