pub mod compress;
pub mod detection;

pub use compress::{ImageCompressor, PassthroughCompressor};
pub use detection::{detect_mime, extension_from_mime, normalize_mime, resolve_image_mime};
