//! Generation providers: the text fallback chain and the image waterfall.

pub mod image;
pub mod json_extract;
pub mod text;

pub use image::{ImageContext, ImageEngine, ImageTier};
pub use json_extract::extract_json;
pub use text::{ChatMessage, GenerationOptions, GenerationResult, TextEngine, TextProvider};
