pub mod namer;
pub mod upload;

pub use namer::{StagingError, StorageNamer};
pub use upload::{UploadError, UploadedImage, receive_upload};
