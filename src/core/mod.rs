pub mod attachments;
pub mod etl;
pub mod normalizer;
pub mod pipeline;
pub mod reconciler;
pub mod scheduler;
pub mod type_guesser;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::domain::model::{Record, UploadReport};
pub use crate::domain::ports::Pipeline;
pub use crate::utils::error::Result;
