pub mod crnn;
pub mod encoder;
pub mod feature_extractor;
pub mod registry;

pub use crnn::Crnn;
pub use feature_extractor::WIDTH_REDUCTION;
pub use registry::ParamRegistry;
