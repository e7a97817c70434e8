pub mod intercept;
pub mod serializer;
pub mod settle;
pub mod subrequest;

pub use intercept::RenderContext;
pub use serializer::DomSerializer;
