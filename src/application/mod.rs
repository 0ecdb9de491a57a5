pub mod pipeline;
pub mod record_transformer;
pub mod report;
pub mod shapes;
