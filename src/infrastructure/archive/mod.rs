pub mod extractor;
pub mod sniffer;
