pub mod archive;
pub mod connectors;
pub mod fs;
pub mod memory;
pub mod mongodb;
pub mod parsers;
