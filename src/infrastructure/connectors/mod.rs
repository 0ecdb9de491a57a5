pub mod drop_directory;
