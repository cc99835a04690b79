pub mod geometry;
pub mod label_decoder;
pub mod label_files;
pub mod linker;
pub mod tracker;
