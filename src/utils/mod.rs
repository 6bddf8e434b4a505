pub mod paths;

pub use paths::{discover_images, mirror_out_dir, output_path};
