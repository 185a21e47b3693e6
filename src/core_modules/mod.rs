pub mod cluster;
pub mod color_sampler;
pub mod contrast;
pub mod finding;
pub mod image_locator;
pub mod pixel;
