//! Data ingress: raster decoding and the compute-service boundary

pub mod memory_service;
pub mod raster_reader;
pub mod service;

pub use memory_service::{InMemoryService, Scene};
pub use raster_reader::{load_raster, load_raster_from_path, RasterLoadParams, RasterReader, ResampleFilter};
pub use service::{evaluate_index, ComputeService, ComputedBand, ComputedImage, ServiceError};
