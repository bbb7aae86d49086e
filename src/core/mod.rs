//! Core vegetation index processing modules

pub mod acquisition;
pub mod algebra;
pub mod bands;
pub mod graph;
pub mod indices;
pub mod preview;
pub mod quality_mask;
pub mod sensors;

// Re-export main types
pub use acquisition::{acquire, Acquisition, AcquisitionPipeline, AcquisitionRequest, DEFAULT_MAX_CLOUD_PERCENT};
pub use algebra::{BandAlgebra, ExecutionModel, DIVISION_EPSILON};
pub use bands::{resolve_band, BandSource, BandValue};
pub use graph::{CollectionHandle, Comparison, ImageHandle, Reducer};
pub use indices::{available_indices, compute_index, indices_for, IndexFamily, IndexOutput, IndexParams, IndexResult, VegetationIndex};
pub use preview::{render_preview, Palette, PreviewParams};
pub use quality_mask::{apply_mask, decode_mask, QualityBits, SensorFamily};
pub use sensors::{ScaleCorrection, ScaleRule, SensorProfile, SensorRegistry};
