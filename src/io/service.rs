//! Boundary to the remote compute service that executes deferred graphs.

use ndarray::{Array2, Zip};

use crate::core::graph::{CollectionHandle, ImageHandle};
use crate::core::indices::IndexResult;
use crate::types::{BandArray, VegResult};

/// Errors reported by a compute service; carried to callers unchanged
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Band not found: {0}")]
    BandNotFound(String),

    #[error("Graph evaluation failed: {0}")]
    Evaluation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
}

/// One evaluated band with its validity mask
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedBand {
    pub name: String,
    pub values: BandArray,
    /// `false` where the pixel is masked (no data)
    pub mask: Array2<bool>,
}

impl ComputedBand {
    /// Values with masked pixels replaced by NaN
    pub fn masked_values(&self) -> BandArray {
        Zip::from(&self.values)
            .and(&self.mask)
            .map_collect(|&v, &valid| if valid { v } else { f64::NAN })
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&valid| valid).count()
    }
}

/// Result of evaluating an image graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputedImage {
    pub bands: Vec<ComputedBand>,
}

impl ComputedImage {
    pub fn band(&self, name: &str) -> Option<&ComputedBand> {
        self.bands.iter().find(|band| band.name == name)
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|band| band.name.as_str()).collect()
    }
}

/// Executes deferred graphs. Implementations own transport, retries and quotas.
pub trait ComputeService {
    fn compute_image(&self, image: &ImageHandle) -> Result<ComputedImage, ServiceError>;

    fn collection_size(&self, collection: &CollectionHandle) -> Result<usize, ServiceError>;
}

/// Evaluate a deferred index result and return its single band.
///
/// `values` holds the raw service output and `mask` marks valid pixels;
/// use [`ComputedBand::masked_values`] to get NaN where the mask is false.
/// Pixels where the service's division produced NaN or Inf stay unmasked.
pub fn evaluate_index<S: ComputeService + ?Sized>(
    service: &S,
    result: &IndexResult<ImageHandle>,
) -> VegResult<ComputedBand> {
    log::debug!("Evaluating {} on compute service", result.name());
    let image = service.compute_image(&result.values)?;
    let band = image
        .band(result.name())
        .cloned()
        .ok_or_else(|| ServiceError::BandNotFound(result.name().to_string()))?;
    Ok(band)
}
