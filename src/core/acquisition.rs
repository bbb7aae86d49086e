//! Per-sensor acquisition pipeline.
//!
//! Builds the deferred collection for a request in a fixed order:
//! base collections (merged), date filter, bounds filter, cloud-cover filter,
//! per-image quality mask, then radiometric scale correction. Nothing here
//! contacts the compute service.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::bands::BandSource;
use crate::core::graph::{CollectionHandle, Comparison, ImageHandle, Reducer};
use crate::core::indices::{compute_index, IndexParams, IndexResult};
use crate::core::quality_mask::decode_family;
use crate::core::sensors::{ScaleCorrection, SensorProfile, SensorRegistry};
use crate::types::{parse_iso_date, Geometry, VegError, VegResult};

/// Cloud threshold used when the caller does not give one
pub const DEFAULT_MAX_CLOUD_PERCENT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    pub sensor: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub area_of_interest: Geometry,
    pub max_cloud_percent: u32,
}

impl AcquisitionRequest {
    pub fn new(
        sensor: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        area_of_interest: Geometry,
    ) -> Self {
        Self {
            sensor: sensor.to_string(),
            start_date,
            end_date,
            area_of_interest,
            max_cloud_percent: DEFAULT_MAX_CLOUD_PERCENT,
        }
    }

    /// Build a request from ISO-8601 date strings
    pub fn from_iso(
        sensor: &str,
        start_date: &str,
        end_date: &str,
        area_of_interest: Geometry,
    ) -> VegResult<Self> {
        Ok(Self::new(
            sensor,
            parse_iso_date(start_date)?,
            parse_iso_date(end_date)?,
            area_of_interest,
        ))
    }

    pub fn with_max_cloud_percent(mut self, max_cloud_percent: u32) -> Self {
        self.max_cloud_percent = max_cloud_percent;
        self
    }
}

/// A filtered, masked and scale-corrected collection for one sensor
#[derive(Debug, Clone)]
pub struct Acquisition<'r> {
    pub profile: &'r SensorProfile,
    pub request: AcquisitionRequest,
    pub collection: CollectionHandle,
}

impl<'r> Acquisition<'r> {
    pub fn composite(&self, reducer: Reducer) -> ImageHandle {
        self.collection.reduce(reducer)
    }

    /// Median composite, the usual input for index computation
    pub fn median(&self) -> ImageHandle {
        self.collection.median()
    }

    /// Compute a named index over the median composite
    pub fn compute_index(
        &self,
        index_name: &str,
        params: &IndexParams,
    ) -> VegResult<IndexResult<ImageHandle>> {
        let composite = self.median();
        let output = compute_index(
            BandSource::Image(&composite),
            index_name,
            Some(self.profile),
            params,
        )?;
        output.into_image().ok_or_else(|| {
            VegError::UnsupportedSource("deferred index produced an eager result".to_string())
        })
    }
}

/// Builds acquisitions against an immutable sensor registry
pub struct AcquisitionPipeline<'r> {
    registry: &'r SensorRegistry,
}

impl<'r> AcquisitionPipeline<'r> {
    pub fn new(registry: &'r SensorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r SensorRegistry {
        self.registry
    }

    /// Validate the request and build its collection graph
    pub fn acquire(&self, request: &AcquisitionRequest) -> VegResult<Acquisition<'r>> {
        let profile = self.registry.get(&request.sensor)?;

        if request.start_date > request.end_date {
            return Err(VegError::InvalidDateRange {
                start: request.start_date,
                end: request.end_date,
            });
        }
        if request.max_cloud_percent > 100 {
            return Err(VegError::InvalidCloudPercent(request.max_cloud_percent));
        }
        let correction = self.registry.scale_correction(&profile.scale_correction_id)?;
        let family = profile.sensor_family()?;

        log::info!(
            "Acquiring {} from {} to {} (max cloud {}%)",
            profile.name,
            request.start_date,
            request.end_date,
            request.max_cloud_percent
        );
        if !profile
            .valid_dates
            .overlaps(request.start_date, request.end_date)
        {
            log::warn!(
                "Requested window {} to {} is outside the {} archive (from {}{})",
                request.start_date,
                request.end_date,
                profile.name,
                profile.valid_dates.start,
                profile
                    .valid_dates
                    .end
                    .map(|end| format!(" to {}", end))
                    .unwrap_or_default()
            );
        }

        let mut collection = base_collection(profile)?;
        log::debug!("Step 1: base collection {:?}", profile.collections);

        collection = collection.filter_date(request.start_date, request.end_date);
        log::debug!("Step 2: date filter");

        collection = collection.filter_bounds(&request.area_of_interest);
        log::debug!("Step 3: bounds filter");

        match &profile.cloud_property {
            Some(property) => {
                collection = collection.filter_metadata(
                    property,
                    Comparison::LessThan,
                    f64::from(request.max_cloud_percent),
                );
                log::debug!("Step 4: {} < {}", property, request.max_cloud_percent);
            }
            None => log::debug!("Step 4: skipped, {} has no cloud metadata", profile.name),
        }

        let quality_band = profile.quality_band.clone();
        collection = collection.map(|image| {
            let mask = decode_family(&image.select_band(&quality_band), family);
            image.update_mask(&mask)
        });
        log::debug!("Step 5: {} mask from {}", family.id(), profile.quality_band);

        collection = collection.map(|image| apply_scale_correction(&image, correction));
        log::debug!("Step 6: scale correction {}", correction.id);

        Ok(Acquisition {
            profile,
            request: request.clone(),
            collection,
        })
    }
}

/// Load a sensor's collections, merging siblings into one logical collection
pub fn base_collection(profile: &SensorProfile) -> VegResult<CollectionHandle> {
    let mut ids = profile.collections.iter();
    let first = ids.next().ok_or_else(|| {
        VegError::InvalidConfig(format!("sensor '{}' has no base collection", profile.name))
    })?;
    Ok(ids.fold(CollectionHandle::load(first), |merged, id| {
        merged.merge(&CollectionHandle::load(id))
    }))
}

/// Mask one image using its quality band
pub fn mask_quality(image: &ImageHandle, profile: &SensorProfile) -> VegResult<ImageHandle> {
    let family = profile.sensor_family()?;
    let mask = decode_family(&image.select_band(&profile.quality_band), family);
    Ok(image.update_mask(&mask))
}

/// Rescale matched bands in place; unmatched bands are kept as they are
pub fn apply_scale_correction(image: &ImageHandle, correction: &ScaleCorrection) -> ImageHandle {
    correction.rules.iter().fold(image.clone(), |current, rule| {
        let scaled = current
            .select_pattern(&rule.band_pattern)
            .multiply_scalar(rule.scale)
            .add_scalar(rule.offset);
        current.add_bands(&scaled, true)
    })
}

/// Convenience wrapper taking ISO-8601 date strings
pub fn acquire<'r>(
    registry: &'r SensorRegistry,
    sensor_name: &str,
    start_date: &str,
    end_date: &str,
    area_of_interest: &Geometry,
    max_cloud_percent: u32,
) -> VegResult<Acquisition<'r>> {
    // Unknown sensors are reported before malformed dates
    registry.get(sensor_name)?;
    let request =
        AcquisitionRequest::from_iso(sensor_name, start_date, end_date, area_of_interest.clone())?
            .with_max_cloud_percent(max_cloud_percent);
    AcquisitionPipeline::new(registry).acquire(&request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::{CollectionExpr, ImageExpr};

    fn aoi() -> Geometry {
        Geometry::rectangle(-120.5, 36.5, -120.0, 37.0).unwrap()
    }

    /// Walk the collection graph from the root down to the base, outermost step first
    fn step_names(expr: &CollectionExpr) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut current = expr;
        loop {
            match current {
                CollectionExpr::Load { .. } => {
                    names.push("load");
                    break;
                }
                CollectionExpr::Merge { first, .. } => {
                    names.push("merge");
                    current = first.as_ref();
                }
                CollectionExpr::FilterDate { input, .. } => {
                    names.push("filter_date");
                    current = input.as_ref();
                }
                CollectionExpr::FilterBounds { input, .. } => {
                    names.push("filter_bounds");
                    current = input.as_ref();
                }
                CollectionExpr::FilterMetadata { input, .. } => {
                    names.push("filter_metadata");
                    current = input.as_ref();
                }
                CollectionExpr::Map { input, .. } => {
                    names.push("map");
                    current = input.as_ref();
                }
            }
        }
        names
    }

    #[test]
    fn test_step_order_with_merge() {
        let registry = SensorRegistry::standard();
        let acquisition = acquire(&registry, "Landsat 8/9", "2024-01-01", "2024-06-01", &aoi(), 20).unwrap();

        assert_eq!(
            step_names(acquisition.collection.expr()),
            vec!["map", "map", "filter_metadata", "filter_bounds", "filter_date", "merge", "load"]
        );
    }

    #[test]
    fn test_modis_skips_cloud_filter() {
        let registry = SensorRegistry::standard();
        let acquisition = acquire(&registry, "MODIS", "2024-01-01", "2024-06-01", &aoi(), 20).unwrap();

        assert_eq!(
            step_names(acquisition.collection.expr()),
            vec!["map", "map", "filter_bounds", "filter_date", "load"]
        );
    }

    #[test]
    fn test_reversed_dates_rejected() {
        let registry = SensorRegistry::standard();
        let err = acquire(&registry, "Sentinel-2", "2024-06-01", "2024-01-01", &aoi(), 20).unwrap_err();
        assert!(matches!(err, VegError::InvalidDateRange { .. }));
    }

    #[test]
    fn test_unknown_sensor_rejected_first() {
        let registry = SensorRegistry::standard();
        let err = acquire(&registry, "SPOT-6", "not-a-date", "2024-01-01", &aoi(), 20).unwrap_err();
        assert!(matches!(err, VegError::UnsupportedSensor(name) if name == "SPOT-6"));
    }

    #[test]
    fn test_cloud_percent_bounds() {
        let registry = SensorRegistry::standard();
        assert!(matches!(
            acquire(&registry, "Sentinel-2", "2024-01-01", "2024-06-01", &aoi(), 101),
            Err(VegError::InvalidCloudPercent(101))
        ));
        assert!(acquire(&registry, "Sentinel-2", "2024-01-01", "2024-06-01", &aoi(), 100).is_ok());
    }

    #[test]
    fn test_out_of_window_request_still_builds() {
        let registry = SensorRegistry::standard();
        let acquisition = acquire(&registry, "Landsat 5/7", "2020-01-01", "2020-12-31", &aoi(), 20);
        assert!(acquisition.is_ok());
    }

    #[test]
    fn test_scale_correction_overwrites_matching_bands() {
        let registry = SensorRegistry::standard();
        let correction = registry.scale_correction("landsat_c2_l2").unwrap();
        let corrected = apply_scale_correction(&ImageHandle::element(), correction);

        // Outermost node handles the thermal rule, the one below it the optical rule
        match corrected.expr() {
            ImageExpr::AddBands { input, overwrite, .. } => {
                assert!(*overwrite);
                assert!(matches!(input.as_ref(), ImageExpr::AddBands { overwrite: true, .. }));
            }
            other => panic!("unexpected graph {:?}", other),
        }
    }

    #[test]
    fn test_mask_quality_reads_profile_quality_band() {
        let registry = SensorRegistry::standard();
        let masked = mask_quality(&ImageHandle::element(), registry.get("MODIS").unwrap()).unwrap();

        match masked.expr() {
            ImageExpr::UpdateMask { mask, .. } => {
                let json = serde_json::to_string(mask.as_ref()).unwrap();
                assert!(json.contains("StateQA"));
            }
            other => panic!("unexpected graph {:?}", other),
        }
    }

    #[test]
    fn test_request_defaults() {
        let request = AcquisitionRequest::from_iso("MODIS", "2023-05-01", "2023-09-30", aoi()).unwrap();
        assert_eq!(request.max_cloud_percent, DEFAULT_MAX_CLOUD_PERCENT);
        assert!(AcquisitionRequest::from_iso("MODIS", "2023-02-30", "2023-09-30", aoi()).is_err());
    }

    #[test]
    fn test_index_over_acquisition_is_single_named_band() {
        let registry = SensorRegistry::standard();
        let acquisition = acquire(&registry, "Sentinel-2", "2024-01-01", "2024-06-01", &aoi(), 20).unwrap();
        let ndvi = acquisition.compute_index("NDVI", &IndexParams::default()).unwrap();

        assert_eq!(ndvi.name(), "NDVI");
        assert!(matches!(ndvi.values.expr(), ImageExpr::Rename { .. }));
        assert!(matches!(
            acquisition.compute_index("FOOBAR", &IndexParams::default()),
            Err(VegError::UnknownIndex(_))
        ));
    }
}
