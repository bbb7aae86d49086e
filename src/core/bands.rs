//! Logical band resolution for rasters and remote images.

use crate::core::graph::{CollectionHandle, ImageHandle};
use crate::core::sensors::SensorProfile;
use crate::types::{BandArray, LogicalBand, Raster, VegError, VegResult};

/// Anything a band can be pulled from
#[derive(Debug, Clone, Copy)]
pub enum BandSource<'a> {
    Raster(&'a Raster),
    Image(&'a ImageHandle),
    /// Must be composited before bands can be resolved
    Collection(&'a CollectionHandle),
}

impl<'a> BandSource<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            BandSource::Raster(_) => "raster",
            BandSource::Image(_) => "image",
            BandSource::Collection(_) => "collection",
        }
    }
}

impl<'a> From<&'a Raster> for BandSource<'a> {
    fn from(raster: &'a Raster) -> Self {
        BandSource::Raster(raster)
    }
}

impl<'a> From<&'a ImageHandle> for BandSource<'a> {
    fn from(image: &'a ImageHandle) -> Self {
        BandSource::Image(image)
    }
}

impl<'a> From<&'a CollectionHandle> for BandSource<'a> {
    fn from(collection: &'a CollectionHandle) -> Self {
        BandSource::Collection(collection)
    }
}

/// A resolved band, eager or deferred
#[derive(Debug, Clone, PartialEq)]
pub enum BandValue {
    Eager(BandArray),
    Deferred(ImageHandle),
}

impl BandValue {
    pub fn as_eager(&self) -> Option<&BandArray> {
        match self {
            BandValue::Eager(values) => Some(values),
            BandValue::Deferred(_) => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&ImageHandle> {
        match self {
            BandValue::Deferred(image) => Some(image),
            BandValue::Eager(_) => None,
        }
    }
}

/// Channel index of a logical band in an RGB raster
fn rgb_channel(band: LogicalBand) -> Option<usize> {
    match band {
        LogicalBand::Red => Some(0),
        LogicalBand::Green => Some(1),
        LogicalBand::Blue => Some(2),
        _ => None,
    }
}

/// Extract one logical band from a raster, normalized to [0, 1].
///
/// Single-channel rasters alias red, green and blue to the same data. Raster
/// sources only carry visible bands, so asking for NIR or red-edge fails with
/// `MissingBand`.
pub fn extract_raster_band(raster: &Raster, band: LogicalBand) -> VegResult<BandArray> {
    let channel = rgb_channel(band).ok_or_else(|| VegError::MissingBand {
        band: band.to_string(),
        source_name: "RGB raster".to_string(),
    })?;

    let channel = if raster.channels() == 1 { 0 } else { channel };
    let values = raster.channel(channel).map_err(|_| VegError::MissingBand {
        band: band.to_string(),
        source_name: format!("{}-channel raster", raster.channels()),
    })?;

    if raster.is_normalized() {
        return Ok(values);
    }
    let divisor = raster.normalization_divisor();
    Ok(values.mapv(|v| (v / divisor).clamp(0.0, 1.0)))
}

/// Select the physical band mapped to `band` by the sensor profile
pub fn extract_image_band(
    image: &ImageHandle,
    band: LogicalBand,
    profile: &SensorProfile,
) -> VegResult<ImageHandle> {
    let physical = profile
        .physical_band(band)
        .ok_or_else(|| VegError::MissingBand {
            band: band.to_string(),
            source_name: profile.name.clone(),
        })?;
    log::debug!("Resolved {} to {} for {}", band, physical, profile.name);
    Ok(image.select_band(physical))
}

/// Resolve a logical band name against any band source
pub fn resolve_band(
    source: BandSource<'_>,
    logical_name: &str,
    profile: Option<&SensorProfile>,
) -> VegResult<BandValue> {
    let band: LogicalBand = logical_name.parse()?;
    resolve_logical_band(source, band, profile)
}

pub fn resolve_logical_band(
    source: BandSource<'_>,
    band: LogicalBand,
    profile: Option<&SensorProfile>,
) -> VegResult<BandValue> {
    match (source, profile) {
        (BandSource::Raster(raster), _) => extract_raster_band(raster, band).map(BandValue::Eager),
        (BandSource::Image(image), Some(profile)) => {
            extract_image_band(image, band, profile).map(BandValue::Deferred)
        }
        (BandSource::Image(_), None) => Err(VegError::UnsupportedSource(
            "remote image without a sensor profile".to_string(),
        )),
        (BandSource::Collection(_), _) => Err(VegError::UnsupportedSource(
            "image collection; composite it to a single image first".to_string(),
        )),
    }
}
