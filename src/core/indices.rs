//! Vegetation index catalog.
//!
//! Every formula is written once against [`BandAlgebra`] and runs unchanged on
//! eager arrays (raster path) and on deferred image graphs (satellite path).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::algebra::{BandAlgebra, ExecutionModel};
use crate::core::bands::{extract_image_band, extract_raster_band, BandSource};
use crate::core::graph::ImageHandle;
use crate::core::sensors::SensorProfile;
use crate::types::{BandArray, LogicalBand, VegError, VegResult};

/// Which kind of imagery an index needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFamily {
    /// Needs bands outside the visible range (NIR, red-edge, SWIR)
    Multispectral,
    /// Computable from plain camera RGB
    RgbOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VegetationIndex {
    Ndvi,
    Savi,
    Evi,
    Gndvi,
    Ndmi,
    Ndre,
    ExG,
    ExR,
    ExGR,
    Vari,
    Gli,
    Rgbvi,
    Ngrdi,
}

/// Index computation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// SAVI soil brightness correction factor
    pub savi_l: f64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self { savi_l: 0.5 }
    }
}

/// Resolved bands keyed by logical role
#[derive(Debug, Clone)]
pub struct BandSet<B> {
    bands: BTreeMap<LogicalBand, B>,
}

impl<B> BandSet<B> {
    pub fn new() -> Self {
        Self {
            bands: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, band: LogicalBand, value: B) {
        self.bands.insert(band, value);
    }

    pub fn get(&self, band: LogicalBand) -> VegResult<&B> {
        self.bands.get(&band).ok_or_else(|| VegError::MissingBand {
            band: band.to_string(),
            source_name: "resolved band set".to_string(),
        })
    }
}

impl<B> Default for BandSet<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> FromIterator<(LogicalBand, B)> for BandSet<B> {
    fn from_iter<I: IntoIterator<Item = (LogicalBand, B)>>(iter: I) -> Self {
        Self {
            bands: iter.into_iter().collect(),
        }
    }
}

impl VegetationIndex {
    pub const ALL: &'static [VegetationIndex] = &[
        VegetationIndex::Ndvi,
        VegetationIndex::Savi,
        VegetationIndex::Evi,
        VegetationIndex::Gndvi,
        VegetationIndex::Ndmi,
        VegetationIndex::Ndre,
        VegetationIndex::ExG,
        VegetationIndex::ExR,
        VegetationIndex::ExGR,
        VegetationIndex::Vari,
        VegetationIndex::Gli,
        VegetationIndex::Rgbvi,
        VegetationIndex::Ngrdi,
    ];

    /// Display name, also used as the output band name
    pub fn name(&self) -> &'static str {
        match self {
            VegetationIndex::Ndvi => "NDVI",
            VegetationIndex::Savi => "SAVI",
            VegetationIndex::Evi => "EVI",
            VegetationIndex::Gndvi => "GNDVI",
            VegetationIndex::Ndmi => "NDMI",
            VegetationIndex::Ndre => "NDRE",
            VegetationIndex::ExG => "ExG",
            VegetationIndex::ExR => "ExR",
            VegetationIndex::ExGR => "ExGR",
            VegetationIndex::Vari => "VARI",
            VegetationIndex::Gli => "GLI",
            VegetationIndex::Rgbvi => "RGBVI",
            VegetationIndex::Ngrdi => "NGRDI",
        }
    }

    /// Case-insensitive lookup by display name
    pub fn from_name(name: &str) -> VegResult<Self> {
        let wanted = name.trim();
        VegetationIndex::ALL
            .iter()
            .copied()
            .find(|index| index.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VegError::UnknownIndex(name.to_string()))
    }

    pub fn description(&self) -> &'static str {
        match self {
            VegetationIndex::Ndvi => "Normalized Difference Vegetation Index - General vegetation health",
            VegetationIndex::Savi => "Soil Adjusted Vegetation Index - Sparse vegetation areas",
            VegetationIndex::Evi => "Enhanced Vegetation Index - Dense vegetation",
            VegetationIndex::Gndvi => "Green NDVI - Chlorophyll content",
            VegetationIndex::Ndmi => "Normalized Difference Moisture Index - Water content",
            VegetationIndex::Ndre => "Normalized Difference Red Edge - Crop health",
            VegetationIndex::ExG => "Excess Green - Simple vegetation detection",
            VegetationIndex::ExR => "Excess Red - Soil/dead vegetation",
            VegetationIndex::ExGR => "Excess Green-Red - Vegetation vs soil",
            VegetationIndex::Vari => "Visible Atmospherically Resistant - Vegetation fraction",
            VegetationIndex::Gli => "Green Leaf Index - Green leaf detection",
            VegetationIndex::Rgbvi => "RGB Vegetation Index - General RGB vegetation",
            VegetationIndex::Ngrdi => "Normalized Green-Red Difference - Quick assessment",
        }
    }

    pub fn family(&self) -> IndexFamily {
        match self {
            VegetationIndex::Ndvi
            | VegetationIndex::Savi
            | VegetationIndex::Evi
            | VegetationIndex::Gndvi
            | VegetationIndex::Ndmi
            | VegetationIndex::Ndre => IndexFamily::Multispectral,
            _ => IndexFamily::RgbOnly,
        }
    }

    pub fn required_bands(&self) -> &'static [LogicalBand] {
        use LogicalBand::*;
        match self {
            VegetationIndex::Ndvi | VegetationIndex::Savi => &[Nir, Red],
            VegetationIndex::Evi => &[Nir, Red, Blue],
            VegetationIndex::Gndvi => &[Nir, Green],
            VegetationIndex::Ndmi => &[Nir, Swir1],
            VegetationIndex::Ndre => &[Nir, RedEdge1],
            VegetationIndex::ExR | VegetationIndex::Ngrdi => &[Red, Green],
            VegetationIndex::ExG
            | VegetationIndex::ExGR
            | VegetationIndex::Vari
            | VegetationIndex::Gli
            | VegetationIndex::Rgbvi => &[Red, Green, Blue],
        }
    }

    /// Output range enforced on the eager path
    pub fn output_clip(&self) -> Option<(f64, f64)> {
        match self {
            VegetationIndex::Vari
            | VegetationIndex::Gli
            | VegetationIndex::Rgbvi
            | VegetationIndex::Ngrdi => Some((-1.0, 1.0)),
            _ => None,
        }
    }

    /// Apply the formula to already resolved bands
    pub fn evaluate<B: BandAlgebra>(&self, bands: &BandSet<B>, params: &IndexParams) -> VegResult<B> {
        let raw = match self {
            VegetationIndex::Ndvi => {
                normalized_difference(bands.get(LogicalBand::Nir)?, bands.get(LogicalBand::Red)?)
            }
            VegetationIndex::Savi => {
                let nir = bands.get(LogicalBand::Nir)?;
                let red = bands.get(LogicalBand::Red)?;
                let l = params.savi_l;
                nir.subtract(red)
                    .divide(&nir.add(red).add_scalar(l))
                    .multiply_scalar(1.0 + l)
            }
            VegetationIndex::Evi => {
                let nir = bands.get(LogicalBand::Nir)?;
                let red = bands.get(LogicalBand::Red)?;
                let blue = bands.get(LogicalBand::Blue)?;
                let denominator = nir
                    .add(&red.multiply_scalar(6.0))
                    .subtract(&blue.multiply_scalar(7.5))
                    .add_scalar(1.0);
                nir.subtract(red).multiply_scalar(2.5).divide(&denominator)
            }
            VegetationIndex::Gndvi => {
                normalized_difference(bands.get(LogicalBand::Nir)?, bands.get(LogicalBand::Green)?)
            }
            VegetationIndex::Ndmi => {
                normalized_difference(bands.get(LogicalBand::Nir)?, bands.get(LogicalBand::Swir1)?)
            }
            VegetationIndex::Ndre => normalized_difference(
                bands.get(LogicalBand::Nir)?,
                bands.get(LogicalBand::RedEdge1)?,
            ),
            VegetationIndex::ExG => {
                let (red, green, blue) = rgb(bands)?;
                green.multiply_scalar(2.0).subtract(red).subtract(blue)
            }
            VegetationIndex::ExR => {
                let red = bands.get(LogicalBand::Red)?;
                let green = bands.get(LogicalBand::Green)?;
                red.multiply_scalar(1.4).subtract(green)
            }
            VegetationIndex::ExGR => {
                let (red, green, blue) = rgb(bands)?;
                green
                    .multiply_scalar(3.0)
                    .subtract(&red.multiply_scalar(2.4))
                    .subtract(blue)
            }
            VegetationIndex::Vari => {
                let (red, green, blue) = rgb(bands)?;
                green.subtract(red).divide(&green.add(red).subtract(blue))
            }
            VegetationIndex::Gli => {
                let (red, green, blue) = rgb(bands)?;
                let double_green = green.multiply_scalar(2.0);
                double_green
                    .subtract(red)
                    .subtract(blue)
                    .divide(&double_green.add(red).add(blue))
            }
            VegetationIndex::Rgbvi => {
                let (red, green, blue) = rgb(bands)?;
                let green_sq = green.square();
                let red_blue = red.multiply(blue);
                green_sq.subtract(&red_blue).divide(&green_sq.add(&red_blue))
            }
            VegetationIndex::Ngrdi => {
                normalized_difference(bands.get(LogicalBand::Green)?, bands.get(LogicalBand::Red)?)
            }
        };

        let clipped = match (B::MODEL, self.output_clip()) {
            (ExecutionModel::Eager, Some((low, high))) => raw.clip(low, high),
            _ => raw,
        };
        Ok(clipped.labelled(self.name()))
    }
}

impl std::fmt::Display for VegetationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for VegetationIndex {
    type Err = VegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VegetationIndex::from_name(s)
    }
}

fn normalized_difference<B: BandAlgebra>(a: &B, b: &B) -> B {
    a.subtract(b).divide(&a.add(b))
}

fn rgb<B>(bands: &BandSet<B>) -> VegResult<(&B, &B, &B)> {
    Ok((
        bands.get(LogicalBand::Red)?,
        bands.get(LogicalBand::Green)?,
        bands.get(LogicalBand::Blue)?,
    ))
}

/// Index values tagged with the index that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct IndexResult<T> {
    pub index: VegetationIndex,
    pub values: T,
}

impl<T> IndexResult<T> {
    pub fn name(&self) -> &'static str {
        self.index.name()
    }
}

/// Result of `compute_index`, matching the kind of source it was computed on
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutput {
    Raster(IndexResult<BandArray>),
    Image(IndexResult<ImageHandle>),
}

impl IndexOutput {
    pub fn index(&self) -> VegetationIndex {
        match self {
            IndexOutput::Raster(result) => result.index,
            IndexOutput::Image(result) => result.index,
        }
    }

    pub fn into_raster(self) -> Option<IndexResult<BandArray>> {
        match self {
            IndexOutput::Raster(result) => Some(result),
            IndexOutput::Image(_) => None,
        }
    }

    pub fn into_image(self) -> Option<IndexResult<ImageHandle>> {
        match self {
            IndexOutput::Image(result) => Some(result),
            IndexOutput::Raster(_) => None,
        }
    }
}

/// Compute a named index over a raster or remote image.
///
/// The index name is validated first for every source kind, and all required
/// bands are resolved before any arithmetic runs.
pub fn compute_index(
    source: BandSource<'_>,
    index_name: &str,
    profile: Option<&SensorProfile>,
    params: &IndexParams,
) -> VegResult<IndexOutput> {
    let index = VegetationIndex::from_name(index_name)?;
    log::debug!("Computing {} on {} source", index, source.kind());

    match source {
        BandSource::Raster(raster) => {
            let normalized = raster.normalize();
            let bands = index
                .required_bands()
                .iter()
                .map(|&band| -> VegResult<(LogicalBand, BandArray)> {
                    Ok((band, extract_raster_band(&normalized, band)?))
                })
                .collect::<VegResult<BandSet<BandArray>>>()?;
            let values = index.evaluate(&bands, params)?;
            Ok(IndexOutput::Raster(IndexResult { index, values }))
        }
        BandSource::Image(image) => {
            let profile = profile.ok_or_else(|| {
                VegError::UnsupportedSource("remote image without a sensor profile".to_string())
            })?;
            let bands = index
                .required_bands()
                .iter()
                .map(|&band| -> VegResult<(LogicalBand, ImageHandle)> {
                    Ok((band, extract_image_band(image, band, profile)?))
                })
                .collect::<VegResult<BandSet<ImageHandle>>>()?;
            let values = index.evaluate(&bands, params)?;
            Ok(IndexOutput::Image(IndexResult { index, values }))
        }
        BandSource::Collection(_) => Err(VegError::UnsupportedSource(
            "image collection; composite it to a single image first".to_string(),
        )),
    }
}

/// All indices grouped by family
pub fn available_indices() -> BTreeMap<IndexFamily, Vec<VegetationIndex>> {
    let mut grouped: BTreeMap<IndexFamily, Vec<VegetationIndex>> = BTreeMap::new();
    for index in VegetationIndex::ALL {
        grouped.entry(index.family()).or_default().push(*index);
    }
    grouped
}

/// Indices whose required bands are all mapped by the profile
pub fn indices_for(profile: &SensorProfile) -> Vec<VegetationIndex> {
    VegetationIndex::ALL
        .iter()
        .copied()
        .filter(|index| profile.supports_all(index.required_bands()))
        .collect()
}
