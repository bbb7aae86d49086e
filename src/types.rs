use chrono::NaiveDate;
use ndarray::{Array2, Array3, Axis};
use num_traits::{PrimInt, ToPrimitive, Unsigned};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::io::service::ServiceError;

/// Reflectance or normalized pixel value
pub type Reflectance = f64;

/// 2D single-band array (rows x cols)
pub type BandArray = Array2<Reflectance>;

/// 3D multi-channel pixel array (rows x cols x channels)
pub type PixelArray = Array3<Reflectance>;

/// Sensor-independent band roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogicalBand {
    #[serde(rename = "blue")]
    Blue,
    #[serde(rename = "green")]
    Green,
    #[serde(rename = "red")]
    Red,
    #[serde(rename = "rededge1")]
    RedEdge1,
    #[serde(rename = "rededge2")]
    RedEdge2,
    #[serde(rename = "rededge3")]
    RedEdge3,
    #[serde(rename = "nir")]
    Nir,
    #[serde(rename = "nir_narrow")]
    NirNarrow,
    #[serde(rename = "swir1")]
    Swir1,
    #[serde(rename = "swir2")]
    Swir2,
}

impl LogicalBand {
    pub const ALL: &'static [LogicalBand] = &[
        LogicalBand::Blue,
        LogicalBand::Green,
        LogicalBand::Red,
        LogicalBand::RedEdge1,
        LogicalBand::RedEdge2,
        LogicalBand::RedEdge3,
        LogicalBand::Nir,
        LogicalBand::NirNarrow,
        LogicalBand::Swir1,
        LogicalBand::Swir2,
    ];

    /// Canonical lowercase name used in band tables
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalBand::Blue => "blue",
            LogicalBand::Green => "green",
            LogicalBand::Red => "red",
            LogicalBand::RedEdge1 => "rededge1",
            LogicalBand::RedEdge2 => "rededge2",
            LogicalBand::RedEdge3 => "rededge3",
            LogicalBand::Nir => "nir",
            LogicalBand::NirNarrow => "nir_narrow",
            LogicalBand::Swir1 => "swir1",
            LogicalBand::Swir2 => "swir2",
        }
    }
}

impl std::fmt::Display for LogicalBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogicalBand {
    type Err = VegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let band = match s.trim().to_lowercase().as_str() {
            "blue" | "b" => LogicalBand::Blue,
            "green" | "g" => LogicalBand::Green,
            "red" | "r" => LogicalBand::Red,
            // NDRE uses the first red-edge band unless told otherwise
            "rededge" | "rededge1" | "red_edge" => LogicalBand::RedEdge1,
            "rededge2" => LogicalBand::RedEdge2,
            "rededge3" => LogicalBand::RedEdge3,
            "nir" => LogicalBand::Nir,
            "nir_narrow" => LogicalBand::NirNarrow,
            "swir" | "swir1" => LogicalBand::Swir1,
            "swir2" => LogicalBand::Swir2,
            _ => return Err(VegError::UnknownBand(s.to_string())),
        };
        Ok(band)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    /// Closed-interval overlap test; touching edges count as intersecting
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

/// Area of interest handed to the acquisition pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Rectangle { bounds: BoundingBox },
    /// Exterior ring as (lon, lat) vertices
    Polygon { coordinates: Vec<[f64; 2]> },
    Point { lon: f64, lat: f64 },
}

impl Geometry {
    pub fn rectangle(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> VegResult<Self> {
        if min_lon > max_lon || min_lat > max_lat {
            return Err(VegError::InvalidGeometry(format!(
                "rectangle corners out of order: ({}, {}) / ({}, {})",
                min_lon, min_lat, max_lon, max_lat
            )));
        }
        Ok(Geometry::Rectangle {
            bounds: BoundingBox::new(min_lon, min_lat, max_lon, max_lat),
        })
    }

    pub fn polygon(coordinates: Vec<[f64; 2]>) -> VegResult<Self> {
        if coordinates.len() < 3 {
            return Err(VegError::InvalidGeometry(format!(
                "polygon needs at least 3 vertices, got {}",
                coordinates.len()
            )));
        }
        if coordinates.iter().flatten().any(|v| !v.is_finite()) {
            return Err(VegError::InvalidGeometry(
                "polygon has non-finite coordinates".to_string(),
            ));
        }
        Ok(Geometry::Polygon { coordinates })
    }

    pub fn point(lon: f64, lat: f64) -> Self {
        Geometry::Point { lon, lat }
    }

    /// Envelope of the geometry
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Geometry::Rectangle { bounds } => *bounds,
            Geometry::Point { lon, lat } => BoundingBox::new(*lon, *lat, *lon, *lat),
            Geometry::Polygon { coordinates } => {
                let mut bbox = BoundingBox::new(
                    f64::INFINITY,
                    f64::INFINITY,
                    f64::NEG_INFINITY,
                    f64::NEG_INFINITY,
                );
                for [lon, lat] in coordinates {
                    bbox.min_lon = bbox.min_lon.min(*lon);
                    bbox.max_lon = bbox.max_lon.max(*lon);
                    bbox.min_lat = bbox.min_lat.min(*lat);
                    bbox.max_lat = bbox.max_lat.max(*lat);
                }
                bbox
            }
        }
    }
}

/// Archive window of a sensor; `end` is `None` for missions still acquiring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.map_or(true, |end| date <= end)
    }

    /// True when [start, end] shares at least one day with this range
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        end >= self.start && self.end.map_or(true, |e| start <= e)
    }
}

/// Parse an ISO-8601 calendar date (`YYYY-MM-DD`)
pub fn parse_iso_date(value: &str) -> VegResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| VegError::InvalidDate(format!("'{}': {}", value, e)))
}

/// Numeric domain of raster pixel values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelDomain {
    /// Unsigned integer digital numbers with the given bit depth
    Integer { bit_depth: u8 },
    /// Floating point values, nominally in [0, 1]
    Float,
}

/// In-memory raster (rows x cols x channels) with its pixel domain
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    data: PixelArray,
    domain: PixelDomain,
}

impl Raster {
    pub fn new(data: PixelArray, domain: PixelDomain) -> Self {
        Self { data, domain }
    }

    /// Wrap unsigned integer pixels; full scale is taken from the element type
    pub fn from_integer_pixels<T>(pixels: &Array3<T>) -> Self
    where
        T: PrimInt + Unsigned + ToPrimitive,
    {
        let bit_depth = (std::mem::size_of::<T>() * 8) as u8;
        let data = pixels.mapv(|v| v.to_f64().unwrap_or(f64::NAN));
        Self::new(data, PixelDomain::Integer { bit_depth })
    }

    pub fn from_float(data: PixelArray) -> Self {
        Self::new(data, PixelDomain::Float)
    }

    /// Single-channel raster from a 2D array
    pub fn from_gray(band: BandArray, domain: PixelDomain) -> Self {
        Self::new(band.insert_axis(Axis(2)), domain)
    }

    pub fn data(&self) -> &PixelArray {
        &self.data
    }

    pub fn domain(&self) -> PixelDomain {
        self.domain
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Largest non-NaN pixel value, `None` for empty or all-NaN rasters
    pub fn max_value(&self) -> Option<f64> {
        self.data
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
    }

    /// Divisor that maps this raster onto [0, 1].
    ///
    /// Integer rasters always divide by their full-scale value, whatever the
    /// observed maximum. Float rasters already in [0, 1] use 1.0; float rasters
    /// carrying 8-bit values use 255 and anything larger uses the maximum.
    pub fn normalization_divisor(&self) -> f64 {
        match self.domain {
            PixelDomain::Integer { bit_depth } => {
                let bits = bit_depth.clamp(1, 63) as u32;
                ((1u64 << bits) - 1) as f64
            }
            PixelDomain::Float => match self.max_value() {
                Some(max) if max > 255.0 => max,
                Some(max) if max > 1.0 => 255.0,
                _ => 1.0,
            },
        }
    }

    pub fn is_normalized(&self) -> bool {
        self.domain == PixelDomain::Float && self.normalization_divisor() == 1.0
    }

    /// Normalized copy in the float domain; a no-op for rasters already in [0, 1]
    pub fn normalize(&self) -> Raster {
        if self.is_normalized() {
            return self.clone();
        }
        let divisor = self.normalization_divisor();
        let data = self.data.mapv(|v| (v / divisor).clamp(0.0, 1.0));
        Raster::from_float(data)
    }

    /// Copy of one channel as a 2D array
    pub fn channel(&self, index: usize) -> VegResult<BandArray> {
        if index >= self.channels() {
            return Err(VegError::MissingBand {
                band: format!("channel {}", index),
                source_name: format!("{}-channel raster", self.channels()),
            });
        }
        Ok(self.data.index_axis(Axis(2), index).to_owned())
    }
}

/// Error types for vegetation index processing
#[derive(Debug, thiserror::Error)]
pub enum VegError {
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    #[error("Unknown band name: {0}")]
    UnknownBand(String),

    #[error("Band '{band}' is not available for {source_name}")]
    MissingBand { band: String, source_name: String },

    #[error("Unsupported band source: {0}")]
    UnsupportedSource(String),

    #[error("Unsupported sensor: {0}")]
    UnsupportedSensor(String),

    #[error("Unknown sensor family: {0}")]
    UnknownSensorFamily(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid date {0}")]
    InvalidDate(String),

    #[error("Cloud percentage must be within 0-100, got {0}")]
    InvalidCloudPercent(u32),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Error loading image: {0}")]
    ImageLoad(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Unknown palette: {0}")]
    UnknownPalette(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Result type for vegetation index operations
pub type VegResult<T> = Result<T, VegError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_logical_band_parsing() {
        assert_eq!("NIR".parse::<LogicalBand>().unwrap(), LogicalBand::Nir);
        assert_eq!("rededge".parse::<LogicalBand>().unwrap(), LogicalBand::RedEdge1);
        assert_eq!("swir".parse::<LogicalBand>().unwrap(), LogicalBand::Swir1);
        assert!(matches!(
            "thermal".parse::<LogicalBand>(),
            Err(VegError::UnknownBand(name)) if name == "thermal"
        ));
    }

    #[test]
    fn test_integer_raster_always_normalized() {
        // A dark 8-bit image whose max is 1 must still be divided by 255
        let pixels = Array3::<u8>::from_elem((2, 2, 3), 1);
        let raster = Raster::from_integer_pixels(&pixels);
        let normalized = raster.normalize();

        assert_eq!(normalized.domain(), PixelDomain::Float);
        assert!((normalized.data()[[0, 0, 0]] - 1.0 / 255.0).abs() < 1e-12);
    }

    #[test]
    fn test_float_raster_normalization_is_idempotent() {
        let data = Array3::from_shape_fn((3, 3, 3), |(r, c, b)| (r + c + b) as f64 / 6.0);
        let raster = Raster::from_float(data);
        assert!(raster.is_normalized());
        assert_eq!(raster.normalize(), raster);
        assert_eq!(raster.normalize().normalize(), raster);
    }

    #[test]
    fn test_float_raster_above_one_is_rescaled() {
        let data = Array3::from_shape_fn((4, 4, 3), |(r, c, _)| (r * 60 + c * 10) as f64 - 5.0);
        let normalized = Raster::from_float(data).normalize();
        let max = normalized.max_value().unwrap();
        let min = normalized.data().iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(max <= 1.0);
        assert!(min >= 0.0);
    }

    #[test]
    fn test_sixteen_bit_full_scale() {
        let pixels = Array3::<u16>::from_elem((1, 1, 1), u16::MAX);
        let raster = Raster::from_integer_pixels(&pixels);
        assert_eq!(raster.normalization_divisor(), 65535.0);
        assert_eq!(raster.normalize().data()[[0, 0, 0]], 1.0);
    }

    #[test]
    fn test_polygon_bounds_and_intersection() {
        let aoi = Geometry::polygon(vec![[10.0, 45.0], [11.0, 45.5], [10.5, 46.0]]).unwrap();
        let bounds = aoi.bounds();
        assert_eq!(bounds, BoundingBox::new(10.0, 45.0, 11.0, 46.0));
        assert!(bounds.intersects(&BoundingBox::new(11.0, 46.0, 12.0, 47.0)));
        assert!(!bounds.intersects(&BoundingBox::new(11.1, 46.0, 12.0, 47.0)));
        assert!(Geometry::polygon(vec![[0.0, 0.0], [1.0, 1.0]]).is_err());
    }

    #[test]
    fn test_date_range_window() {
        let range = DateRange {
            start: parse_iso_date("1984-01-01").unwrap(),
            end: Some(parse_iso_date("2012-05-05").unwrap()),
        };
        assert!(range.contains(parse_iso_date("2000-06-01").unwrap()));
        assert!(!range.contains(parse_iso_date("2020-06-01").unwrap()));
        assert!(range.overlaps(
            parse_iso_date("2012-01-01").unwrap(),
            parse_iso_date("2013-01-01").unwrap()
        ));
        assert!(parse_iso_date("2024-13-01").is_err());
    }
}
