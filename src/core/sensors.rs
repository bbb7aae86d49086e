//! Sensor registry: band tables, archive windows, quality decoders and
//! radiometric scale corrections for each supported satellite sensor.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::quality_mask::SensorFamily;
use crate::types::{DateRange, LogicalBand, VegError, VegResult};

/// Bands every profile must map
pub const REQUIRED_BANDS: [LogicalBand; 3] = [LogicalBand::Red, LogicalBand::Green, LogicalBand::Blue];

/// Static configuration for one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    pub name: String,
    pub description: String,
    /// Sibling collections merged into one logical collection, in order
    pub collections: Vec<String>,
    pub band_table: BTreeMap<LogicalBand, String>,
    pub native_resolution_m: f64,
    pub valid_dates: DateRange,
    pub quality_band: String,
    pub mask_decoder_id: String,
    /// Collection-level cloud cover property, if the sensor publishes one
    pub cloud_property: Option<String>,
    pub scale_correction_id: String,
}

impl SensorProfile {
    pub fn physical_band(&self, band: LogicalBand) -> Option<&str> {
        self.band_table.get(&band).map(String::as_str)
    }

    pub fn supports(&self, band: LogicalBand) -> bool {
        self.band_table.contains_key(&band)
    }

    pub fn supports_all(&self, bands: &[LogicalBand]) -> bool {
        bands.iter().all(|band| self.supports(*band))
    }

    pub fn sensor_family(&self) -> VegResult<SensorFamily> {
        SensorFamily::from_id(&self.mask_decoder_id)
    }
}

/// Linear conversion applied to every band whose name fully matches `band_pattern`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleRule {
    pub band_pattern: String,
    pub scale: f64,
    pub offset: f64,
}

/// Named set of scale rules, referenced by `SensorProfile::scale_correction_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleCorrection {
    pub id: String,
    pub rules: Vec<ScaleRule>,
}

impl ScaleCorrection {
    /// Apply the matching rule to a single digital number
    pub fn apply(&self, band_name: &str, value: f64) -> VegResult<f64> {
        for rule in &self.rules {
            if full_match(&rule.band_pattern)?.is_match(band_name) {
                return Ok(value * rule.scale + rule.offset);
            }
        }
        Ok(value)
    }
}

fn full_match(pattern: &str) -> VegResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| VegError::InvalidConfig(format!("bad band pattern '{}': {}", pattern, e)))
}

/// Serialized form of a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryConfig {
    scale_corrections: Vec<ScaleCorrection>,
    sensors: Vec<SensorProfile>,
}

/// Immutable lookup table of sensor profiles, built once and shared by reference
#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    profiles: BTreeMap<String, SensorProfile>,
    corrections: BTreeMap<String, ScaleCorrection>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in Sentinel-2, Landsat 8/9, Landsat 5/7 and MODIS profiles
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for correction in standard_corrections() {
            registry.corrections.insert(correction.id.clone(), correction);
        }
        for profile in standard_profiles() {
            registry.profiles.insert(profile.name.clone(), profile);
        }
        log::debug!("Built standard sensor registry with {} sensors", registry.profiles.len());
        registry
    }

    /// Load and validate a registry from JSON
    pub fn from_json(json: &str) -> VegResult<Self> {
        let config: RegistryConfig = serde_json::from_str(json)
            .map_err(|e| VegError::InvalidConfig(format!("sensor registry: {}", e)))?;

        let mut registry = Self::new();
        for correction in config.scale_corrections {
            registry.register_correction(correction)?;
        }
        for profile in config.sensors {
            registry.register(profile)?;
        }
        log::info!("Loaded sensor registry with {} sensors", registry.profiles.len());
        Ok(registry)
    }

    pub fn to_json(&self) -> VegResult<String> {
        let config = RegistryConfig {
            scale_corrections: self.corrections.values().cloned().collect(),
            sensors: self.profiles.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&config)
            .map_err(|e| VegError::InvalidConfig(format!("sensor registry: {}", e)))
    }

    pub fn register_correction(&mut self, correction: ScaleCorrection) -> VegResult<()> {
        for rule in &correction.rules {
            full_match(&rule.band_pattern)?;
            if !rule.scale.is_finite() || !rule.offset.is_finite() {
                return Err(VegError::InvalidConfig(format!(
                    "scale correction '{}' has a non-finite coefficient",
                    correction.id
                )));
            }
        }
        self.corrections.insert(correction.id.clone(), correction);
        Ok(())
    }

    /// Add a profile after checking it against the registry's invariants
    pub fn register(&mut self, profile: SensorProfile) -> VegResult<()> {
        if let Some(missing) = REQUIRED_BANDS.iter().find(|band| !profile.supports(**band)) {
            return Err(VegError::InvalidConfig(format!(
                "sensor '{}' does not map required band '{}'",
                profile.name, missing
            )));
        }
        if profile.collections.is_empty() {
            return Err(VegError::InvalidConfig(format!(
                "sensor '{}' has no base collection",
                profile.name
            )));
        }
        if let Some(end) = profile.valid_dates.end {
            if end < profile.valid_dates.start {
                return Err(VegError::InvalidConfig(format!(
                    "sensor '{}' archive ends before it starts",
                    profile.name
                )));
            }
        }
        profile.sensor_family()?;
        if !self.corrections.contains_key(&profile.scale_correction_id) {
            return Err(VegError::InvalidConfig(format!(
                "sensor '{}' references unknown scale correction '{}'",
                profile.name, profile.scale_correction_id
            )));
        }
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> VegResult<&SensorProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| VegError::UnsupportedSensor(name.to_string()))
    }

    pub fn scale_correction(&self, id: &str) -> VegResult<&ScaleCorrection> {
        self.corrections
            .get(id)
            .ok_or_else(|| VegError::InvalidConfig(format!("unknown scale correction '{}'", id)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &SensorProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn band_table(entries: &[(LogicalBand, &str)]) -> BTreeMap<LogicalBand, String> {
    entries
        .iter()
        .map(|(band, physical)| (*band, physical.to_string()))
        .collect()
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    // Only called with literal calendar dates below
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn standard_corrections() -> Vec<ScaleCorrection> {
    vec![
        ScaleCorrection {
            id: "sentinel2_toa".to_string(),
            rules: vec![ScaleRule {
                band_pattern: "B.*".to_string(),
                scale: 0.0001,
                offset: 0.0,
            }],
        },
        ScaleCorrection {
            id: "landsat_c2_l2".to_string(),
            rules: vec![
                ScaleRule {
                    band_pattern: "SR_B.".to_string(),
                    scale: 0.0000275,
                    offset: -0.2,
                },
                ScaleRule {
                    band_pattern: "ST_B.*".to_string(),
                    scale: 0.00341802,
                    offset: 149.0,
                },
            ],
        },
        ScaleCorrection {
            id: "modis_sr".to_string(),
            rules: vec![ScaleRule {
                band_pattern: "sur_refl_b.*".to_string(),
                scale: 0.0001,
                offset: 0.0,
            }],
        },
    ]
}

fn standard_profiles() -> Vec<SensorProfile> {
    use LogicalBand::*;

    let landsat_archive_bands_57 = band_table(&[
        (Blue, "SR_B1"),
        (Green, "SR_B2"),
        (Red, "SR_B3"),
        (Nir, "SR_B4"),
        (Swir1, "SR_B5"),
        (Swir2, "SR_B7"),
    ]);

    vec![
        SensorProfile {
            name: "Sentinel-2".to_string(),
            description: "Best for recent data with high resolution and red edge bands".to_string(),
            collections: vec!["COPERNICUS/S2_HARMONIZED".to_string()],
            band_table: band_table(&[
                (Blue, "B2"),
                (Green, "B3"),
                (Red, "B4"),
                (RedEdge1, "B5"),
                (RedEdge2, "B6"),
                (RedEdge3, "B7"),
                (Nir, "B8"),
                (NirNarrow, "B8A"),
                (Swir1, "B11"),
                (Swir2, "B12"),
            ]),
            native_resolution_m: 10.0,
            valid_dates: DateRange {
                start: ymd(2015, 6, 23),
                end: None,
            },
            quality_band: "QA60".to_string(),
            mask_decoder_id: SensorFamily::OpticalHighRes.id().to_string(),
            cloud_property: Some("CLOUDY_PIXEL_PERCENTAGE".to_string()),
            scale_correction_id: "sentinel2_toa".to_string(),
        },
        SensorProfile {
            name: "Landsat 8/9".to_string(),
            description: "Good for recent data, lower resolution but consistent".to_string(),
            collections: vec![
                "LANDSAT/LC08/C02/T1_L2".to_string(),
                "LANDSAT/LC09/C02/T1_L2".to_string(),
            ],
            band_table: band_table(&[
                (Blue, "SR_B2"),
                (Green, "SR_B3"),
                (Red, "SR_B4"),
                (Nir, "SR_B5"),
                (Swir1, "SR_B6"),
                (Swir2, "SR_B7"),
            ]),
            native_resolution_m: 30.0,
            valid_dates: DateRange {
                start: ymd(2013, 4, 11),
                end: None,
            },
            quality_band: "QA_PIXEL".to_string(),
            mask_decoder_id: SensorFamily::MidResArchive.id().to_string(),
            cloud_property: Some("CLOUD_COVER".to_string()),
            scale_correction_id: "landsat_c2_l2".to_string(),
        },
        SensorProfile {
            name: "Landsat 5/7".to_string(),
            description: "Historical data for long-term change analysis".to_string(),
            collections: vec![
                "LANDSAT/LT05/C02/T1_L2".to_string(),
                "LANDSAT/LE07/C02/T1_L2".to_string(),
            ],
            band_table: landsat_archive_bands_57,
            native_resolution_m: 30.0,
            valid_dates: DateRange {
                start: ymd(1984, 1, 1),
                end: Some(ymd(2012, 5, 5)),
            },
            quality_band: "QA_PIXEL".to_string(),
            mask_decoder_id: SensorFamily::MidResArchive.id().to_string(),
            cloud_property: Some("CLOUD_COVER".to_string()),
            scale_correction_id: "landsat_c2_l2".to_string(),
        },
        SensorProfile {
            name: "MODIS".to_string(),
            description: "Daily global coverage, coarser resolution, 8-day composites".to_string(),
            collections: vec!["MODIS/061/MOD09A1".to_string()],
            band_table: band_table(&[
                (Red, "sur_refl_b01"),
                (Nir, "sur_refl_b02"),
                (Blue, "sur_refl_b03"),
                (Green, "sur_refl_b04"),
                (Swir1, "sur_refl_b06"),
                (Swir2, "sur_refl_b07"),
            ]),
            native_resolution_m: 250.0,
            valid_dates: DateRange {
                start: ymd(2000, 2, 24),
                end: None,
            },
            quality_band: "StateQA".to_string(),
            mask_decoder_id: SensorFamily::CoarseComposite.id().to_string(),
            cloud_property: None,
            scale_correction_id: "modis_sr".to_string(),
        },
    ]
}
