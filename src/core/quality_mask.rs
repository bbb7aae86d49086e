//! Quality-band bit decoding for cloud, shadow and low-quality pixels.

use ndarray::{Array2, Zip};
use num_traits::{PrimInt, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::core::graph::ImageHandle;
use crate::types::{BandArray, VegError, VegResult};

/// Sensor families sharing a quality-band layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFamily {
    /// 10 m optical (Sentinel-2 QA60)
    OpticalHighRes,
    /// 30 m long archive (Landsat Collection 2 QA_PIXEL)
    MidResArchive,
    /// Coarse daily/8-day composites (MODIS StateQA)
    CoarseComposite,
}

/// One test against the quality band: pixel is good when `(q & mask) == good_value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityTest {
    pub name: &'static str,
    pub mask: u32,
    pub good_value: u32,
}

impl QualityTest {
    /// Single flag bit, good when clear
    pub const fn flag(name: &'static str, bit: u32) -> Self {
        Self {
            name,
            mask: 1 << bit,
            good_value: 0,
        }
    }

    /// Multi-bit field starting at `offset`, good when equal to `good`
    pub const fn field(name: &'static str, offset: u32, width: u32, good: u32) -> Self {
        Self {
            name,
            mask: ((1 << width) - 1) << offset,
            good_value: good << offset,
        }
    }

    pub fn passes(&self, quality: u32) -> bool {
        (quality & self.mask) == self.good_value
    }
}

const OPTICAL_HIGH_RES_TESTS: &[QualityTest] = &[
    QualityTest::flag("cloud", 10),
    QualityTest::flag("cirrus", 11),
];

const MID_RES_ARCHIVE_TESTS: &[QualityTest] = &[
    QualityTest::flag("cloud_shadow", 3),
    QualityTest::flag("cloud", 4),
];

// Bits 0-1 hold the cloud state; 00 is clear
const COARSE_COMPOSITE_TESTS: &[QualityTest] = &[QualityTest::field("cloud_state", 0, 2, 0)];

impl SensorFamily {
    pub const ALL: &'static [SensorFamily] = &[
        SensorFamily::OpticalHighRes,
        SensorFamily::MidResArchive,
        SensorFamily::CoarseComposite,
    ];

    /// Identifier used by sensor profiles (`mask_decoder_id`)
    pub fn id(&self) -> &'static str {
        match self {
            SensorFamily::OpticalHighRes => "optical_high_res",
            SensorFamily::MidResArchive => "mid_res_archive",
            SensorFamily::CoarseComposite => "coarse_composite",
        }
    }

    pub fn from_id(id: &str) -> VegResult<Self> {
        SensorFamily::ALL
            .iter()
            .copied()
            .find(|family| family.id() == id)
            .ok_or_else(|| VegError::UnknownSensorFamily(id.to_string()))
    }

    pub fn quality_tests(&self) -> &'static [QualityTest] {
        match self {
            SensorFamily::OpticalHighRes => OPTICAL_HIGH_RES_TESTS,
            SensorFamily::MidResArchive => MID_RES_ARCHIVE_TESTS,
            SensorFamily::CoarseComposite => COARSE_COMPOSITE_TESTS,
        }
    }

    /// Scalar decode of a single quality value
    pub fn is_valid(&self, quality: u32) -> bool {
        self.quality_tests().iter().all(|test| test.passes(quality))
    }
}

/// Bitwise primitives a quality band must support to be decoded
pub trait QualityBits {
    type Mask;

    /// Per-pixel `(q & mask) == value`
    fn field_equals(&self, mask: u32, value: u32) -> Self::Mask;

    /// Per-pixel logical AND of two masks
    fn both(first: Self::Mask, second: Self::Mask) -> Self::Mask;
}

impl<T> QualityBits for Array2<T>
where
    T: PrimInt + ToPrimitive,
{
    type Mask = Array2<bool>;

    fn field_equals(&self, mask: u32, value: u32) -> Array2<bool> {
        // Negative quality values cannot be decoded and count as invalid
        self.mapv(|q| {
            q.to_u64()
                .map_or(false, |q| (q & u64::from(mask)) == u64::from(value))
        })
    }

    fn both(first: Array2<bool>, second: Array2<bool>) -> Array2<bool> {
        Zip::from(&first)
            .and(&second)
            .map_collect(|&a, &b| a && b)
    }
}

impl QualityBits for ImageHandle {
    type Mask = ImageHandle;

    fn field_equals(&self, mask: u32, value: u32) -> ImageHandle {
        self.bitwise_and(mask).eq_scalar(value as f64)
    }

    fn both(first: ImageHandle, second: ImageHandle) -> ImageHandle {
        first.and(&second)
    }
}

/// Valid-pixel mask for a known family
pub fn decode_family<Q: QualityBits>(quality_band: &Q, family: SensorFamily) -> Q::Mask {
    let tests = family.quality_tests();
    match tests.split_first() {
        Some((first, rest)) => rest.iter().fold(
            quality_band.field_equals(first.mask, first.good_value),
            |acc, test| Q::both(acc, quality_band.field_equals(test.mask, test.good_value)),
        ),
        // (q & 0) == 0 everywhere
        None => quality_band.field_equals(0, 0),
    }
}

/// Valid-pixel mask for a family identified by its decoder id
pub fn decode_mask<Q: QualityBits>(quality_band: &Q, sensor_family: &str) -> VegResult<Q::Mask> {
    let family = SensorFamily::from_id(sensor_family)?;
    log::debug!(
        "Decoding quality mask for {} ({} tests)",
        family.id(),
        family.quality_tests().len()
    );
    Ok(decode_family(quality_band, family))
}

/// Set pixels outside `mask` to no-data (NaN), never to zero
pub fn apply_mask(band: &BandArray, mask: &Array2<bool>) -> VegResult<BandArray> {
    if band.dim() != mask.dim() {
        return Err(VegError::ShapeMismatch {
            expected: band.dim(),
            actual: mask.dim(),
        });
    }
    Ok(Zip::from(band)
        .and(mask)
        .map_collect(|&value, &valid| if valid { value } else { f64::NAN }))
}

/// Fraction of valid pixels in a mask
pub fn valid_fraction(mask: &Array2<bool>) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|&&valid| valid).count() as f64 / mask.len() as f64
}
