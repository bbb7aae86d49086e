//! Deferred computation graphs for remote images and image collections.
//!
//! Handles describe work without doing it. Every builder method returns a new
//! handle that shares the unchanged parts of the tree, so a handle is never
//! mutated after construction. The serialized tree is what a compute service
//! receives.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::Geometry;

/// Pixel-wise binary operators understood by the compute service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    /// IEEE-754 division: 0/0 is NaN, x/0 is +/-Inf
    Divide,
    BitwiseAnd,
    /// 1 where equal, 0 otherwise
    Equals,
    /// Logical AND of two non-zero tests
    And,
}

/// Band selection by exact names or by a full-match regular expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandSelector {
    Names(Vec<String>),
    Pattern(String),
}

/// Per-pixel reducers for turning a collection into one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Median,
    Mean,
    /// Last valid pixel wins
    Mosaic,
}

/// Comparison used by metadata filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    LessThan,
    LessOrEqual,
    GreaterThan,
}

impl Comparison {
    pub fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::LessThan => lhs < rhs,
            Comparison::LessOrEqual => lhs <= rhs,
            Comparison::GreaterThan => lhs > rhs,
        }
    }
}

/// Image-valued graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ImageExpr {
    /// The image currently visited by a collection `map`
    Element,
    Constant {
        value: f64,
    },
    Composite {
        collection: Arc<CollectionExpr>,
        reducer: Reducer,
    },
    Select {
        input: Arc<ImageExpr>,
        bands: BandSelector,
    },
    Binary {
        op: BinaryOp,
        left: Arc<ImageExpr>,
        right: Arc<ImageExpr>,
    },
    Clamp {
        input: Arc<ImageExpr>,
        low: f64,
        high: f64,
    },
    /// Pixels where `mask` is zero become no-data
    UpdateMask {
        input: Arc<ImageExpr>,
        mask: Arc<ImageExpr>,
    },
    AddBands {
        input: Arc<ImageExpr>,
        bands: Arc<ImageExpr>,
        overwrite: bool,
    },
    Rename {
        input: Arc<ImageExpr>,
        names: Vec<String>,
    },
}

/// Collection-valued graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum CollectionExpr {
    Load {
        id: String,
    },
    Merge {
        first: Arc<CollectionExpr>,
        second: Arc<CollectionExpr>,
    },
    /// Closed interval: both `start` and `end` days are kept
    FilterDate {
        input: Arc<CollectionExpr>,
        start: NaiveDate,
        end: NaiveDate,
    },
    FilterBounds {
        input: Arc<CollectionExpr>,
        geometry: Geometry,
    },
    FilterMetadata {
        input: Arc<CollectionExpr>,
        property: String,
        comparison: Comparison,
        value: f64,
    },
    Map {
        input: Arc<CollectionExpr>,
        function: Arc<ImageExpr>,
    },
}

impl ImageExpr {
    /// Number of nodes reachable from this one (shared subtrees counted per use)
    pub fn node_count(&self) -> usize {
        1 + match self {
            ImageExpr::Element | ImageExpr::Constant { .. } => 0,
            ImageExpr::Composite { collection, .. } => collection.node_count(),
            ImageExpr::Select { input, .. }
            | ImageExpr::Clamp { input, .. }
            | ImageExpr::Rename { input, .. } => input.node_count(),
            ImageExpr::Binary { left, right, .. } => left.node_count() + right.node_count(),
            ImageExpr::UpdateMask { input, mask } => input.node_count() + mask.node_count(),
            ImageExpr::AddBands { input, bands, .. } => input.node_count() + bands.node_count(),
        }
    }
}

impl CollectionExpr {
    pub fn node_count(&self) -> usize {
        1 + match self {
            CollectionExpr::Load { .. } => 0,
            CollectionExpr::Merge { first, second } => first.node_count() + second.node_count(),
            CollectionExpr::FilterDate { input, .. }
            | CollectionExpr::FilterBounds { input, .. }
            | CollectionExpr::FilterMetadata { input, .. } => input.node_count(),
            CollectionExpr::Map { input, function } => input.node_count() + function.node_count(),
        }
    }
}

/// Immutable handle to a not-yet-evaluated remote image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle {
    expr: Arc<ImageExpr>,
}

impl ImageHandle {
    fn wrap(expr: ImageExpr) -> Self {
        Self { expr: Arc::new(expr) }
    }

    /// Placeholder for the image visited inside `CollectionHandle::map`
    pub fn element() -> Self {
        Self::wrap(ImageExpr::Element)
    }

    pub fn constant(value: f64) -> Self {
        Self::wrap(ImageExpr::Constant { value })
    }

    pub fn expr(&self) -> &ImageExpr {
        &self.expr
    }

    pub fn select<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> Self {
        Self::wrap(ImageExpr::Select {
            input: Arc::clone(&self.expr),
            bands: BandSelector::Names(names.into_iter().map(Into::into).collect()),
        })
    }

    pub fn select_band(&self, name: &str) -> Self {
        self.select([name])
    }

    /// Select every band whose full name matches `pattern`
    pub fn select_pattern(&self, pattern: &str) -> Self {
        Self::wrap(ImageExpr::Select {
            input: Arc::clone(&self.expr),
            bands: BandSelector::Pattern(pattern.to_string()),
        })
    }

    fn binary(&self, op: BinaryOp, other: &ImageHandle) -> Self {
        Self::wrap(ImageExpr::Binary {
            op,
            left: Arc::clone(&self.expr),
            right: Arc::clone(&other.expr),
        })
    }

    pub fn add(&self, other: &ImageHandle) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    pub fn subtract(&self, other: &ImageHandle) -> Self {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn multiply(&self, other: &ImageHandle) -> Self {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn divide(&self, other: &ImageHandle) -> Self {
        self.binary(BinaryOp::Divide, other)
    }

    pub fn add_scalar(&self, value: f64) -> Self {
        self.binary(BinaryOp::Add, &Self::constant(value))
    }

    pub fn multiply_scalar(&self, value: f64) -> Self {
        self.binary(BinaryOp::Multiply, &Self::constant(value))
    }

    pub fn bitwise_and(&self, bits: u32) -> Self {
        self.binary(BinaryOp::BitwiseAnd, &Self::constant(bits as f64))
    }

    pub fn eq_scalar(&self, value: f64) -> Self {
        self.binary(BinaryOp::Equals, &Self::constant(value))
    }

    pub fn and(&self, other: &ImageHandle) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn clamp(&self, low: f64, high: f64) -> Self {
        Self::wrap(ImageExpr::Clamp {
            input: Arc::clone(&self.expr),
            low,
            high,
        })
    }

    pub fn update_mask(&self, mask: &ImageHandle) -> Self {
        Self::wrap(ImageExpr::UpdateMask {
            input: Arc::clone(&self.expr),
            mask: Arc::clone(&mask.expr),
        })
    }

    /// Append `bands`; with `overwrite`, same-named bands are replaced
    pub fn add_bands(&self, bands: &ImageHandle, overwrite: bool) -> Self {
        Self::wrap(ImageExpr::AddBands {
            input: Arc::clone(&self.expr),
            bands: Arc::clone(&bands.expr),
            overwrite,
        })
    }

    pub fn rename<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> Self {
        Self::wrap(ImageExpr::Rename {
            input: Arc::clone(&self.expr),
            names: names.into_iter().map(Into::into).collect(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Immutable handle to a not-yet-evaluated remote image collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionHandle {
    expr: Arc<CollectionExpr>,
}

impl CollectionHandle {
    fn wrap(expr: CollectionExpr) -> Self {
        Self { expr: Arc::new(expr) }
    }

    pub fn load(id: &str) -> Self {
        Self::wrap(CollectionExpr::Load { id: id.to_string() })
    }

    pub fn expr(&self) -> &CollectionExpr {
        &self.expr
    }

    pub fn merge(&self, other: &CollectionHandle) -> Self {
        Self::wrap(CollectionExpr::Merge {
            first: Arc::clone(&self.expr),
            second: Arc::clone(&other.expr),
        })
    }

    pub fn filter_date(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self::wrap(CollectionExpr::FilterDate {
            input: Arc::clone(&self.expr),
            start,
            end,
        })
    }

    pub fn filter_bounds(&self, geometry: &Geometry) -> Self {
        Self::wrap(CollectionExpr::FilterBounds {
            input: Arc::clone(&self.expr),
            geometry: geometry.clone(),
        })
    }

    pub fn filter_metadata(&self, property: &str, comparison: Comparison, value: f64) -> Self {
        Self::wrap(CollectionExpr::FilterMetadata {
            input: Arc::clone(&self.expr),
            property: property.to_string(),
            comparison,
            value,
        })
    }

    /// Apply a per-image function. The closure receives `ImageHandle::element()`
    /// and returns the graph describing the transformed image.
    pub fn map<F>(&self, function: F) -> Self
    where
        F: FnOnce(ImageHandle) -> ImageHandle,
    {
        let body = function(ImageHandle::element());
        Self::wrap(CollectionExpr::Map {
            input: Arc::clone(&self.expr),
            function: body.expr,
        })
    }

    pub fn reduce(&self, reducer: Reducer) -> ImageHandle {
        ImageHandle::wrap(ImageExpr::Composite {
            collection: Arc::clone(&self.expr),
            reducer,
        })
    }

    pub fn median(&self) -> ImageHandle {
        self.reduce(Reducer::Median)
    }

    pub fn mean(&self) -> ImageHandle {
        self.reduce(Reducer::Mean)
    }

    pub fn mosaic(&self) -> ImageHandle {
        self.reduce(Reducer::Mosaic)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
