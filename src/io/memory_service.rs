//! In-process compute service evaluating graphs over registered scenes.
//!
//! This exists for offline use and testing. It is not the production
//! execution path; real graphs go to a remote [`ComputeService`].
//!
//! Arithmetic follows IEEE-754 exactly as a remote service would: a zero
//! denominator gives NaN or Inf and the pixel stays unmasked. Masks combine
//! with logical AND through every pixel-wise operation.

use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::graph::{
    BandSelector, BinaryOp, CollectionExpr, CollectionHandle, ImageExpr, ImageHandle, Reducer,
};
use crate::io::service::{ComputeService, ComputedBand, ComputedImage, ServiceError};
use crate::types::{BandArray, BoundingBox};

/// One stored image with its acquisition metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub date: NaiveDate,
    pub footprint: BoundingBox,
    pub properties: BTreeMap<String, f64>,
    pub bands: Vec<(String, BandArray)>,
}

impl Scene {
    pub fn new(id: &str, date: NaiveDate, footprint: BoundingBox) -> Self {
        Self {
            id: id.to_string(),
            date,
            footprint,
            properties: BTreeMap::new(),
            bands: Vec::new(),
        }
    }

    pub fn with_band(mut self, name: &str, values: BandArray) -> Self {
        self.bands.push((name.to_string(), values));
        self
    }

    pub fn with_property(mut self, name: &str, value: f64) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }
}

#[derive(Debug)]
struct SceneMeta {
    date: NaiveDate,
    footprint: BoundingBox,
    properties: BTreeMap<String, f64>,
}

/// Evaluated image; metadata survives per-image operations
#[derive(Debug, Clone)]
struct Image {
    bands: Vec<ComputedBand>,
    meta: Option<Arc<SceneMeta>>,
}

impl Image {
    fn from_scene(scene: &Scene) -> Self {
        let bands = scene
            .bands
            .iter()
            .map(|(name, values)| ComputedBand {
                name: name.clone(),
                values: values.clone(),
                mask: values.mapv(|v| !v.is_nan()),
            })
            .collect();
        Self {
            bands,
            meta: Some(Arc::new(SceneMeta {
                date: scene.date,
                footprint: scene.footprint,
                properties: scene.properties.clone(),
            })),
        }
    }

    fn with_bands(&self, bands: Vec<ComputedBand>) -> Self {
        Self {
            bands,
            meta: self.meta.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Constant(f64),
    Image(Image),
}

fn apply_op(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::BitwiseAnd => {
            if a.is_finite() && b.is_finite() && a >= 0.0 && b >= 0.0 {
                ((a as u64) & (b as u64)) as f64
            } else {
                f64::NAN
            }
        }
        BinaryOp::Equals => f64::from(u8::from(a == b)),
        BinaryOp::And => f64::from(u8::from(is_true(a) && is_true(b))),
    }
}

fn is_true(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn check_shape(a: &ComputedBand, b: &ComputedBand) -> Result<(), ServiceError> {
    if a.values.dim() != b.values.dim() {
        return Err(ServiceError::Evaluation(format!(
            "bands '{}' {:?} and '{}' {:?} differ in shape",
            a.name,
            a.values.dim(),
            b.name,
            b.values.dim()
        )));
    }
    Ok(())
}

fn band_with_scalar(op: BinaryOp, band: &ComputedBand, scalar: f64, scalar_first: bool) -> ComputedBand {
    let values = band.values.mapv(|v| {
        if scalar_first {
            apply_op(op, scalar, v)
        } else {
            apply_op(op, v, scalar)
        }
    });
    ComputedBand {
        name: band.name.clone(),
        values,
        mask: band.mask.clone(),
    }
}

fn band_pair(
    op: BinaryOp,
    left: &ComputedBand,
    right: &ComputedBand,
    name: &str,
) -> Result<ComputedBand, ServiceError> {
    check_shape(left, right)?;
    Ok(ComputedBand {
        name: name.to_string(),
        values: Zip::from(&left.values)
            .and(&right.values)
            .map_collect(|&a, &b| apply_op(op, a, b)),
        mask: Zip::from(&left.mask)
            .and(&right.mask)
            .map_collect(|&a, &b| a && b),
    })
}

/// Band pairing: equal counts pair up, a single band broadcasts
fn pair_indices(left: usize, right: usize) -> Result<Vec<(usize, usize)>, ServiceError> {
    match (left, right) {
        (n, m) if n == m => Ok((0..n).map(|i| (i, i)).collect()),
        (1, m) => Ok((0..m).map(|i| (0, i)).collect()),
        (n, 1) => Ok((0..n).map(|i| (i, 0)).collect()),
        (n, m) => Err(ServiceError::Evaluation(format!(
            "cannot combine images with {} and {} bands",
            n, m
        ))),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ServiceError> {
    match (left, right) {
        (Value::Constant(a), Value::Constant(b)) => Ok(Value::Constant(apply_op(op, a, b))),
        (Value::Image(image), Value::Constant(b)) => {
            let bands = image
                .bands
                .iter()
                .map(|band| band_with_scalar(op, band, b, false))
                .collect();
            Ok(Value::Image(image.with_bands(bands)))
        }
        (Value::Constant(a), Value::Image(image)) => {
            let bands = image
                .bands
                .iter()
                .map(|band| band_with_scalar(op, band, a, true))
                .collect();
            Ok(Value::Image(image.with_bands(bands)))
        }
        (Value::Image(left), Value::Image(right)) => {
            let names_from_right = left.bands.len() == 1 && right.bands.len() > 1;
            let bands = pair_indices(left.bands.len(), right.bands.len())?
                .into_iter()
                .map(|(l, r)| {
                    let name = if names_from_right {
                        &right.bands[r].name
                    } else {
                        &left.bands[l].name
                    };
                    band_pair(op, &left.bands[l], &right.bands[r], name)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let meta = left.meta.clone().or_else(|| right.meta.clone());
            Ok(Value::Image(Image { bands, meta }))
        }
    }
}

fn full_match(pattern: &str) -> Result<Regex, ServiceError> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| ServiceError::Evaluation(format!("bad band pattern '{}': {}", pattern, e)))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn reduce_pixels(reducer: Reducer, values: &mut [f64]) -> f64 {
    match reducer {
        Reducer::Median => median(values),
        Reducer::Mean => values.iter().sum::<f64>() / values.len() as f64,
        Reducer::Mosaic => values.last().copied().unwrap_or(f64::NAN),
    }
}

fn composite(images: &[Image], reducer: Reducer) -> Result<Image, ServiceError> {
    if images.is_empty() {
        return Err(ServiceError::Evaluation(
            "cannot composite an empty collection".to_string(),
        ));
    }

    let mut names: Vec<&str> = Vec::new();
    for band in images.iter().flat_map(|image| image.bands.iter()) {
        if !names.contains(&band.name.as_str()) {
            names.push(&band.name);
        }
    }

    let mut bands = Vec::with_capacity(names.len());
    for name in names {
        let layers: Vec<&ComputedBand> = images
            .iter()
            .filter_map(|image| image.bands.iter().find(|band| band.name == name))
            .collect();
        let dim = layers[0].values.dim();
        for layer in &layers[1..] {
            check_shape(layers[0], layer)?;
        }

        let mut values = Array2::<f64>::from_elem(dim, f64::NAN);
        let mut mask = Array2::<bool>::from_elem(dim, false);
        let mut stack = Vec::with_capacity(layers.len());
        for ((row, col), out) in values.indexed_iter_mut() {
            stack.clear();
            stack.extend(layers.iter().filter_map(|layer| {
                let v = layer.values[[row, col]];
                (layer.mask[[row, col]] && !v.is_nan()).then_some(v)
            }));
            if !stack.is_empty() {
                *out = reduce_pixels(reducer, &mut stack);
                mask[[row, col]] = true;
            }
        }
        bands.push(ComputedBand {
            name: name.to_string(),
            values,
            mask,
        });
    }

    Ok(Image { bands, meta: None })
}

/// Compute service backed by in-memory scenes
#[derive(Debug, Clone, Default)]
pub struct InMemoryService {
    collections: BTreeMap<String, Vec<Scene>>,
}

impl InMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, id: &str, scenes: Vec<Scene>) -> Self {
        self.insert_collection(id, scenes);
        self
    }

    pub fn insert_collection(&mut self, id: &str, scenes: Vec<Scene>) {
        log::debug!("Registering collection {} with {} scenes", id, scenes.len());
        self.collections.insert(id.to_string(), scenes);
    }

    fn eval_image(&self, expr: &ImageExpr, element: Option<&Image>) -> Result<Value, ServiceError> {
        match expr {
            ImageExpr::Element => element.cloned().map(Value::Image).ok_or_else(|| {
                ServiceError::Evaluation("element placeholder used outside a map".to_string())
            }),
            ImageExpr::Constant { value } => Ok(Value::Constant(*value)),
            ImageExpr::Composite {
                collection,
                reducer,
            } => {
                let images = self.eval_collection(collection)?;
                Ok(Value::Image(composite(&images, *reducer)?))
            }
            ImageExpr::Select { input, bands } => {
                let image = self.eval_image_only(input, element)?;
                let selected = match bands {
                    BandSelector::Names(names) => names
                        .iter()
                        .map(|name| {
                            image
                                .bands
                                .iter()
                                .find(|band| &band.name == name)
                                .cloned()
                                .ok_or_else(|| ServiceError::BandNotFound(name.clone()))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    BandSelector::Pattern(pattern) => {
                        let regex = full_match(pattern)?;
                        image
                            .bands
                            .iter()
                            .filter(|band| regex.is_match(&band.name))
                            .cloned()
                            .collect()
                    }
                };
                Ok(Value::Image(image.with_bands(selected)))
            }
            ImageExpr::Binary { op, left, right } => {
                let left = self.eval_image(left, element)?;
                let right = self.eval_image(right, element)?;
                binary(*op, left, right)
            }
            ImageExpr::Clamp { input, low, high } => match self.eval_image(input, element)? {
                Value::Constant(v) => Ok(Value::Constant(v.clamp(*low, *high))),
                Value::Image(image) => {
                    let bands = image
                        .bands
                        .iter()
                        .map(|band| ComputedBand {
                            name: band.name.clone(),
                            values: band.values.mapv(|v| v.clamp(*low, *high)),
                            mask: band.mask.clone(),
                        })
                        .collect();
                    Ok(Value::Image(image.with_bands(bands)))
                }
            },
            ImageExpr::UpdateMask { input, mask } => {
                let image = self.eval_image_only(input, element)?;
                let bands = match self.eval_image(mask, element)? {
                    Value::Constant(c) => image
                        .bands
                        .iter()
                        .map(|band| ComputedBand {
                            name: band.name.clone(),
                            values: band.values.clone(),
                            mask: band.mask.mapv(|valid| valid && is_true(c)),
                        })
                        .collect(),
                    Value::Image(mask_image) => {
                        if mask_image.bands.len() != 1 && mask_image.bands.len() != image.bands.len() {
                            return Err(ServiceError::Evaluation(format!(
                                "mask has {} bands, image has {}",
                                mask_image.bands.len(),
                                image.bands.len()
                            )));
                        }
                        image
                            .bands
                            .iter()
                            .enumerate()
                            .map(|(i, band)| -> Result<ComputedBand, ServiceError> {
                                let m = &mask_image.bands[if mask_image.bands.len() == 1 { 0 } else { i }];
                                check_shape(band, m)?;
                                let mask = Zip::from(&band.mask)
                                    .and(&m.mask)
                                    .and(&m.values)
                                    .map_collect(|&valid, &m_valid, &m_value| {
                                        valid && m_valid && is_true(m_value)
                                    });
                                Ok(ComputedBand {
                                    name: band.name.clone(),
                                    values: band.values.clone(),
                                    mask,
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?
                    }
                };
                Ok(Value::Image(image.with_bands(bands)))
            }
            ImageExpr::AddBands {
                input,
                bands,
                overwrite,
            } => {
                let image = self.eval_image_only(input, element)?;
                let extra = self.eval_image_only(bands, element)?;
                let mut merged = image.bands.clone();
                for band in extra.bands {
                    match merged.iter_mut().find(|existing| existing.name == band.name) {
                        Some(existing) if *overwrite => *existing = band,
                        Some(_) => {
                            return Err(ServiceError::Evaluation(format!(
                                "duplicate band name '{}'",
                                band.name
                            )))
                        }
                        None => merged.push(band),
                    }
                }
                Ok(Value::Image(image.with_bands(merged)))
            }
            ImageExpr::Rename { input, names } => {
                let image = self.eval_image_only(input, element)?;
                if names.len() != image.bands.len() {
                    return Err(ServiceError::Evaluation(format!(
                        "cannot rename {} bands to {:?}",
                        image.bands.len(),
                        names
                    )));
                }
                let bands = image
                    .bands
                    .iter()
                    .zip(names)
                    .map(|(band, name)| ComputedBand {
                        name: name.clone(),
                        values: band.values.clone(),
                        mask: band.mask.clone(),
                    })
                    .collect();
                Ok(Value::Image(image.with_bands(bands)))
            }
        }
    }

    fn eval_image_only(&self, expr: &ImageExpr, element: Option<&Image>) -> Result<Image, ServiceError> {
        match self.eval_image(expr, element)? {
            Value::Image(image) => Ok(image),
            Value::Constant(value) => Err(ServiceError::Evaluation(format!(
                "expected an image, got constant {}",
                value
            ))),
        }
    }

    fn eval_collection(&self, expr: &CollectionExpr) -> Result<Vec<Image>, ServiceError> {
        match expr {
            CollectionExpr::Load { id } => {
                let scenes = self
                    .collections
                    .get(id)
                    .ok_or_else(|| ServiceError::NotFound(id.clone()))?;
                Ok(scenes.iter().map(Image::from_scene).collect())
            }
            CollectionExpr::Merge { first, second } => {
                let mut images = self.eval_collection(first)?;
                images.extend(self.eval_collection(second)?);
                Ok(images)
            }
            CollectionExpr::FilterDate { input, start, end } => {
                let images = self.eval_collection(input)?;
                Ok(retain_meta(images, |meta| meta.date >= *start && meta.date <= *end))
            }
            CollectionExpr::FilterBounds { input, geometry } => {
                let bounds = geometry.bounds();
                let images = self.eval_collection(input)?;
                Ok(retain_meta(images, |meta| meta.footprint.intersects(&bounds)))
            }
            CollectionExpr::FilterMetadata {
                input,
                property,
                comparison,
                value,
            } => {
                let images = self.eval_collection(input)?;
                Ok(retain_meta(images, |meta| {
                    meta.properties
                        .get(property)
                        .map_or(false, |actual| comparison.holds(*actual, *value))
                }))
            }
            CollectionExpr::Map { input, function } => {
                let images = self.eval_collection(input)?;
                log::debug!("Mapping function over {} images", images.len());
                self.map_images(&images, function)
            }
        }
    }

    fn map_one(&self, image: &Image, function: &ImageExpr) -> Result<Image, ServiceError> {
        let mut mapped = self.eval_image_only(function, Some(image))?;
        mapped.meta = image.meta.clone();
        Ok(mapped)
    }

    fn map_images(&self, images: &[Image], function: &ImageExpr) -> Result<Vec<Image>, ServiceError> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            images
                .par_iter()
                .map(|image| self.map_one(image, function))
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            images
                .iter()
                .map(|image| self.map_one(image, function))
                .collect()
        }
    }
}

/// Keep images whose metadata passes `keep`; images without metadata are dropped
fn retain_meta<F>(images: Vec<Image>, keep: F) -> Vec<Image>
where
    F: Fn(&SceneMeta) -> bool,
{
    images
        .into_iter()
        .filter(|image| image.meta.as_deref().map_or(false, &keep))
        .collect()
}

impl ComputeService for InMemoryService {
    fn compute_image(&self, image: &ImageHandle) -> Result<ComputedImage, ServiceError> {
        let evaluated = self.eval_image_only(image.expr(), None)?;
        log::debug!("Computed image with {} bands", evaluated.bands.len());
        Ok(ComputedImage {
            bands: evaluated.bands,
        })
    }

    fn collection_size(&self, collection: &CollectionHandle) -> Result<usize, ServiceError> {
        Ok(self.eval_collection(collection.expr())?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Comparison;
    use crate::types::Geometry;
    use ndarray::array;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn service() -> InMemoryService {
        let footprint = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        InMemoryService::new().with_collection(
            "TEST/COLLECTION",
            vec![
                Scene::new("a", date("2024-01-01"), footprint)
                    .with_band("B1", array![[1.0, 2.0]])
                    .with_band("B2", array![[0.0, 4.0]])
                    .with_property("CLOUD", 10.0),
                Scene::new("b", date("2024-02-01"), footprint)
                    .with_band("B1", array![[3.0, 6.0]])
                    .with_band("B2", array![[0.0, 8.0]])
                    .with_property("CLOUD", 50.0),
                Scene::new("c", date("2024-03-01"), BoundingBox::new(5.0, 5.0, 6.0, 6.0))
                    .with_band("B1", array![[5.0, 10.0]])
                    .with_band("B2", array![[1.0, 1.0]])
                    .with_property("CLOUD", 0.0),
            ],
        )
    }

    #[test]
    fn test_filters() {
        let service = service();
        let base = CollectionHandle::load("TEST/COLLECTION");

        assert_eq!(service.collection_size(&base).unwrap(), 3);
        // Closed interval keeps both ends
        let dated = base.filter_date(date("2024-01-01"), date("2024-02-01"));
        assert_eq!(service.collection_size(&dated).unwrap(), 2);

        let aoi = Geometry::rectangle(0.5, 0.5, 2.0, 2.0).unwrap();
        assert_eq!(service.collection_size(&base.filter_bounds(&aoi)).unwrap(), 2);

        let clear = base.filter_metadata("CLOUD", Comparison::LessThan, 10.0);
        assert_eq!(service.collection_size(&clear).unwrap(), 1);
        let missing = base.filter_metadata("SUN_ELEVATION", Comparison::LessThan, 90.0);
        assert_eq!(service.collection_size(&missing).unwrap(), 0);
    }

    #[test]
    fn test_unknown_collection() {
        let err = service()
            .collection_size(&CollectionHandle::load("NOPE"))
            .unwrap_err();
        assert_eq!(err, ServiceError::NotFound("NOPE".to_string()));
    }

    #[test]
    fn test_ieee_division_and_reducers() {
        let service = service();
        let first_two = CollectionHandle::load("TEST/COLLECTION")
            .filter_date(date("2024-01-01"), date("2024-02-01"));

        let median = service.compute_image(&first_two.median()).unwrap();
        assert_eq!(median.band("B1").unwrap().values, array![[2.0, 4.0]]);

        let mosaic = service.compute_image(&first_two.mosaic()).unwrap();
        assert_eq!(mosaic.band("B1").unwrap().values, array![[3.0, 6.0]]);

        let composite = first_two.mean();
        let ratio = composite.select_band("B1").divide(&composite.select_band("B2"));
        let computed = service.compute_image(&ratio).unwrap();
        let band = &computed.bands[0];
        assert_eq!(band.values[[0, 0]], f64::INFINITY);
        assert_eq!(band.values[[0, 1]], 4.0 / 6.0);
        // IEEE results stay unmasked
        assert_eq!(band.valid_count(), 2);
    }

    #[test]
    fn test_map_update_mask_and_rename() {
        let service = service();
        let masked = CollectionHandle::load("TEST/COLLECTION").map(|image| {
            let mask = image.select_band("B2").eq_scalar(0.0);
            image.update_mask(&mask)
        });
        let composite = masked.mean().select_band("B1").rename(["clear"]);
        let computed = service.compute_image(&composite).unwrap();

        let clear = computed.band("clear").unwrap();
        // Only scenes a and b have B2 == 0 at column 0; none at column 1
        assert_eq!(clear.values[[0, 0]], 2.0);
        assert!(!clear.mask[[0, 1]]);
        assert!(clear.masked_values()[[0, 1]].is_nan());
    }

    #[test]
    fn test_pattern_select_and_overwrite() {
        let service = service();
        let scaled = CollectionHandle::load("TEST/COLLECTION").map(|image| {
            image.add_bands(&image.select_pattern("B1").multiply_scalar(0.5), true)
        });
        let computed = service.compute_image(&scaled.mosaic()).unwrap();

        assert_eq!(computed.band_names(), vec!["B1", "B2"]);
        assert_eq!(computed.band("B1").unwrap().values, array![[2.5, 5.0]]);
        assert_eq!(computed.band("B2").unwrap().values, array![[1.0, 1.0]]);

        let none = service
            .compute_image(&scaled.mosaic().select_pattern("SR_B.*"))
            .unwrap();
        assert!(none.bands.is_empty());
    }

    #[test]
    fn test_missing_band_and_element_errors() {
        let service = service();
        let composite = CollectionHandle::load("TEST/COLLECTION").median();
        assert_eq!(
            service.compute_image(&composite.select_band("B8")).unwrap_err(),
            ServiceError::BandNotFound("B8".to_string())
        );
        assert!(matches!(
            service.compute_image(&ImageHandle::element()),
            Err(ServiceError::Evaluation(_))
        ));
    }

    #[test]
    fn test_bitwise_and_on_quality_values() {
        assert_eq!(apply_op(BinaryOp::BitwiseAnd, 1056.0, 1024.0), 1024.0);
        assert_eq!(apply_op(BinaryOp::BitwiseAnd, 32.0, 1024.0), 0.0);
        assert!(apply_op(BinaryOp::BitwiseAnd, -1.0, 1024.0).is_nan());
        assert_eq!(apply_op(BinaryOp::And, 1.0, f64::NAN), 0.0);
    }
}
