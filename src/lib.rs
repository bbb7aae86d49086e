//! canopy: vegetation indices for drone rasters and satellite image collections
//!
//! Index formulas are written once and run on two execution models: eager
//! `ndarray` arithmetic for locally loaded RGB rasters, and deferred graph
//! building for satellite collections that a remote compute service evaluates.
//! The acquisition pipeline assembles those collections per sensor (filters,
//! quality masking and scale correction) from an immutable sensor registry.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandArray, BoundingBox, DateRange, Geometry, LogicalBand, PixelDomain, Raster, VegError,
    VegResult,
};

pub use crate::core::{
    acquire, compute_index, AcquisitionPipeline, AcquisitionRequest, BandSource, CollectionHandle,
    ImageHandle, IndexOutput, IndexParams, SensorRegistry, VegetationIndex,
};
pub use io::{load_raster, ComputeService, InMemoryService, RasterReader, ServiceError};

#[cfg(feature = "python")]
mod python {
    use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2, PyReadonlyArray3};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use std::collections::BTreeMap;

    use crate::core::indices::IndexFamily;
    use crate::core::preview::{Palette, PreviewParams};
    use crate::core::{available_indices as catalog, compute_index, BandSource, IndexParams};
    use crate::types::{Geometry, Raster, VegError};
    use crate::SensorRegistry;

    fn to_py_err(err: VegError) -> PyErr {
        match err {
            VegError::Service(_) | VegError::Io(_) => {
                PyErr::new::<PyRuntimeError, _>(format!("{}", err))
            }
            _ => PyErr::new::<PyValueError, _>(format!("{}", err)),
        }
    }

    /// Decode an image buffer into a normalized (rows, cols, channels) array
    #[pyfunction]
    fn load_image<'py>(py: Python<'py>, data: &[u8]) -> PyResult<&'py PyArray3<f64>> {
        let raster = crate::io::load_raster(data).map_err(to_py_err)?;
        Ok(raster.normalize().data().clone().into_pyarray(py))
    }

    /// Compute an index over a float RGB array
    #[pyfunction]
    #[pyo3(signature = (pixels, index_name, savi_l = 0.5))]
    fn compute_raster_index<'py>(
        py: Python<'py>,
        pixels: PyReadonlyArray3<f64>,
        index_name: &str,
        savi_l: f64,
    ) -> PyResult<&'py PyArray2<f64>> {
        let raster = Raster::from_float(pixels.as_array().to_owned());
        let params = IndexParams { savi_l };
        let output = compute_index(BandSource::Raster(&raster), index_name, None, &params)
            .map_err(to_py_err)?;
        let result = output
            .into_raster()
            .ok_or_else(|| PyErr::new::<PyRuntimeError, _>("raster index produced a graph"))?;
        Ok(result.values.into_pyarray(py))
    }

    /// Index names and descriptions grouped by family
    #[pyfunction]
    fn available_indices() -> BTreeMap<String, BTreeMap<String, String>> {
        catalog()
            .into_iter()
            .map(|(family, indices)| {
                let family = match family {
                    IndexFamily::Multispectral => "multispectral",
                    IndexFamily::RgbOnly => "rgb_only",
                };
                let entries = indices
                    .into_iter()
                    .map(|index| (index.name().to_string(), index.description().to_string()))
                    .collect();
                (family.to_string(), entries)
            })
            .collect()
    }

    /// Sensor profile as JSON
    #[pyfunction]
    fn sensor_info(sensor: &str) -> PyResult<String> {
        let registry = SensorRegistry::standard();
        let profile = registry.get(sensor).map_err(to_py_err)?;
        serde_json::to_string_pretty(profile)
            .map_err(|e| PyErr::new::<PyRuntimeError, _>(format!("{}", e)))
    }

    /// JSON graph for an acquisition, optionally reduced to a median index image
    #[pyfunction]
    #[pyo3(signature = (sensor, start_date, end_date, bbox, max_cloud_percent = 20, index_name = None))]
    fn acquisition_graph(
        sensor: &str,
        start_date: &str,
        end_date: &str,
        bbox: (f64, f64, f64, f64),
        max_cloud_percent: u32,
        index_name: Option<&str>,
    ) -> PyResult<String> {
        let registry = SensorRegistry::standard();
        let aoi = Geometry::rectangle(bbox.0, bbox.1, bbox.2, bbox.3).map_err(to_py_err)?;
        let acquisition = crate::core::acquire(
            &registry,
            sensor,
            start_date,
            end_date,
            &aoi,
            max_cloud_percent,
        )
        .map_err(to_py_err)?;

        let json = match index_name {
            Some(name) => acquisition
                .compute_index(name, &IndexParams::default())
                .map_err(to_py_err)?
                .values
                .to_json(),
            None => acquisition.collection.to_json(),
        };
        json.map_err(|e| PyErr::new::<PyRuntimeError, _>(format!("{}", e)))
    }

    /// Color-map index values into an 8-bit (rows, cols, 3) array
    #[pyfunction]
    #[pyo3(signature = (values, palette = "RdYlGn"))]
    fn render_preview<'py>(
        py: Python<'py>,
        values: PyReadonlyArray2<f64>,
        palette: &str,
    ) -> PyResult<&'py PyArray3<u8>> {
        let params = PreviewParams {
            palette: Palette::from_name(palette).map_err(to_py_err)?,
        };
        let values = values.as_array().to_owned();
        let image = crate::core::preview::render_preview(&values, &params).map_err(to_py_err)?;
        let (width, height) = image.dimensions();
        let pixels = ndarray::Array3::from_shape_vec(
            (height as usize, width as usize, 3),
            image.into_raw(),
        )
        .map_err(|e| PyErr::new::<PyRuntimeError, _>(format!("{}", e)))?;
        Ok(pixels.into_pyarray(py))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(load_image, m)?)?;
        m.add_function(wrap_pyfunction!(compute_raster_index, m)?)?;
        m.add_function(wrap_pyfunction!(available_indices, m)?)?;
        m.add_function(wrap_pyfunction!(sensor_info, m)?)?;
        m.add_function(wrap_pyfunction!(acquisition_graph, m)?)?;
        m.add_function(wrap_pyfunction!(render_preview, m)?)?;
        Ok(())
    }
}
