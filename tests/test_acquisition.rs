use approx::assert_abs_diff_eq;
use canopy::core::graph::Reducer;
use canopy::core::indices::VegetationIndex;
use canopy::io::service::{evaluate_index, ComputedImage};
use canopy::io::{InMemoryService, Scene};
use canopy::{
    acquire, compute_index, BandSource, BoundingBox, CollectionHandle, ComputeService, Geometry,
    ImageHandle, IndexParams, Raster, SensorRegistry, ServiceError, VegError,
};
use chrono::NaiveDate;
use ndarray::{Array2, Array3};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn aoi() -> Geometry {
    Geometry::rectangle(-120.5, 36.5, -120.0, 37.0).unwrap()
}

fn inside() -> BoundingBox {
    BoundingBox::new(-121.0, 36.0, -119.0, 38.0)
}

/// Landsat Collection 2 digital number for a surface reflectance
fn landsat_dn(reflectance: f64) -> f64 {
    (reflectance + 0.2) / 0.0000275
}

fn uniform(value: f64) -> Array2<f64> {
    Array2::from_elem((2, 2), value)
}

fn landsat_scene(id: &str, day: &str, footprint: BoundingBox, cloud: f64, nir: f64, red: f64, qa: Array2<f64>) -> Scene {
    Scene::new(id, date(day), footprint)
        .with_band("SR_B2", uniform(landsat_dn(0.05)))
        .with_band("SR_B3", uniform(landsat_dn(0.08)))
        .with_band("SR_B4", uniform(landsat_dn(red)))
        .with_band("SR_B5", uniform(landsat_dn(nir)))
        .with_band("SR_B6", uniform(landsat_dn(0.2)))
        .with_band("SR_B7", uniform(landsat_dn(0.15)))
        .with_band("ST_B10", uniform(44000.0))
        .with_band("QA_PIXEL", qa)
        .with_property("CLOUD_COVER", cloud)
}

fn landsat_service() -> InMemoryService {
    let clear = uniform(21824.0);
    let mut shadowed = clear.clone();
    shadowed[[1, 1]] = 21824.0 + 8.0;

    InMemoryService::new()
        .with_collection(
            "LANDSAT/LC08/C02/T1_L2",
            vec![
                landsat_scene("LC08_a", "2024-03-01", inside(), 5.0, 0.4, 0.1, shadowed),
                // Outside the requested window
                landsat_scene("LC08_b", "2023-11-01", inside(), 1.0, 0.9, 0.1, clear.clone()),
            ],
        )
        .with_collection(
            "LANDSAT/LC09/C02/T1_L2",
            vec![
                landsat_scene("LC09_a", "2024-04-01", inside(), 10.0, 0.5, 0.1, clear.clone()),
                // Too cloudy
                landsat_scene("LC09_b", "2024-04-17", inside(), 80.0, 0.1, 0.5, clear.clone()),
                // Elsewhere
                landsat_scene(
                    "LC09_c",
                    "2024-04-17",
                    BoundingBox::new(10.0, 45.0, 11.0, 46.0),
                    0.0,
                    0.1,
                    0.5,
                    clear,
                ),
            ],
        )
}

#[test]
fn test_landsat_pipeline_end_to_end() {
    init_logging();
    let registry = SensorRegistry::standard();
    let service = landsat_service();

    let acquisition = acquire(&registry, "Landsat 8/9", "2024-01-01", "2024-06-01", &aoi(), 20).unwrap();
    // Merged siblings, then date, bounds and cloud filters
    assert_eq!(service.collection_size(&acquisition.collection).unwrap(), 2);

    let ndvi = acquisition.compute_index("NDVI", &IndexParams::default()).unwrap();
    let band = evaluate_index(&service, &ndvi).unwrap();
    assert_eq!(band.name, "NDVI");

    // Median of nir 0.4 and 0.5 against red 0.1
    assert_abs_diff_eq!(band.values[[0, 0]], 0.35 / 0.55, epsilon = 1e-9);
    // Shadow bit removes LC08_a at (1, 1), leaving LC09_a alone
    assert_abs_diff_eq!(band.values[[1, 1]], 0.4 / 0.6, epsilon = 1e-9);
    assert_eq!(band.valid_count(), 4);
}

#[test]
fn test_deferred_multispectral_indices_match_reference_values() {
    let registry = SensorRegistry::standard();
    let service = landsat_service();
    let acquisition = acquire(&registry, "Landsat 8/9", "2024-01-01", "2024-06-01", &aoi(), 20).unwrap();

    // Median composite at (0, 0): blue 0.05, green 0.08, red 0.1, nir 0.45, swir1 0.2
    let (blue, green, red, nir, swir1) = (0.05, 0.08, 0.1, 0.45, 0.2);
    let expected = [
        ("EVI", 2.5 * (nir - red) / (nir + 6.0 * red - 7.5 * blue + 1.0)),
        ("SAVI", 1.5 * (nir - red) / (nir + red + 0.5)),
        ("GNDVI", (nir - green) / (nir + green)),
        ("NDMI", (nir - swir1) / (nir + swir1)),
    ];
    for (name, value) in expected {
        let result = acquisition.compute_index(name, &IndexParams::default()).unwrap();
        let band = evaluate_index(&service, &result).unwrap();
        assert_abs_diff_eq!(band.values[[0, 0]], value, epsilon = 1e-9);
    }
}

#[test]
fn test_scale_correction_reaches_reflectance_and_thermal_bands() {
    init_logging();
    let registry = SensorRegistry::standard();
    let service = landsat_service();
    let acquisition = acquire(&registry, "Landsat 8/9", "2024-03-01", "2024-03-01", &aoi(), 20).unwrap();

    let image: ComputedImage = service.compute_image(&acquisition.composite(Reducer::Mosaic)).unwrap();
    assert_abs_diff_eq!(image.band("SR_B4").unwrap().values[[0, 0]], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(
        image.band("ST_B10").unwrap().values[[0, 0]],
        44000.0 * 0.00341802 + 149.0,
        epsilon = 1e-9
    );
    // The quality band is never rescaled
    assert_eq!(image.band("QA_PIXEL").unwrap().values[[0, 0]], 21824.0);
    assert!(!image.band("SR_B4").unwrap().mask[[1, 1]]);
}

#[test]
fn test_cloud_threshold_is_strict() {
    let registry = SensorRegistry::standard();
    let service = InMemoryService::new().with_collection(
        "COPERNICUS/S2_HARMONIZED",
        vec![
            Scene::new("S2_a", date("2024-05-01"), inside())
                .with_band("B4", uniform(1000.0))
                .with_band("QA60", uniform(0.0))
                .with_property("CLOUDY_PIXEL_PERCENTAGE", 20.0),
            Scene::new("S2_b", date("2024-05-06"), inside())
                .with_band("B4", uniform(1000.0))
                .with_band("QA60", uniform(0.0))
                .with_property("CLOUDY_PIXEL_PERCENTAGE", 19.9),
        ],
    );

    let acquisition = acquire(&registry, "Sentinel-2", "2024-05-01", "2024-05-31", &aoi(), 20).unwrap();
    assert_eq!(service.collection_size(&acquisition.collection).unwrap(), 1);

    let image = service.compute_image(&acquisition.median()).unwrap();
    assert_abs_diff_eq!(image.band("B4").unwrap().values[[0, 0]], 0.1, epsilon = 1e-12);
}

fn modis_service() -> InMemoryService {
    let mut state_qa = uniform(0.0);
    state_qa[[0, 1]] = 1.0;
    let zeros = uniform(0.0);
    let mut nir = uniform(3000.0);
    nir[[0, 0]] = 0.0;
    let mut red = uniform(1000.0);
    red[[0, 0]] = 0.0;

    InMemoryService::new().with_collection(
        "MODIS/061/MOD09A1",
        vec![Scene::new("MOD09A1_a", date("2024-06-09"), inside())
            .with_band("sur_refl_b01", red)
            .with_band("sur_refl_b02", nir)
            .with_band("sur_refl_b03", zeros.clone())
            .with_band("sur_refl_b04", zeros.clone())
            .with_band("sur_refl_b06", zeros.clone())
            .with_band("sur_refl_b07", zeros)
            .with_band("StateQA", state_qa)],
    )
}

#[test]
fn test_deferred_zero_division_is_unmasked_nan() {
    init_logging();
    let registry = SensorRegistry::standard();
    let service = modis_service();
    let acquisition = acquire(&registry, "MODIS", "2024-06-01", "2024-06-30", &aoi(), 20).unwrap();

    let band = evaluate_index(
        &service,
        &acquisition.compute_index("ndvi", &IndexParams::default()).unwrap(),
    )
    .unwrap();

    // 0/0 from the service's arithmetic, still marked valid
    assert!(band.values[[0, 0]].is_nan());
    assert!(band.mask[[0, 0]]);
    // Cloud state bits mask the pixel instead
    assert!(!band.mask[[0, 1]]);
    assert_abs_diff_eq!(band.values[[1, 0]], 0.5, epsilon = 1e-12);
}

#[test]
fn test_eager_zero_division_stays_finite() {
    let raster = Raster::from_float(Array3::zeros((2, 2, 3)));
    for index in ["VARI", "GLI", "RGBVI", "NGRDI"] {
        let values = compute_index(BandSource::Raster(&raster), index, None, &IndexParams::default())
            .unwrap()
            .into_raster()
            .unwrap()
            .values;
        assert!(values.iter().all(|v| v.is_finite()), "{}", index);
    }
}

struct UnavailableService;

impl ComputeService for UnavailableService {
    fn compute_image(&self, _image: &ImageHandle) -> Result<ComputedImage, ServiceError> {
        Err(ServiceError::Unavailable("backend offline".to_string()))
    }

    fn collection_size(&self, _collection: &CollectionHandle) -> Result<usize, ServiceError> {
        Err(ServiceError::Unavailable("backend offline".to_string()))
    }
}

#[test]
fn test_service_errors_propagate_unchanged() {
    let registry = SensorRegistry::standard();
    let acquisition = acquire(&registry, "Sentinel-2", "2024-01-01", "2024-06-01", &aoi(), 20).unwrap();
    let ndvi = acquisition.compute_index("NDVI", &IndexParams::default()).unwrap();

    let err = evaluate_index(&UnavailableService, &ndvi).unwrap_err();
    assert!(matches!(
        err,
        VegError::Service(ServiceError::Unavailable(ref msg)) if msg == "backend offline"
    ));

    // Missing collections surface as the service reports them
    let err = evaluate_index(&InMemoryService::new(), &ndvi).unwrap_err();
    assert!(matches!(
        err,
        VegError::Service(ServiceError::NotFound(ref id)) if id == "COPERNICUS/S2_HARMONIZED"
    ));
}

#[test]
fn test_validation_errors() {
    let registry = SensorRegistry::standard();

    assert!(matches!(
        acquire(&registry, "Sentinel-2", "2024-06-01", "2024-01-01", &aoi(), 20),
        Err(VegError::InvalidDateRange { .. })
    ));
    assert!(matches!(
        acquire(&registry, "Landsat 10", "2024-01-01", "2024-06-01", &aoi(), 20),
        Err(VegError::UnsupportedSensor(_))
    ));

    let acquisition = acquire(&registry, "Landsat 5/7", "2005-01-01", "2005-12-31", &aoi(), 20).unwrap();
    assert!(matches!(
        acquisition.compute_index("NDRE", &IndexParams::default()),
        Err(VegError::MissingBand { .. })
    ));
    assert!(matches!(
        acquisition.compute_index("FOOBAR", &IndexParams::default()),
        Err(VegError::UnknownIndex(_))
    ));
}

#[test]
fn test_graph_survives_json_transport() {
    let registry = SensorRegistry::standard();
    let service = landsat_service();
    let acquisition = acquire(&registry, "Landsat 8/9", "2024-01-01", "2024-06-01", &aoi(), 20).unwrap();
    let gndvi = acquisition.compute_index("GNDVI", &IndexParams::default()).unwrap();

    let json = gndvi.values.to_json().unwrap();
    let restored = ImageHandle::from_json(&json).unwrap();
    assert_eq!(restored, gndvi.values);

    let direct = service.compute_image(&gndvi.values).unwrap();
    let transported = service.compute_image(&restored).unwrap();
    assert_eq!(direct, transported);
    assert_eq!(gndvi.index, VegetationIndex::Gndvi);
}
