//! End-to-end: search, promotion, serving from the registry and monthly
//! batch scoring, all against temporary local stores.

use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use tempfile::tempdir;

use tw_data::{label_durations, location_dicts, route_dict, ArtifactStore, Dataset, Split, TripFrame, TripLoader};
use tw_models::{
    DictVectorizer, FeatureDict, FeatureValue, ForestParams, LinearRegression, Model, ModelBundle,
    RandomForestRegressor, Regressor,
};
use tw_pipeline::promote::{MODEL_ARTIFACT_DIR, MODEL_FILE, SOURCE_RUN_TAG, TEST_METRIC};
use tw_pipeline::serve::{handle_request, PredictionResponse};
use tw_pipeline::{run_batch, run_optimization, run_register_model, BatchRequest, ModelCache, PipelineConfig};
use tw_tracking::{RunQuery, RunStatus};

/// Duration grows with distance; route 1_2 is slower than the others.
fn split_dicts(n: usize, offset: usize) -> (Vec<FeatureDict>, Vec<f64>) {
    (0..n)
        .map(|i| {
            let k = i + offset;
            let (pu, dol) = (Some((k % 3) as f64), Some((k % 4) as f64));
            let distance = 0.5 + (k % 17) as f64 * 0.75;
            let slow = if k % 3 == 1 && k % 4 == 2 { 8.0 } else { 0.0 };
            (route_dict(pu, dol, Some(distance)), 4.0 + 3.0 * distance + slow)
        })
        .unzip()
}

fn write_splits(data_path: &Path) {
    let artifacts = ArtifactStore::new(data_path);
    let (train_dicts, train_y) = split_dicts(120, 0);
    let mut dv = DictVectorizer::new();
    dv.fit(&train_dicts);
    for (split, (dicts, y)) in [
        (Split::Train, (train_dicts, train_y)),
        (Split::Val, split_dicts(40, 1000)),
        (Split::Test, split_dicts(40, 2000)),
    ] {
        let dataset = Dataset::new(dv.transform(&dicts).unwrap(), y).unwrap();
        artifacts.save_split(split, &dataset).unwrap();
    }
    artifacts.save_vectorizer(&dv).unwrap();
}

#[tokio::test]
async fn search_promote_and_serve() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("output");
    write_splits(&data_path);
    let config = PipelineConfig::with_root(dir.path().join("state"));

    let summary = run_optimization(&config, &data_path, 4).unwrap();
    assert_eq!(summary.trials, 4);
    assert!(summary.best_rmse.is_finite() && summary.best_rmse >= 0.0);

    let store = config.tracking_store().unwrap();
    let search = store.experiment_handle(&config.hpo_experiment).unwrap();
    let children = store
        .search_runs(&search, &RunQuery::new().children_only().order_by_metric("rmse", true))
        .unwrap();
    assert_eq!(children.len(), 4);
    let logged_best = children[0].metric("rmse").unwrap();
    assert!((logged_best - summary.best_rmse).abs() < 1e-9);

    let first = run_register_model(&config, &data_path, 3).unwrap();
    assert_eq!(first.retrained_runs.len(), 3);
    assert_eq!(first.version.version, 1);
    assert_eq!(
        first.version.source,
        format!("runs:/{}/{}", first.champion_run_id, MODEL_ARTIFACT_DIR)
    );

    let champion = store.get_run(&first.champion_run_id).unwrap();
    assert_eq!(champion.info.status, RunStatus::Finished);
    assert_eq!(champion.metric(TEST_METRIC), Some(first.test_rmse));
    assert!(champion.data.tags.contains_key(SOURCE_RUN_TAG));

    let registry = config.registry().unwrap();
    let model = registry.get_registered_model(&config.model_name).unwrap();
    assert_eq!(model.aliases.len(), 1);
    assert_eq!(model.aliases.get(&config.champion_alias), Some(&1));
    let described = registry
        .get_model_version_by_alias(&config.model_name, &config.champion_alias)
        .unwrap();
    assert!(described
        .description
        .unwrap()
        .starts_with("The model was promoted to Champion on "));

    // Retraining is deterministic, so the same run wins and no new version
    // appears.
    let second = run_register_model(&config, &data_path, 3).unwrap();
    assert_eq!(second.champion_run_id, first.champion_run_id);
    assert_eq!(second.version.version, 1);
    assert_eq!(registry.get_registered_model(&config.model_name).unwrap().versions.len(), 1);

    let cache = ModelCache::from_registry(config.clone());
    let (status, body) = handle_request(
        &cache,
        "POST",
        "/predict",
        br#"{"PULocationID": 1, "DOLocationID": 2, "trip_distance": 4.25}"#,
    );
    assert_eq!(status, 200, "{body}");
    let response: PredictionResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(response.duration.len(), 1);
    assert!(response.duration[0].is_finite());
    assert_eq!(cache.served_version(), Some(1));

    // A constant model from another run takes the alias; the running cache
    // must follow it.
    let dv = ArtifactStore::new(&data_path).load_vectorizer().unwrap();
    let constant = ModelBundle::new(
        dv.clone(),
        Model::Linear(LinearRegression::from_weights(vec![0.0; dv.n_features()], 42.0)),
    );
    let staged = dir.path().join("constant.json");
    constant.save(&staged).unwrap();
    let best_models = store.experiment_handle(&config.best_models_experiment).unwrap();
    let other_run = store.start_run(&best_models, "constant", None).unwrap();
    store
        .log_artifact(&other_run, &staged, &format!("{MODEL_ARTIFACT_DIR}/{MODEL_FILE}"))
        .unwrap();
    store.end_run(&other_run, RunStatus::Finished).unwrap();
    let moved = registry
        .register_model(&format!("runs:/{other_run}/{MODEL_ARTIFACT_DIR}"), &config.model_name)
        .unwrap();
    assert_eq!(moved.version, 2);
    registry
        .set_alias(&config.model_name, &config.champion_alias, moved.version)
        .unwrap();

    let (status, body) = handle_request(
        &cache,
        "POST",
        "/predict",
        br#"{"PULocationID": 1, "DOLocationID": 2, "trip_distance": 4.25}"#,
    );
    assert_eq!(status, 200, "{body}");
    let response: PredictionResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(cache.served_version(), Some(2));
    assert!((response.duration[0] - 42.0).abs() < 1e-9);
}

fn dt(hour: u32, minute: u32, second: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2023, 1, 1)
        .unwrap()
        .and_hms_opt(hour, minute, second)
}

/// Intercept 10, +1 for pickup "1", +2 for dropoff "-1".
fn location_bundle() -> ModelBundle {
    let dicts: Vec<FeatureDict> = [("-1", "-1"), ("1", "1")]
        .iter()
        .map(|(pu, dol)| {
            FeatureDict::from([
                ("PULocationID".to_string(), FeatureValue::from(*pu)),
                ("DOLocationID".to_string(), FeatureValue::from(*dol)),
            ])
        })
        .collect();
    let mut dv = DictVectorizer::new();
    dv.fit(&dicts);
    let lr = LinearRegression::from_weights(vec![2.0, 0.0, 0.0, 1.0], 10.0);
    ModelBundle::new(dv, Model::Linear(lr))
}

#[tokio::test]
async fn batch_round_trip() {
    let dir = tempdir().unwrap();
    let loader = TripLoader::new();

    let input = TripFrame::new(4)
        .with_numeric("PULocationID", vec![None, Some(1.0), Some(1.0), Some(3.0)])
        .unwrap()
        .with_numeric("DOLocationID", vec![None, Some(1.0), None, Some(4.0)])
        .unwrap()
        .with_timestamps("tpep_pickup_datetime", vec![dt(1, 1, 0), dt(1, 2, 0), dt(1, 2, 0), dt(1, 2, 0)])
        .unwrap()
        .with_timestamps("tpep_dropoff_datetime", vec![dt(1, 10, 0), dt(1, 10, 0), dt(1, 2, 59), dt(2, 2, 1)])
        .unwrap();
    loader
        .write_trip_frame(dir.path().join("in/yellow_tripdata_2023-01.parquet"), &input)
        .unwrap();

    let model_path = dir.path().join("model.json");
    location_bundle().save(&model_path).unwrap();

    let mut config = PipelineConfig::with_root(dir.path().join("state"));
    config.input_file_pattern = format!("{}/in/yellow_tripdata_{{year:04d}}-{{month:02d}}.parquet", dir.path().display());
    config.output_file_pattern = "s3://nyc-duration/out/batch-{year:04d}-{month:02d}.parquet".to_string();
    config.validate().unwrap();

    let request = BatchRequest {
        year: 2023,
        month: 1,
        model_path,
        upload: true,
    };
    let outcome = run_batch(&config, &request).await.unwrap();
    assert_eq!(outcome.rows_read, 4);
    assert_eq!(outcome.rows_scored, 2);
    assert!((outcome.mean_prediction - 11.5).abs() < 1e-9);
    assert_eq!(outcome.uploaded_key.as_deref(), Some("2023/January/batch-2023-01.parquet"));

    let rows = loader.load_predictions(&outcome.output).await.unwrap();
    assert_eq!(rows.len(), input.n_rows() - 2);
    assert_eq!(rows[0].ride_id, "2023/01_0");
    assert_eq!(rows[1].ride_id, "2023/01_1");
    let total: f64 = rows.iter().map(|r| r.predicted_duration).sum();
    assert!((total - 23.0).abs() < 1e-2);

    let objects = config.object_store().unwrap();
    assert_eq!(
        objects.list_objects("batch-predictions", "2023/").unwrap(),
        vec!["2023/January/batch-2023-01.parquet".to_string()]
    );
}

/// Yellow trips picked up at 01:00, as `(PULocationID, DOLocationID, seconds)`.
fn yellow_trips(rows: &[(f64, f64, i64)]) -> TripFrame {
    let n = rows.len();
    let pickup = dt(1, 0, 0);
    TripFrame::new(n)
        .with_numeric("PULocationID", rows.iter().map(|r| Some(r.0)).collect())
        .unwrap()
        .with_numeric("DOLocationID", rows.iter().map(|r| Some(r.1)).collect())
        .unwrap()
        .with_timestamps("tpep_pickup_datetime", vec![pickup; n])
        .unwrap()
        .with_timestamps(
            "tpep_dropoff_datetime",
            rows.iter()
                .map(|r| pickup.map(|p| p + chrono::Duration::seconds(r.2)))
                .collect(),
        )
        .unwrap()
}

/// Local input and output partitions under `dir`.
fn local_batch_config(dir: &Path, month: &TripFrame) -> PipelineConfig {
    TripLoader::new()
        .write_trip_frame(dir.join("in/yellow_tripdata_2023-01.parquet"), month)
        .unwrap();
    let mut config = PipelineConfig::with_root(dir.join("state"));
    config.input_file_pattern = format!("{}/in/yellow_tripdata_{{year:04d}}-{{month:02d}}.parquet", dir.display());
    config.output_file_pattern = format!("{}/out/predictions_{{year:04d}}-{{month:02d}}.parquet", dir.display());
    config
}

fn january(model_path: &Path) -> BatchRequest {
    BatchRequest {
        year: 2023,
        month: 1,
        model_path: model_path.to_path_buf(),
        upload: false,
    }
}

#[tokio::test]
async fn seeded_forest_scores_identically() {
    let dir = tempdir().unwrap();
    let rows: Vec<(f64, f64, i64)> = (0..60)
        .map(|k| ((k % 5) as f64, (k % 7) as f64, 90 + 37 * (k % 50) as i64))
        .collect();
    let month = yellow_trips(&rows);
    let config = local_batch_config(dir.path(), &month);

    let fit_bundle = |path: &Path| {
        let trips = label_durations(&month, month.require_service().unwrap()).unwrap();
        let dicts = location_dicts(&trips.frame).unwrap();
        let mut dv = DictVectorizer::new();
        let x = dv.fit_transform(&dicts).unwrap();
        let params = ForestParams::default()
            .with_n_estimators(15)
            .with_max_depth(6)
            .with_random_state(7);
        let mut forest = RandomForestRegressor::new(params);
        forest.fit(&x, &trips.durations).unwrap();
        ModelBundle::new(dv, Model::RandomForest(forest)).save(path).unwrap();
    };

    // Two bundles fitted with the same seed, each scored twice.
    let mut scored = Vec::new();
    for name in ["first.json", "second.json"] {
        let model_path = dir.path().join(name);
        fit_bundle(&model_path);
        for _ in 0..2 {
            let outcome = run_batch(&config, &january(&model_path)).await.unwrap();
            assert_eq!(outcome.rows_scored, 60);
            scored.push(TripLoader::new().load_predictions(&outcome.output).await.unwrap());
        }
    }

    let sums: Vec<f64> = scored
        .iter()
        .map(|rows| rows.iter().map(|r| r.predicted_duration).sum())
        .collect();
    for rows in &scored[1..] {
        assert_eq!(rows, &scored[0]);
    }
    assert!(sums.iter().all(|s| *s == sums[0]), "{sums:?}");
}

#[tokio::test]
async fn batch_keeps_one_and_sixty_minute_trips() {
    let dir = tempdir().unwrap();
    let month = yellow_trips(&[(1.0, 1.0, 60), (1.0, 1.0, 59), (1.0, 1.0, 3600), (1.0, 1.0, 3601)]);
    let config = local_batch_config(dir.path(), &month);
    let model_path = dir.path().join("model.json");
    location_bundle().save(&model_path).unwrap();

    let outcome = run_batch(&config, &january(&model_path)).await.unwrap();
    assert_eq!(outcome.rows_read, 4);
    assert_eq!(outcome.rows_scored, 2);

    let rows = TripLoader::new().load_predictions(&outcome.output).await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.ride_id.as_str()).collect();
    assert_eq!(ids, vec!["2023/01_0", "2023/01_2"]);
    assert!(rows.iter().all(|r| (r.predicted_duration - 11.0).abs() < 1e-9));
}
