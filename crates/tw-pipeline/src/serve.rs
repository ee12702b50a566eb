//! Online duration prediction over plain HTTP/1.1.
//!
//! `POST /predict` takes one ride and answers `{"Duration": [minutes]}` using
//! the model version holding the champion alias. `GET /health` reports
//! liveness.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tw_data::{PU_DO, TRIP_DISTANCE};
use tw_models::{FeatureDict, FeatureValue, ModelBundle};
use tw_types::{validation_error, TwResult};

use crate::config::PipelineConfig;
use crate::promote::MODEL_FILE;

pub const DEFAULT_ADDR: &str = "0.0.0.0:9090";
pub const ENV_SERVE_ADDR: &str = "TRIPWISE_SERVE_ADDR";

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;

/// The bundle being served and where it came from.
struct Served {
    version: Option<u32>,
    path: Option<PathBuf>,
    bundle: Arc<ModelBundle>,
}

/// Champion bundle. Backed by a registry, the alias is resolved on every
/// request and the bundle reloaded only when it points at a new version.
pub struct ModelCache {
    config: Option<PipelineConfig>,
    served: RwLock<Option<Served>>,
}

impl ModelCache {
    pub fn from_registry(config: PipelineConfig) -> Self {
        Self {
            config: Some(config),
            served: RwLock::new(None),
        }
    }

    /// A cache pinned to one bundle.
    pub fn with_bundle(bundle: ModelBundle) -> Self {
        Self {
            config: None,
            served: RwLock::new(Some(Served {
                version: None,
                path: None,
                bundle: Arc::new(bundle),
            })),
        }
    }

    /// Version holding the champion alias and the bundle file it points to.
    fn resolve_champion(config: &PipelineConfig) -> TwResult<(u32, PathBuf)> {
        let store = config.tracking_store()?;
        let registry = config.registry()?;
        let champion = registry.get_model_version_by_alias(&config.model_name, &config.champion_alias)?;
        let artifact = registry.resolve_artifact(&store, &champion.source)?;
        debug!("Resolved {} to {}", config.champion_uri(), artifact.display());
        let path = if artifact.is_dir() {
            artifact.join(MODEL_FILE)
        } else {
            artifact
        };
        Ok((champion.version, path))
    }

    pub fn get(&self) -> TwResult<Arc<ModelBundle>> {
        let Some(config) = self.config.as_ref() else {
            return self
                .served
                .read()
                .as_ref()
                .map(|served| Arc::clone(&served.bundle))
                .ok_or_else(|| validation_error!("no model source configured"));
        };

        let (version, path) = Self::resolve_champion(config)?;
        if let Some(served) = self.served.read().as_ref() {
            if served.version == Some(version) && served.path.as_deref() == Some(path.as_path()) {
                return Ok(Arc::clone(&served.bundle));
            }
        }

        let bundle = Arc::new(ModelBundle::load(&path)?);
        info!(
            "Serving {} version {} from {}",
            config.model_name,
            version,
            path.display()
        );
        *self.served.write() = Some(Served {
            version: Some(version),
            path: Some(path),
            bundle: Arc::clone(&bundle),
        });
        Ok(bundle)
    }

    /// Registry version of the bundle last served.
    pub fn served_version(&self) -> Option<u32> {
        self.served.read().as_ref().and_then(|served| served.version)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RideRequest {
    #[serde(rename = "PULocationID")]
    pub pickup: Value,
    #[serde(rename = "DOLocationID")]
    pub dropoff: Value,
    #[serde(default)]
    pub trip_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    #[serde(rename = "Duration")]
    pub duration: Vec<f64>,
}

fn location_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        },
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// `PU_DO = "{PU}_{DO}"` plus `trip_distance` when given.
pub fn prepare_features(ride: &RideRequest) -> FeatureDict {
    let mut features = FeatureDict::new();
    features.insert(
        PU_DO.to_string(),
        format!("{}_{}", location_text(&ride.pickup), location_text(&ride.dropoff)).into(),
    );
    if let Some(distance) = ride.trip_distance {
        features.insert(TRIP_DISTANCE.to_string(), FeatureValue::Num(distance));
    }
    features
}

fn error_body(message: impl std::fmt::Display) -> String {
    serde_json::json!({ "error": message.to_string() }).to_string()
}

/// Route one request and return the status code and JSON body.
pub fn handle_request(cache: &ModelCache, method: &str, path: &str, body: &[u8]) -> (u16, String) {
    let path = path.split('?').next().unwrap_or(path);
    match (method, path) {
        ("POST", "/predict") => {
            let ride: RideRequest = match serde_json::from_slice(body) {
                Ok(ride) => ride,
                Err(e) => return (400, error_body(format!("invalid ride: {e}"))),
            };
            let features = prepare_features(&ride);
            let prediction = cache.get().and_then(|bundle| bundle.predict_dicts(&[features]));
            match prediction {
                Ok(duration) => {
                    debug!("Predicted {:?} for {:?}", duration, ride);
                    let response = PredictionResponse { duration };
                    match serde_json::to_string(&response) {
                        Ok(body) => (200, body),
                        Err(e) => (500, error_body(e)),
                    }
                }
                Err(e) => {
                    error!("Prediction failed: {}", e);
                    (500, error_body(e))
                }
            }
        }
        ("GET", "/health") => (200, r#"{"status":"ok","service":"tripwise"}"#.to_string()),
        (_, "/predict") | (_, "/health") => (405, error_body("method not allowed")),
        _ => (404, error_body(format!("no route for {path}"))),
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

/// Read one request: the head up to the blank line, then `Content-Length`
/// bytes of body.
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<HttpRequest, (u16, String)> {
    let bad = |message: &str| (400, error_body(message));
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err((413, error_body("request head too large")));
        }
        let n = stream.read(&mut chunk).await.map_err(|e| bad(&e.to_string()))?;
        if n == 0 {
            return Err(bad("connection closed before end of headers"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(path)) = (request_line.next(), request_line.next()) else {
        return Err(bad("malformed request line"));
    };

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().map_err(|_| bad("invalid Content-Length"))?;
            }
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err((413, error_body("request body too large")));
    }

    let mut body = buf.split_off(head_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.map_err(|e| bad(&e.to_string()))?;
        if n == 0 {
            return Err(bad("connection closed before end of body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        body,
    })
}

async fn write_response<S: AsyncWrite + Unpin>(stream: &mut S, status: u16, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn handle_connection<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, cache: Arc<ModelCache>) {
    let (status, body) = match read_request(&mut stream).await {
        Ok(request) => handle_request(&cache, &request.method, &request.path, &request.body),
        Err(rejection) => rejection,
    };
    if let Err(e) = write_response(&mut stream, status, &body).await {
        warn!("Failed to write response: {}", e);
    }
}

/// Accept connections until `shutdown` turns true, one task per connection.
pub async fn serve(listener: TcpListener, cache: Arc<ModelCache>, mut shutdown: watch::Receiver<bool>) -> TwResult<()> {
    info!("Prediction service listening on {}", listener.local_addr()?);
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                debug!("Connection from {}", peer);
                let cache = Arc::clone(&cache);
                tokio::spawn(handle_connection(socket, cache));
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("Prediction service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tw_models::{DictVectorizer, LinearRegression, Model};

    /// 10 minutes for route 10_50, 20 for any other route seen in training,
    /// plus 2 per mile.
    fn cache() -> ModelCache {
        let dicts: Vec<FeatureDict> = ["10_50", "43_151"]
            .iter()
            .map(|route| {
                FeatureDict::from([
                    (PU_DO.to_string(), FeatureValue::from(*route)),
                    (TRIP_DISTANCE.to_string(), FeatureValue::Num(1.0)),
                ])
            })
            .collect();
        let mut dv = DictVectorizer::new();
        dv.fit(&dicts);
        // PU_DO=10_50, PU_DO=43_151, trip_distance
        let model = LinearRegression::from_weights(vec![-10.0, 0.0, 2.0], 20.0);
        ModelCache::with_bundle(ModelBundle::new(dv, Model::Linear(model)))
    }

    #[test]
    fn features_join_locations() {
        let ride: RideRequest =
            serde_json::from_str(r#"{"PULocationID": 10, "DOLocationID": "50", "trip_distance": 40}"#).unwrap();
        let features = prepare_features(&ride);
        assert_eq!(features[PU_DO], FeatureValue::from("10_50"));
        assert_eq!(features[TRIP_DISTANCE], FeatureValue::Num(40.0));

        let ride: RideRequest = serde_json::from_str(r#"{"PULocationID": 7, "DOLocationID": null}"#).unwrap();
        let features = prepare_features(&ride);
        assert_eq!(features[PU_DO], FeatureValue::from("7_None"));
        assert!(!features.contains_key(TRIP_DISTANCE));
    }

    #[test]
    fn predict_route() {
        let cache = cache();
        let (status, body) = handle_request(
            &cache,
            "POST",
            "/predict",
            br#"{"PULocationID": 10, "DOLocationID": 50, "trip_distance": 3.0}"#,
        );
        assert_eq!(status, 200);
        let response: PredictionResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.duration.len(), 1);
        assert!((response.duration[0] - 16.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_requests() {
        let cache = cache();
        assert_eq!(handle_request(&cache, "POST", "/predict", b"not json").0, 400);
        assert_eq!(handle_request(&cache, "GET", "/predict", b"").0, 405);
        assert_eq!(handle_request(&cache, "GET", "/nowhere", b"").0, 404);
        assert_eq!(handle_request(&cache, "GET", "/health", b"").0, 200);
    }

    #[test]
    fn missing_champion_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::from_registry(PipelineConfig::with_root(dir.path()));
        let (status, body) = handle_request(
            &cache,
            "POST",
            "/predict",
            br#"{"PULocationID": 10, "DOLocationID": 50}"#,
        );
        assert_eq!(status, 500);
        assert!(body.contains("error"));
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, Arc::new(cache()), rx));

        let body = r#"{"PULocationID": 43, "DOLocationID": 151, "trip_distance": 1.5}"#;
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST /predict HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(r#"{"Duration":[23.0]}"#));

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
