use thiserror::Error;

/// Main error type for the TripWise system
#[derive(Error, Debug)]
pub enum TwError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Data-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: String },

    #[error("Column not found: {column} in {source_name}")]
    ColumnNotFound { column: String, source_name: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data writing failed: {message}")]
    WritingFailed { message: String },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Database connection failed: {message}")]
    DatabaseConnection { message: String },

    #[error("Query execution failed: {query}, error: {error}")]
    QueryFailed { query: String, error: String },
}

/// Object store errors. The batch upload path catches this class and logs it.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Bucket not found: {bucket}")]
    NoSuchBucket { bucket: String },

    #[error("Object not found: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("Invalid bucket name: {bucket}")]
    InvalidBucketName { bucket: String },

    #[error("Invalid object uri: {uri}")]
    InvalidUri { uri: String },

    #[error("Object store IO failure: {message}")]
    Io { message: String },
}

/// Model fitting and inference errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model is not fitted")]
    NotFitted,

    #[error("Shape mismatch: expected {expected} {what}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Empty training set")]
    EmptyTrainingSet,

    #[error("Invalid hyperparameter {name}: {message}")]
    InvalidHyperparameter { name: String, message: String },

    #[error("Linear system is singular")]
    SingularSystem,
}

/// Hyperparameter search errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Trial budget must be at least 1")]
    EmptyBudget,

    #[error("Empty search space")]
    EmptySpace,

    #[error("Invalid range for {parameter}: [{low}, {high}]")]
    InvalidRange {
        parameter: String,
        low: f64,
        high: f64,
    },

    #[error("Trial {trial_id} produced an invalid loss: {loss}")]
    InvalidLoss { trial_id: usize, loss: f64 },

    #[error("Strategy {strategy} produced no suggestion")]
    NoSuggestion { strategy: String },

    #[error("Missing parameter {parameter}")]
    MissingParameter { parameter: String },

    #[error("Parameter {parameter} is not numeric: {value}")]
    NonNumericParameter { parameter: String, value: String },
}

/// Tracking store and model registry errors
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Experiment not found: {name}")]
    ExperimentNotFound { name: String },

    #[error("Experiment already exists: {name}")]
    ExperimentExists { name: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Run {run_id} is not active")]
    RunNotActive { run_id: String },

    #[error("No runs found in experiment {experiment}")]
    NoRuns { experiment: String },

    #[error("Registered model not found: {name}")]
    ModelNotFound { name: String },

    #[error("Model version not found: {name} v{version}")]
    VersionNotFound { name: String, version: u32 },

    #[error("Alias {alias} not set on model {name}")]
    AliasNotFound { name: String, alias: String },

    #[error("Invalid model uri: {uri}")]
    InvalidModelUri { uri: String },

    #[error("Artifact not found: {path} in run {run_id}")]
    ArtifactNotFound { run_id: String, path: String },
}

/// Drift monitor errors
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Reference dataset is empty")]
    EmptyReference,

    #[error("Column {column} missing from {dataset} dataset")]
    MissingColumn { column: String, dataset: String },

    #[error("Invalid monitor window: {message}")]
    InvalidWindow { message: String },
}

/// Result type alias for TripWise operations
pub type TwResult<T> = Result<T, TwError>;

/// Helper trait for converting string errors
pub trait IntoTwError {
    fn into_tw_error(self) -> TwError;
}

impl IntoTwError for String {
    fn into_tw_error(self) -> TwError {
        TwError::Internal(self)
    }
}

impl IntoTwError for &str {
    fn into_tw_error(self) -> TwError {
        TwError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TwError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TwError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TwError::Config(format!($($arg)*))
    };
}
