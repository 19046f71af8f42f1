//! Coordinator HTTP surface and run loop.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use crate::compute::Renderer;
use crate::compute::evolution::{FocusMap, Incubator, IncubatorHandle, Organism, Patch, PatchCache};
use crate::schema::{EvolverConfig, SyncConfig};

use super::SyncError;

type ApiError = (StatusCode, String);

/// Shared state behind every coordinator route.
#[derive(Clone)]
pub struct CoordinatorState {
    incubator: IncubatorHandle,
    cache: Arc<Mutex<PatchCache>>,
    focus_png: Option<Arc<Vec<u8>>>,
}

impl CoordinatorState {
    pub fn new(incubator: IncubatorHandle, focus_png: Option<Vec<u8>>, config: &SyncConfig) -> Self {
        Self {
            incubator,
            cache: Arc::new(Mutex::new(PatchCache::new(
                config.patch_retention(),
                config.max_patch_hops,
            ))),
            focus_png: focus_png.map(Arc::new),
        }
    }

    pub fn incubator(&self) -> &IncubatorHandle {
        &self.incubator
    }

    /// Record the current top's patch so peers can bridge to it. Called
    /// after every generation.
    pub fn update(&self) -> Result<(), SyncError> {
        if let Some(top) = self.incubator.top_organism()? {
            self.remember(&top);
        }
        Ok(())
    }

    fn remember(&self, top: &Organism) {
        let Some(patch) = top.patch() else {
            return;
        };
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if !cache.contains(&patch.target) {
            cache.put(patch.clone());
        }
    }
}

/// Run a blocking incubator call off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SyncError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn current_top(state: &CoordinatorState) -> Result<Arc<Organism>, ApiError> {
    let incubator = state.incubator.clone();
    blocking(move || Ok(incubator.top_organism()?))
        .await?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No organism yet".to_string()))
}

async fn health() -> &'static str {
    "ok"
}

async fn get_target(State(state): State<CoordinatorState>) -> Result<Response, ApiError> {
    let incubator = state.incubator.clone();
    let png = blocking(move || Ok(incubator.target_png()?)).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn get_focus(State(state): State<CoordinatorState>) -> Response {
    match &state.focus_png {
        Some(png) => ([(header::CONTENT_TYPE, "image/png")], png.to_vec()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct OrganismQuery {
    #[serde(default)]
    hashonly: bool,
}

async fn get_organism(
    State(state): State<CoordinatorState>,
    Query(query): Query<OrganismQuery>,
) -> Result<String, ApiError> {
    let top = current_top(&state).await?;
    if query.hashonly {
        return Ok(top.hash().to_string());
    }
    top.to_genome()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct DeltaQuery {
    previous: String,
}

async fn get_delta(
    State(state): State<CoordinatorState>,
    Query(query): Query<DeltaQuery>,
) -> Result<Json<Patch>, ApiError> {
    let top = current_top(&state).await?;
    state.remember(&top);
    let cache = state.cache.lock().unwrap_or_else(PoisonError::into_inner);
    match cache.get_patch(&query.previous, top.hash(), None) {
        Some(patch) => Ok(Json(patch)),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("No patch from {} to {}", query.previous, top.hash()),
        )),
    }
}

async fn post_organism(
    State(state): State<CoordinatorState>,
    Json(patch): Json<Patch>,
) -> Result<StatusCode, ApiError> {
    debug!(
        "received patch {} -> {} ({} operations)",
        patch.baseline,
        patch.target,
        patch.operations.len()
    );
    let incubator = state.incubator.clone();
    blocking(move || Ok(incubator.submit_patch(patch)?)).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Routes served by the coordinator. Responses are gzipped for clients
/// that accept it.
pub fn router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/target", get(get_target))
        .route("/focus", get(get_focus))
        .route("/organism", get(get_organism).post(post_organism))
        .route("/organism/delta", get(get_delta))
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Serve the coordinator routes until the listener fails.
pub async fn serve(listener: TcpListener, state: CoordinatorState) -> Result<(), SyncError> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Where and how long a coordinator runs.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub target: PathBuf,
    pub focus: Option<PathBuf>,
    /// Directory for `population.txt` and snapshot PNGs.
    pub output_dir: PathBuf,
    /// Stop after this long. Runs forever when `None`.
    pub max_duration: Option<Duration>,
}

impl CoordinatorOptions {
    pub fn population_path(&self) -> PathBuf {
        self.output_dir.join("population.txt")
    }
}

/// Evolve toward the target image while serving peers.
pub async fn run_coordinator(config: EvolverConfig, options: CoordinatorOptions) -> Result<(), SyncError> {
    let target = image::open(&options.target)?.to_rgba8();
    let focus = match &options.focus {
        Some(path) => Some(image::open(path)?.to_rgba8()),
        None => None,
    };
    let focus_png = focus.as_ref().map(encode_png).transpose()?;

    fs::create_dir_all(&options.output_dir)?;
    let incubator = Incubator::new(config.clone(), target, focus.as_ref().map(FocusMap::from_image))?;
    let handle = IncubatorHandle::spawn(incubator)?;

    let population = options.population_path();
    if population.exists() {
        info!("resuming from {}", population.display());
        handle.load(&population)?;
    }

    let state = CoordinatorState::new(handle, focus_png, &config.sync);
    let listener = TcpListener::bind(&config.sync.bind_address).await?;
    info!("coordinator listening on {}", listener.local_addr()?);
    let server = tokio::spawn(serve(listener, state.clone()));

    let result = tokio::task::spawn_blocking(move || coordinator_loop(&state, &config, &options)).await?;
    server.abort();
    result
}

fn encode_png(image: &image::RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    image.write_to(&mut cursor, image::ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

fn coordinator_loop(
    state: &CoordinatorState,
    config: &EvolverConfig,
    options: &CoordinatorOptions,
) -> Result<(), SyncError> {
    let start = Instant::now();
    let save_interval = Duration::from_secs(config.persistence.save_interval_secs);
    let mut last_save = Instant::now();
    let target = image::load_from_memory(&state.incubator.target_png()?)?;
    let renderer = Renderer::new(target.width(), target.height());

    loop {
        if let Some(limit) = options.max_duration
            && start.elapsed() >= limit
        {
            break;
        }

        let report = state.incubator.iterate()?;
        state.update()?;
        if report.improved {
            debug!(
                "generation {}: {:.6} ({} instructions)",
                report.iteration, report.top_score, report.instructions
            );
        }

        if last_save.elapsed() >= save_interval {
            info!(
                "generation {}: score {:.6}, {} instructions",
                report.iteration, report.top_score, report.instructions
            );
            snapshot(state, options, &renderer, report.iteration)?;
            last_save = Instant::now();
        }
    }

    state.incubator.save(options.population_path())?;
    Ok(())
}

/// Save the population and a PNG of the current top.
fn snapshot(
    state: &CoordinatorState,
    options: &CoordinatorOptions,
    renderer: &Renderer,
    iteration: u64,
) -> Result<(), SyncError> {
    state.incubator.save(options.population_path())?;
    let Some(top) = state.incubator.top_organism()? else {
        return Ok(());
    };
    let png = renderer.render(top.instructions())?.encode_png()?;
    let path = options.output_dir.join(format!("snapshot.{iteration:07}.png"));
    if let Err(e) = fs::write(&path, png) {
        warn!("failed to write {}: {e}", path.display());
    }
    Ok(())
}
