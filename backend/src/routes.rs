use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::{HttpResponse, error::ErrorNotFound, web};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::analyzer::{InvokeError, ProcessInvoker, parse_output};
use crate::config::AppConfig;
use crate::response::{PredictError, assemble};
use crate::storage::{StorageNamer, receive_upload};

pub struct RouteSettings {
    pub serving_prefix: String,
    pub analyzer_base_dir: PathBuf,
    pub artifact_root: PathBuf,
    pub upload_root: PathBuf,
}

impl RouteSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            serving_prefix: config.serving_prefix().to_string(),
            analyzer_base_dir: config.analyzer_base_dir(),
            artifact_root: config.artifact_root(),
            upload_root: crate::config::absolutize(&config.upload_dir),
        }
    }

    /// Maps a requested artifact name to a file directly under the artifact root.
    ///
    /// Only a single plain path segment is accepted, and nothing inside the staging
    /// directory is ever served.
    pub fn artifact_path(&self, filename: &str) -> Option<PathBuf> {
        let single_segment = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(['/', '\\']);
        if !single_segment {
            return None;
        }

        let path = self.artifact_root.join(filename);
        if self.is_staged(&path) {
            return None;
        }
        path.is_file().then_some(path)
    }

    fn is_staged(&self, path: &Path) -> bool {
        if path.starts_with(&self.upload_root) {
            return true;
        }
        match (path.canonicalize(), self.upload_root.canonicalize()) {
            (Ok(path), Ok(staging)) => path.starts_with(staging),
            _ => false,
        }
    }

    /// True when the staging directory sits inside the served artifact root.
    pub fn staging_is_served(&self) -> bool {
        self.upload_root.starts_with(&self.artifact_root)
    }
}

/// Per-server state shared by every worker.
#[derive(Clone)]
pub struct AppState {
    pub namer: web::Data<StorageNamer>,
    pub invoker: web::Data<ProcessInvoker>,
    pub settings: web::Data<RouteSettings>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            namer: web::Data::new(StorageNamer::new(config.upload_dir.clone())),
            invoker: web::Data::new(ProcessInvoker::from_config(&config.analyzer)),
            settings: web::Data::new(RouteSettings::from_config(config)),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    let artifact_route = format!("/{}/{{filename}}", state.settings.serving_prefix);
    cfg.app_data(state.namer.clone())
        .app_data(state.invoker.clone())
        .app_data(state.settings.clone())
        .service(web::resource("/predict").route(web::post().to(handle_predict)))
        .service(web::resource(artifact_route).route(web::get().to(serve_artifact)));
}

async fn serve_artifact(
    settings: web::Data<RouteSettings>,
    filename: web::Path<String>,
) -> actix_web::Result<NamedFile> {
    let filename = filename.into_inner();
    let path = settings
        .artifact_path(&filename)
        .ok_or_else(|| ErrorNotFound("Not found"))?;
    NamedFile::open_async(&path).await.map_err(|e| {
        warn!("Failed to open artifact {}: {}", path.display(), e);
        ErrorNotFound("Not found")
    })
}

async fn handle_predict(
    namer: web::Data<StorageNamer>,
    invoker: web::Data<ProcessInvoker>,
    settings: web::Data<RouteSettings>,
    payload: Multipart,
) -> Result<HttpResponse, PredictError> {
    let request_id = Uuid::new_v4();

    let upload = receive_upload(payload, &namer).await.map_err(|e| {
        warn!("[{}] Upload rejected: {}", request_id, e);
        PredictError::from(e)
    })?;
    info!(
        "[{}] Received {:?}, staged as {}",
        request_id, upload.original_name, upload.generated_name
    );

    info!(
        "[{}] Executing: {}",
        request_id,
        invoker.command_line(&upload.storage_path)
    );
    let invocation = invoker.invoke(&upload.storage_path).await.map_err(|e| {
        match &e {
            InvokeError::Execution { stderr, .. } => {
                error!("[{}] {}; stderr: {}", request_id, e, stderr.trim_end())
            }
            _ => error!("[{}] {}", request_id, e),
        }
        PredictError::from(e)
    })?;
    info!(
        "[{}] Analyzer finished in {} ms",
        request_id,
        invocation.elapsed_ms()
    );

    let parsed = parse_output(&invocation.stdout_text(), &settings.analyzer_base_dir).map_err(|e| {
        error!(
            "[{}] {}; stdout: {:?}",
            request_id,
            e,
            invocation.stdout_text()
        );
        PredictError::from(e)
    })?;

    if let Some(path) = &parsed.artifact_path {
        if !path.starts_with(&settings.artifact_root) {
            warn!(
                "[{}] Heatmap {} is outside {}; its URL will not resolve",
                request_id,
                path.display(),
                settings.artifact_root.display()
            );
        }
    }

    let response = assemble(&parsed, &settings.serving_prefix);
    info!("[{}] Prediction: {}", request_id, response.result);
    if let Some(url) = &response.heatmap_url {
        info!("[{}] Heatmap URL: {}", request_id, url);
    }

    Ok(HttpResponse::Ok().json(response))
}
