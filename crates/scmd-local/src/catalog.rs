//! Known models and the local model cache.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::download::{DownloadRequest, ResilientDownloader};
use crate::error::LocalError;
use crate::paths::DataLayout;
use crate::progress::DownloadProgress;

/// File extension of cached model artifacts.
pub const MODEL_EXTENSION: &str = "gguf";

/// Catalog entry for a downloadable model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: String,
    /// Quantization tag, e.g. `q4_k_m`.
    pub variant: String,
    pub url: String,
    /// Size in bytes; 0 when unknown until the server reports it.
    pub expected_size: u64,
    pub sha256: Option<String>,
    /// Context length the model was trained for.
    pub native_context: u32,
    pub supports_tools: bool,
}

impl ModelDescriptor {
    /// Cache filename: `<name>-<variant>.gguf`.
    pub fn filename(&self) -> String {
        format!("{}-{}.{}", self.name, self.variant, MODEL_EXTENSION)
    }
}

fn qwen(name: &str, repo: &str, file: &str) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_string(),
        variant: "q4_k_m".to_string(),
        url: format!("https://huggingface.co/Qwen/{}/resolve/main/{}", repo, file),
        expected_size: 0,
        sha256: None,
        native_context: 32768,
        supports_tools: true,
    }
}

/// Models scmd knows how to download.
pub fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        qwen(
            "qwen2.5-0.5b",
            "Qwen2.5-0.5B-Instruct-GGUF",
            "qwen2.5-0.5b-instruct-q4_k_m.gguf",
        ),
        qwen(
            "qwen2.5-1.5b",
            "Qwen2.5-1.5B-Instruct-GGUF",
            "qwen2.5-1.5b-instruct-q4_k_m.gguf",
        ),
        qwen(
            "qwen2.5-3b",
            "Qwen2.5-3B-Instruct-GGUF",
            "qwen2.5-3b-instruct-q4_k_m.gguf",
        ),
        qwen(
            "qwen2.5-coder-1.5b",
            "Qwen2.5-Coder-1.5B-Instruct-GGUF",
            "qwen2.5-coder-1.5b-instruct-q4_k_m.gguf",
        ),
        qwen(
            "qwen2.5-coder-3b",
            "Qwen2.5-Coder-3B-Instruct-GGUF",
            "qwen2.5-coder-3b-instruct-q4_k_m.gguf",
        ),
    ]
}

/// A model file found in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModel {
    /// File name without the extension.
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Catalog entry this file belongs to, if any.
    pub descriptor: Option<ModelDescriptor>,
}

/// Catalog lookup plus the on-disk model cache.
///
/// Resolution is serialized per catalog, so two callers asking for the same
/// model never download it into the same temp file at once.
pub struct ModelCatalog {
    layout: DataLayout,
    entries: Vec<ModelDescriptor>,
    downloader: ResilientDownloader,
    test_mode: bool,
    quiet: bool,
    resolve_lock: Mutex<()>,
}

impl ModelCatalog {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            entries: builtin_models(),
            downloader: ResilientDownloader::new(),
            test_mode: false,
            quiet: false,
            resolve_lock: Mutex::new(()),
        }
    }

    pub fn with_entries(mut self, entries: Vec<ModelDescriptor>) -> Self {
        self.entries = entries;
        self
    }

    pub fn with_downloader(mut self, downloader: ResilientDownloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Never download; a cache miss is an error.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Hide the download progress bar.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn find(&self, name: &str) -> Option<&ModelDescriptor> {
        self.entries.iter().find(|m| m.name == name)
    }

    pub fn list_known(&self) -> &[ModelDescriptor] {
        &self.entries
    }

    /// Where a catalog entry lives once downloaded.
    pub fn cached_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.layout.model_path(&descriptor.filename())
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.find(name)
            .map(|d| self.cached_path(d).is_file())
            .unwrap_or(false)
    }

    /// Turn a model name into a local file, downloading it on a cache miss.
    pub async fn resolve(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, LocalError> {
        let mut progress = DownloadProgress::new(&format!("Downloading {}", name), self.quiet);
        let result = self
            .resolve_with_progress(name, cancel, |done, total| progress.update(done, total))
            .await;
        match &result {
            Ok(_) => progress.finish("Download complete"),
            Err(_) => progress.abandon(),
        }
        result
    }

    /// `resolve` with a custom `(bytes_so_far, total_bytes)` callback.
    ///
    /// Names that are not in the catalog are tried as a previously imported
    /// cache entry and then as a literal filesystem path.
    pub async fn resolve_with_progress<F>(
        &self,
        name: &str,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<PathBuf, LocalError>
    where
        F: FnMut(u64, u64) + Send,
    {
        let _guard = self.resolve_lock.lock().await;

        let Some(descriptor) = self.find(name) else {
            return self.resolve_uncataloged(name);
        };

        let path = self.cached_path(descriptor);
        if path.is_file() {
            debug!(model = name, path = %path.display(), "model cache hit");
            return Ok(path);
        }

        if self.test_mode {
            return Err(LocalError::ModelNotCached(name.to_string()));
        }

        info!("Downloading model '{}' to {:?}", name, path);
        let mut request = DownloadRequest::new(&descriptor.url, &path)
            .with_expected_size(descriptor.expected_size);
        if let Some(sha256) = &descriptor.sha256 {
            request = request.with_sha256(sha256);
        }

        self.downloader.download(&request, cancel, on_progress).await?;
        info!("Model '{}' downloaded successfully", name);
        Ok(path)
    }

    /// Cache path for an imported model stem. Names that could escape the
    /// models directory have none.
    fn stem_path(&self, name: &str) -> Option<PathBuf> {
        let plain = !name.is_empty()
            && name != "."
            && !name.contains("..")
            && !name.contains(['/', '\\']);
        plain.then(|| {
            self.layout
                .model_path(&format!("{}.{}", name, MODEL_EXTENSION))
        })
    }

    fn resolve_uncataloged(&self, name: &str) -> Result<PathBuf, LocalError> {
        if let Some(imported) = self.stem_path(name).filter(|p| p.is_file()) {
            return Ok(imported);
        }

        let literal = Path::new(name);
        if literal.is_file() {
            return Ok(literal.to_path_buf());
        }

        Err(LocalError::UnknownModel(name.to_string()))
    }

    /// Scan the cache directory for model files. Partial downloads are skipped.
    pub fn list_cached(&self) -> Result<Vec<CachedModel>, LocalError> {
        let dir = self.layout.models_dir();

        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut models: Vec<CachedModel> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext == MODEL_EXTENSION)
                    .unwrap_or(false)
            })
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_stem()?.to_str()?.to_string();
                let size_bytes = entry.metadata().ok()?.len();
                let filename = entry.file_name();
                let descriptor = self
                    .entries
                    .iter()
                    .find(|d| filename.to_str() == Some(d.filename().as_str()))
                    .cloned();
                Some(CachedModel {
                    name,
                    path,
                    size_bytes,
                    descriptor,
                })
            })
            .collect();

        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    /// Remove a cached model by catalog name or cached file stem.
    pub fn delete(&self, name: &str) -> Result<PathBuf, LocalError> {
        let path = match self.find(name) {
            Some(descriptor) => self.cached_path(descriptor),
            None => self
                .stem_path(name)
                .ok_or_else(|| LocalError::UnknownModel(name.to_string()))?,
        };

        if !path.is_file() {
            return Err(LocalError::ModelNotCached(name.to_string()));
        }
        fs::remove_file(&path)?;
        info!("Removed model: {}", name);
        Ok(path)
    }

    /// Copy a local GGUF file into the cache.
    pub fn import(&self, source: &Path) -> Result<PathBuf, LocalError> {
        if !source.is_file() {
            return Err(LocalError::UnknownModel(source.display().to_string()));
        }
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LocalError::UnknownModel(source.display().to_string()))?;

        fs::create_dir_all(self.layout.models_dir())?;
        let dest_path = self.layout.model_path(filename);

        if source == dest_path {
            return Ok(dest_path);
        }

        info!("Installing model from {:?} to {:?}", source, dest_path);
        fs::copy(source, &dest_path)?;
        Ok(dest_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::temp_path;
    use crate::retry::BackoffPolicy;
    use crate::test_support::{payload, sha256_hex, MockResponse, MockServer};
    use std::time::Duration;

    fn demo(url: String, data: &[u8]) -> ModelDescriptor {
        ModelDescriptor {
            name: "demo-1b".to_string(),
            variant: "q4".to_string(),
            url,
            expected_size: data.len() as u64,
            sha256: Some(sha256_hex(data)),
            native_context: 8192,
            supports_tools: false,
        }
    }

    fn catalog(dir: &Path, entries: Vec<ModelDescriptor>, attempts: u32) -> ModelCatalog {
        ModelCatalog::new(DataLayout::new(dir))
            .with_entries(entries)
            .with_quiet(true)
            .with_downloader(
                ResilientDownloader::new()
                    .with_policy(BackoffPolicy::new(Duration::from_millis(10), attempts))
                    .with_space_probe(|_| Some(u64::MAX)),
            )
    }

    #[test]
    fn test_builtin_catalog() {
        let models = builtin_models();
        assert!(models.iter().any(|m| m.name == crate::DEFAULT_MODEL_NAME));
        for model in &models {
            assert!(model.url.starts_with("https://"));
            assert!(model.native_context >= 2048);
            assert!(model.filename().ends_with(".gguf"));
        }
    }

    #[test]
    fn test_filename_combines_name_and_variant() {
        let d = demo("http://x".to_string(), b"abc");
        assert_eq!(d.filename(), "demo-1b-q4.gguf");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start(|_, _| MockResponse::status(500)).await;
        let data = payload(100);
        let catalog = catalog(dir.path(), vec![demo(server.url("/m"), &data)], 1);

        let cached = dir.path().join("models").join("demo-1b-q4.gguf");
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, &data).unwrap();

        let path = catalog
            .resolve("demo-1b", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(path, cached);
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_reports_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(100);
        let catalog = catalog(dir.path(), vec![demo("http://127.0.0.1:9/m".into(), &data)], 1);

        let cached = dir.path().join("models").join("demo-1b-q4.gguf");
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, &data).unwrap();

        let mut progress = DownloadProgress::new("Downloading demo-1b", true);
        let mut calls = 0;
        catalog
            .resolve_with_progress("demo-1b", &CancellationToken::new(), |done, total| {
                calls += 1;
                progress.update(done, total);
            })
            .await
            .unwrap();

        assert_eq!(calls, 0);
        assert!(!progress.is_started());
    }

    #[tokio::test]
    async fn test_cache_miss_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(50_000);
        let served = data.clone();
        let server = MockServer::start(move |req, _| MockResponse::ranged(req, &served)).await;
        let catalog = catalog(dir.path(), vec![demo(server.url("/m"), &data)], 1);

        let path = catalog
            .resolve("demo-1b", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fs::read(&path).unwrap(), data);
        assert!(catalog.is_cached("demo-1b"));
    }

    #[tokio::test]
    async fn test_interrupted_download_resumes_on_next_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(1_000_000);
        let served = data.clone();
        let server = MockServer::start(move |req, index| {
            let response = MockResponse::ranged(req, &served);
            if index == 0 {
                response.cut_after(400_000)
            } else {
                response
            }
        })
        .await;
        let catalog = catalog(dir.path(), vec![demo(server.url("/m"), &data)], 1);
        let cancel = CancellationToken::new();

        let err = catalog.resolve("demo-1b", &cancel).await.unwrap_err();
        assert!(err.is_retryable());
        let dest = dir.path().join("models").join("demo-1b-q4.gguf");
        assert_eq!(fs::metadata(temp_path(&dest)).unwrap().len(), 400_000);

        let path = catalog.resolve("demo-1b", &cancel).await.unwrap();

        assert_eq!(server.requests()[1].header("range"), Some("bytes=400000-"));
        let written = fs::read(&path).unwrap();
        assert_eq!(written.len(), 1_000_000);
        assert_eq!(sha256_hex(&written), sha256_hex(&data));
        assert!(!temp_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_concurrent_resolve_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let data = payload(20_000);
        let served = data.clone();
        let server = MockServer::start(move |req, _| {
            MockResponse::ranged(req, &served).delayed(Duration::from_millis(50))
        })
        .await;
        let catalog = catalog(dir.path(), vec![demo(server.url("/m"), &data)], 1);
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            catalog.resolve("demo-1b", &cancel),
            catalog.resolve("demo-1b", &cancel)
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_test_mode_never_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start(|_, _| MockResponse::ok("x")).await;
        let catalog =
            catalog(dir.path(), vec![demo(server.url("/m"), b"x")], 1).with_test_mode(true);

        let err = catalog
            .resolve("demo-1b", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LocalError::ModelNotCached(_)));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_and_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path(), Vec::new(), 1);
        let cancel = CancellationToken::new();

        let err = catalog.resolve("no-such-model", &cancel).await.unwrap_err();
        assert!(matches!(err, LocalError::UnknownModel(_)));

        let literal = dir.path().join("custom.gguf");
        fs::write(&literal, b"gguf").unwrap();
        let resolved = catalog
            .resolve(literal.to_str().unwrap(), &cancel)
            .await
            .unwrap();
        assert_eq!(resolved, literal);
    }

    #[tokio::test]
    async fn test_import_then_resolve_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path(), Vec::new(), 1);
        let source = dir.path().join("my-finetune.gguf");
        fs::write(&source, b"weights").unwrap();

        let imported = catalog.import(&source).unwrap();
        assert_eq!(imported, dir.path().join("models").join("my-finetune.gguf"));

        let resolved = catalog
            .resolve("my-finetune", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolved, imported);

        assert!(matches!(
            catalog.import(&dir.path().join("missing.gguf")),
            Err(LocalError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_list_cached_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path(), vec![demo("http://x".to_string(), b"abc")], 1);
        let models = dir.path().join("models");
        fs::create_dir_all(&models).unwrap();
        fs::write(models.join("demo-1b-q4.gguf"), b"abc").unwrap();
        fs::write(models.join("other.gguf"), b"abcdef").unwrap();
        fs::write(models.join("partial.gguf.tmp"), b"ab").unwrap();
        fs::write(models.join("notes.txt"), b"hi").unwrap();

        let cached = catalog.list_cached().unwrap();
        let names: Vec<_> = cached.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["demo-1b-q4", "other"]);
        assert_eq!(cached[0].descriptor.as_ref().unwrap().name, "demo-1b");
        assert_eq!(cached[1].size_bytes, 6);
        assert!(cached[1].descriptor.is_none());

        catalog.delete("demo-1b").unwrap();
        catalog.delete("other").unwrap();
        assert!(catalog.list_cached().unwrap().is_empty());
        assert!(matches!(
            catalog.delete("demo-1b"),
            Err(LocalError::ModelNotCached(_))
        ));
    }

    #[tokio::test]
    async fn test_names_cannot_escape_models_dir() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(&dir.path().join("data"), Vec::new(), 1);
        fs::create_dir_all(dir.path().join("data").join("models")).unwrap();
        let outside = dir.path().join("data").join("victim.gguf");
        fs::write(&outside, b"keep").unwrap();

        for name in ["../victim", "..", "a/b", "a\\b", ""] {
            assert!(
                matches!(catalog.delete(name), Err(LocalError::UnknownModel(_))),
                "{:?} should be rejected",
                name
            );
        }
        assert!(outside.is_file());

        assert!(matches!(
            catalog
                .resolve("../victim", &CancellationToken::new())
                .await,
            Err(LocalError::UnknownModel(_))
        ));

        let literal = outside.to_str().unwrap().to_string();
        assert_eq!(
            catalog
                .resolve(&literal, &CancellationToken::new())
                .await
                .unwrap(),
            outside
        );
    }

    #[test]
    fn test_list_cached_without_dir() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(&dir.path().join("missing"), Vec::new(), 1);
        assert!(catalog.list_cached().unwrap().is_empty());
    }
}
