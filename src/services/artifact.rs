use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Tool;

pub const MARKUP_FILE: &str = "index.html";
pub const SCRIPT_FILE: &str = "app.js";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Non-essential files copied from the shared assets directory
pub const SHARED_ASSETS: &[&str] = &["favicon.ico"];

const RELEASES_DIR: &str = ".releases";
const BACKUPS_DIR: &str = ".backups";

/// Rollback backups kept per subdomain; older ones are pruned
pub const RETAINED_BACKUPS: usize = 5;

/// Rendered artifact content returned by the generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub markup: String,
    #[serde(alias = "behaviorScript")]
    pub behavior_script: String,
    #[serde(default)]
    pub manifest: Value,
}

/// Turns a tool definition into deployable content
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, tool: &Tool) -> AppResult<GeneratedArtifact>;
}

/// Generator reached over HTTP
pub struct HttpArtifactGenerator {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    tool_id: Uuid,
    name: &'a str,
    description: Option<&'a str>,
    definition: &'a Value,
}

impl HttpArtifactGenerator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl ArtifactGenerator for HttpArtifactGenerator {
    async fn generate(&self, tool: &Tool) -> AppResult<GeneratedArtifact> {
        let request = GenerateRequest {
            tool_id: tool.id,
            name: &tool.name,
            description: tool.description.as_deref(),
            definition: &tool.definition,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::external(
                "artifact generator",
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }

        response
            .json::<GeneratedArtifact>()
            .await
            .map_err(|e| self.classify(e))
    }
}

impl HttpArtifactGenerator {
    fn classify(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::Timeout {
                operation: "artifact generator".to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            AppError::external("artifact generator", err.to_string())
        }
    }
}

/// Places artifact files on disk.
///
/// Every version is kept as an immutable release under
/// `<root>/.releases/<subdomain>/<version>/`; the live directory
/// `<root>/<subdomain>/` is kept in sync with exactly one release.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    shared_assets_dir: PathBuf,
    api_base_url: String,
}

impl ArtifactWriter {
    pub fn new(
        root: impl Into<PathBuf>,
        shared_assets_dir: impl Into<PathBuf>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            shared_assets_dir: shared_assets_dir.into(),
            api_base_url: api_base_url.into(),
        }
    }

    pub fn live_dir(&self, subdomain: &str) -> PathBuf {
        self.root.join(subdomain)
    }

    pub fn release_dir(&self, subdomain: &str, version: &str) -> PathBuf {
        self.root.join(RELEASES_DIR).join(subdomain).join(version)
    }

    fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Manifest written next to the artifact
    pub fn manifest(&self, tool: &Tool, version: &str, artifact: &GeneratedArtifact) -> Value {
        let features = artifact
            .manifest
            .get("features")
            .filter(|f| f.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));

        json!({
            "tool_id": tool.id,
            "name": tool.name,
            "version": version,
            "api_base_url": self.api_base_url,
            "features": features,
        })
    }

    /// Materialise a release and make it the live content. Returns the live directory.
    pub async fn write(
        &self,
        tool: &Tool,
        subdomain: &str,
        version: &str,
        artifact: &GeneratedArtifact,
    ) -> AppResult<PathBuf> {
        let release = self.release_dir(subdomain, version);
        let parent = release
            .parent()
            .ok_or_else(|| AppError::Internal("Release directory has no parent".to_string()))?;
        fs::create_dir_all(parent).await?;

        // Build next to the final location, then swap in
        let staging = parent.join(format!(".{}.tmp-{}", version, Uuid::new_v4()));
        fs::create_dir_all(&staging).await?;

        let manifest = serde_json::to_vec_pretty(&self.manifest(tool, version, artifact))
            .map_err(|e| AppError::Internal(format!("Failed to serialize manifest: {}", e)))?;

        let staged = async {
            fs::write(staging.join(MARKUP_FILE), artifact.markup.as_bytes()).await?;
            fs::write(staging.join(SCRIPT_FILE), artifact.behavior_script.as_bytes()).await?;
            fs::write(staging.join(MANIFEST_FILE), &manifest).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        self.copy_shared_assets(&staging).await;

        if fs::try_exists(&release).await? {
            fs::remove_dir_all(&release).await?;
        }
        fs::rename(&staging, &release).await?;

        let live = self.live_dir(subdomain);
        sync_dir(&release, &live).await?;

        tracing::info!(
            tool_id = %tool.id,
            subdomain = %subdomain,
            version = %version,
            live = %live.display(),
            "Artifact written"
        );

        Ok(live)
    }

    /// Replace the live content of `live_subdomain` with a stored release,
    /// backing up the current live directory first.
    pub async fn restore(
        &self,
        live_subdomain: &str,
        release_subdomain: &str,
        version: &str,
    ) -> AppResult<PathBuf> {
        let release = self.release_dir(release_subdomain, version);
        if !fs::try_exists(&release).await? {
            return Err(AppError::NotFound(format!("Release {} of {}", version, release_subdomain)));
        }

        let live = self.live_dir(live_subdomain);
        if fs::try_exists(&live).await? {
            let backup = self.backups_dir().join(format!(
                "{}-{}",
                live_subdomain,
                time::OffsetDateTime::now_utc().unix_timestamp_nanos()
            ));
            copy_dir(&live, &backup).await?;
            tracing::info!(subdomain = %live_subdomain, backup = %backup.display(), "Live artifact backed up");

            if let Err(e) = self.prune_backups(live_subdomain).await {
                tracing::warn!(subdomain = %live_subdomain, error = %e, "Failed to prune backups");
            }
        }

        sync_dir(&release, &live).await?;
        Ok(live)
    }

    /// Drop all but the newest `RETAINED_BACKUPS` backups of a subdomain
    async fn prune_backups(&self, subdomain: &str) -> AppResult<()> {
        let prefix = format!("{}-", subdomain);
        let mut backups = Vec::new();

        let mut entries = fs::read_dir(self.backups_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let stamp = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|rest| rest.parse::<i128>().ok());
            if let Some(stamp) = stamp {
                backups.push((stamp, entry.path()));
            }
        }

        if backups.len() <= RETAINED_BACKUPS {
            return Ok(());
        }
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in backups.drain(RETAINED_BACKUPS..) {
            fs::remove_dir_all(&path).await?;
            tracing::debug!(subdomain = %subdomain, backup = %path.display(), "Old backup removed");
        }
        Ok(())
    }

    async fn copy_shared_assets(&self, target: &Path) {
        for asset in SHARED_ASSETS {
            let source = self.shared_assets_dir.join(asset);
            if let Err(e) = fs::copy(&source, target.join(asset)).await {
                tracing::warn!(
                    asset = %source.display(),
                    error = %e,
                    "Shared asset not copied"
                );
            }
        }
    }
}

/// Write `contents` to `path` through a sibling temp file and rename
pub async fn write_atomic(path: &Path, contents: &[u8]) -> AppResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Internal(format!("{} has no parent", path.display())))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Internal(format!("{} has no file name", path.display())))?;

    fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".{}.tmp-{}", name, Uuid::new_v4()));

    if let Err(e) = fs::write(&tmp, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Make `target` hold exactly the regular files of `source`
async fn sync_dir(source: &Path, target: &Path) -> AppResult<()> {
    fs::create_dir_all(target).await?;

    let mut wanted = HashSet::new();
    let mut entries = fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let contents = fs::read(entry.path()).await?;
        write_atomic(&target.join(&name), &contents).await?;
        wanted.insert(name);
    }

    let mut existing = fs::read_dir(target).await?;
    while let Some(entry) = existing.next_entry().await? {
        if entry.file_type().await?.is_file() && !wanted.contains(&entry.file_name()) {
            fs::remove_file(entry.path()).await?;
        }
    }

    Ok(())
}

async fn copy_dir(source: &Path, target: &Path) -> AppResult<()> {
    fs::create_dir_all(target).await?;

    let mut entries = fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            fs::copy(entry.path(), target.join(entry.file_name())).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool() -> Tool {
        let now = time::OffsetDateTime::now_utc();
        Tool {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Unit Converter".to_string(),
            description: None,
            definition: json!({}),
            subdomain: Some("unit-converter".to_string()),
            deployed: false,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn artifact(label: &str) -> GeneratedArtifact {
        GeneratedArtifact {
            markup: format!("<h1>{}</h1>", label),
            behavior_script: format!("console.log('{}');", label),
            manifest: json!({ "features": { "dark_mode": true } }),
        }
    }

    fn writer(root: &TempDir, shared: &Path) -> ArtifactWriter {
        ArtifactWriter::new(root.path(), shared, "/api")
    }

    #[tokio::test]
    async fn test_write_creates_release_and_live_copy() {
        let root = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        std::fs::write(shared.path().join("favicon.ico"), b"icon").unwrap();

        let writer = writer(&root, shared.path());
        let tool = tool();
        let live = writer
            .write(&tool, "unit-converter", "1.0.1", &artifact("v1"))
            .await
            .unwrap();

        assert_eq!(live, root.path().join("unit-converter"));
        assert_eq!(
            std::fs::read_to_string(live.join(MARKUP_FILE)).unwrap(),
            "<h1>v1</h1>"
        );
        assert_eq!(std::fs::read(live.join("favicon.ico")).unwrap(), b"icon");

        let manifest: Value =
            serde_json::from_slice(&std::fs::read(live.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["version"], "1.0.1");
        assert_eq!(manifest["api_base_url"], "/api");
        assert_eq!(manifest["tool_id"], tool.id.to_string());
        assert_eq!(manifest["features"]["dark_mode"], true);

        let release = writer.release_dir("unit-converter", "1.0.1");
        assert!(release.join(SCRIPT_FILE).exists());
    }

    #[tokio::test]
    async fn test_missing_shared_asset_does_not_fail() {
        let root = TempDir::new().unwrap();
        let writer = writer(&root, Path::new("/definitely/not/here"));

        let live = writer
            .write(&tool(), "unit-converter", "1.0.1", &artifact("v1"))
            .await
            .unwrap();

        assert!(live.join(MARKUP_FILE).exists());
        assert!(!live.join("favicon.ico").exists());
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent_and_leaves_no_temp_files() {
        let root = TempDir::new().unwrap();
        let writer = writer(&root, root.path());
        let tool = tool();

        writer
            .write(&tool, "unit-converter", "1.0.1", &artifact("v1"))
            .await
            .unwrap();
        let live = writer
            .write(&tool, "unit-converter", "1.0.1", &artifact("v1"))
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(&live)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3, "{:?}", names);
        assert!(names.iter().all(|n| !n.contains(".tmp-")));
    }

    #[tokio::test]
    async fn test_restore_backs_up_and_matches_release() {
        let root = TempDir::new().unwrap();
        let writer = writer(&root, root.path());
        let tool = tool();

        writer
            .write(&tool, "unit-converter", "1.0.1", &artifact("v1"))
            .await
            .unwrap();
        let live = writer
            .write(&tool, "unit-converter", "1.0.2", &artifact("v2"))
            .await
            .unwrap();
        std::fs::write(live.join("stray.txt"), b"left over").unwrap();

        writer
            .restore("unit-converter", "unit-converter", "1.0.1")
            .await
            .unwrap();

        let release = writer.release_dir("unit-converter", "1.0.1");
        for file in [MARKUP_FILE, SCRIPT_FILE, MANIFEST_FILE] {
            assert_eq!(
                std::fs::read(live.join(file)).unwrap(),
                std::fs::read(release.join(file)).unwrap()
            );
        }
        assert!(!live.join("stray.txt").exists());

        let backups: Vec<_> = std::fs::read_dir(root.path().join(BACKUPS_DIR))
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_keeps_bounded_backups() {
        let root = TempDir::new().unwrap();
        let writer = writer(&root, root.path());
        let tool = tool();

        writer
            .write(&tool, "unit-converter", "1.0.1", &artifact("v1"))
            .await
            .unwrap();
        // Another subdomain sharing the name prefix is left alone
        let neighbour = root.path().join(BACKUPS_DIR).join("unit-converter-2-17");
        std::fs::create_dir_all(&neighbour).unwrap();

        for _ in 0..RETAINED_BACKUPS + 3 {
            writer
                .restore("unit-converter", "unit-converter", "1.0.1")
                .await
                .unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(root.path().join(BACKUPS_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), RETAINED_BACKUPS + 1, "{:?}", names);
        assert!(neighbour.exists());
    }

    #[tokio::test]
    async fn test_restore_missing_release_is_not_found() {
        let root = TempDir::new().unwrap();
        let writer = writer(&root, root.path());

        let result = writer.restore("unit-converter", "unit-converter", "1.0.9").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.txt");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
