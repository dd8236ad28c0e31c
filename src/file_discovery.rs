use crate::error::{Result, ValidationError};
use globset::{GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Directory under each workspace root that holds the book's modules
pub const MODULES_DIR: &str = "modules";

/// Extension of module content files
pub const MODULE_EXTENSION: &str = "cnxml";

/// Async walk that collects module files
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// Exclude patterns set
    exclude_set: Option<GlobSet>,
    /// Maximum depth for directory traversal (None = unlimited)
    max_depth: Option<usize>,
    /// Follow symbolic links
    follow_symlinks: bool,
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            exclude_set: None,
            max_depth: None,
            follow_symlinks: false,
        }
    }

    /// Skip files whose full path matches any of `patterns`
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.exclude_set = build_glob_set(patterns)?;
        Ok(self)
    }

    /// Set maximum traversal depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Discover files asynchronously in the given path (file or directory)
    pub async fn discover_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let metadata = fs::metadata(path).await.map_err(ValidationError::from)?;

        if metadata.is_file() {
            if self.should_process(path) {
                return Ok(vec![path.to_path_buf()]);
            } else {
                return Ok(Vec::new());
            }
        }

        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(ValidationError::from)?;

        while let Some(entry) = read_dir.next_entry().await.map_err(ValidationError::from)? {
            let entry_path = entry.path();

            if entry_path.is_symlink() && !self.follow_symlinks {
                continue;
            }

            if let Err(e) = self
                .discover_files_recursive(&entry_path, 0, &mut files)
                .await
            {
                // Log error but continue processing other files
                warn!(path = %entry_path.display(), error = %e, "Error while discovering files");
            }
        }

        Ok(files)
    }

    fn discover_files_recursive<'a>(
        &'a self,
        path: &'a Path,
        depth: usize,
        files: &'a mut Vec<PathBuf>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(max_depth) = self.max_depth
                && depth > max_depth
            {
                return Ok(());
            }

            let metadata = fs::metadata(path).await.map_err(ValidationError::from)?;

            if metadata.is_file() {
                if self.should_process(path) {
                    files.push(path.to_path_buf());
                }
            } else if metadata.is_dir() {
                if let Some(max_depth) = self.max_depth
                    && depth >= max_depth
                {
                    return Ok(());
                }

                let mut read_dir = fs::read_dir(path).await.map_err(ValidationError::from)?;

                while let Some(entry) =
                    read_dir.next_entry().await.map_err(ValidationError::from)?
                {
                    let entry_path = entry.path();

                    if entry_path.is_symlink() && !self.follow_symlinks {
                        continue;
                    }

                    if let Err(e) = self
                        .discover_files_recursive(&entry_path, depth + 1, files)
                        .await
                    {
                        warn!(path = %entry_path.display(), error = %e, "Error while discovering files");
                    }
                }
            }

            Ok(())
        })
    }

    /// A `.cnxml` file that no exclude pattern matches
    pub fn should_process(&self, path: &Path) -> bool {
        let is_module = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MODULE_EXTENSION));

        is_module
            && !self
                .exclude_set
                .as_ref()
                .is_some_and(|exclude_set| exclude_set.is_match(path))
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

fn build_glob_set(patterns: Vec<String>) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                ValidationError::Config(format!("Invalid glob pattern '{}': {}", pattern, e))
            })?;
        builder.add(glob);
    }

    let set = builder.build().map_err(|e| {
        ValidationError::Config(format!("Failed to build exclude glob set: {}", e))
    })?;
    Ok(Some(set))
}

/// Known sibling modules, as absolute paths, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleCatalog {
    modules: Vec<PathBuf>,
}

impl ModuleCatalog {
    pub fn new(modules: Vec<PathBuf>) -> Self {
        Self { modules }
    }

    /// Collect `modules/**/*.cnxml` under every workspace root.
    ///
    /// Roots without a `modules` directory contribute nothing. Paths are sorted
    /// within a root; roots keep the order they were given in.
    pub async fn discover(workspace_roots: &[PathBuf]) -> Result<Self> {
        Self::discover_with(workspace_roots, &FileDiscovery::new()).await
    }

    /// [`ModuleCatalog::discover`] with configured exclusions, depth and symlink policy
    pub async fn discover_with(
        workspace_roots: &[PathBuf],
        discovery: &FileDiscovery,
    ) -> Result<Self> {
        let mut modules = Vec::new();

        for root in workspace_roots {
            let modules_path = root.join(MODULES_DIR);
            if !fs::try_exists(&modules_path).await.unwrap_or(false) {
                debug!(root = %root.display(), "Workspace has no modules directory");
                continue;
            }
            let mut found = discovery.discover_files(&modules_path).await?;
            found.sort();
            modules.extend(found);
        }

        Ok(Self { modules })
    }

    /// First module whose path contains `module` as a substring
    pub fn find(&self, module: &str) -> Option<&Path> {
        self.modules
            .iter()
            .find(|path| path.to_string_lossy().contains(module))
            .map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.modules.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module paths that differ only by letter case, keyed by the lower-cased
    /// path. Such files collide on case-insensitive file systems.
    pub fn duplicate_file_names(&self) -> Vec<(String, Vec<PathBuf>)> {
        let mut by_name: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for path in &self.modules {
            by_name
                .entry(path.to_string_lossy().to_lowercase())
                .or_default()
                .push(path.clone());
        }
        by_name
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::fs;

    async fn create_test_workspace() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("modules/m100")).await.unwrap();
        fs::create_dir_all(root.join("modules/m200/nested"))
            .await
            .unwrap();
        fs::create_dir_all(root.join("collections")).await.unwrap();

        fs::write(root.join("modules/m100/index.cnxml"), "<document/>")
            .await
            .unwrap();
        fs::write(root.join("modules/m200/index.cnxml"), "<document/>")
            .await
            .unwrap();
        fs::write(root.join("modules/m200/figure.png"), "png")
            .await
            .unwrap();
        fs::write(root.join("modules/m200/nested/extra.cnxml"), "<document/>")
            .await
            .unwrap();
        fs::write(root.join("collections/book.collection.xml"), "<col/>")
            .await
            .unwrap();

        temp_dir
    }

    #[tokio::test]
    async fn test_discover_cnxml_files() {
        let temp_dir = create_test_workspace().await;
        let discovery = FileDiscovery::new();

        let files = discovery
            .discover_files(&temp_dir.path().join("modules"))
            .await
            .unwrap();

        assert_eq!(files.len(), 3);
        let file_names: HashSet<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(file_names.contains("index.cnxml"));
        assert!(file_names.contains("extra.cnxml"));
    }

    #[tokio::test]
    async fn test_max_depth_limit() {
        let temp_dir = create_test_workspace().await;
        let discovery = FileDiscovery::new().with_max_depth(Some(1));

        let files = discovery
            .discover_files(&temp_dir.path().join("modules"))
            .await
            .unwrap();

        // modules/<id>/index.cnxml is depth 1; nested/extra.cnxml is depth 2
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_exclude_patterns() {
        let temp_dir = create_test_workspace().await;
        let discovery = FileDiscovery::new()
            .with_exclude_patterns(vec!["**/nested/**".to_string()])
            .unwrap();

        let files = discovery
            .discover_files(&temp_dir.path().join("modules"))
            .await
            .unwrap();

        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_glob_pattern() {
        let result = FileDiscovery::new().with_exclude_patterns(vec!["a[".to_string()]);
        assert!(matches!(result, Err(ValidationError::Config(_))));
    }

    #[tokio::test]
    async fn test_should_process() {
        let discovery = FileDiscovery::new();

        assert!(discovery.should_process(Path::new("index.cnxml")));
        assert!(discovery.should_process(Path::new("INDEX.CNXML")));
        assert!(!discovery.should_process(Path::new("index.xml")));
        assert!(!discovery.should_process(Path::new("index")));

        let discovery = FileDiscovery::new()
            .with_exclude_patterns(vec!["**/drafts/**".to_string()])
            .unwrap();
        assert!(!discovery.should_process(Path::new("/book/modules/drafts/m1/index.cnxml")));
        assert!(discovery.should_process(Path::new("/book/modules/m1/index.cnxml")));
    }

    #[tokio::test]
    async fn test_nonexistent_directory() {
        let discovery = FileDiscovery::new();
        let result = discovery
            .discover_files(Path::new("/nonexistent/path"))
            .await;

        assert!(matches!(result, Err(ValidationError::Io(_))));
    }

    #[tokio::test]
    async fn test_catalog_discovery_is_sorted() {
        let temp_dir = create_test_workspace().await;
        let catalog = ModuleCatalog::discover(&[temp_dir.path().to_path_buf()])
            .await
            .unwrap();

        let modules_dir = temp_dir.path().join("modules");
        let expected = vec![
            modules_dir.join("m100/index.cnxml"),
            modules_dir.join("m200/index.cnxml"),
            modules_dir.join("m200/nested/extra.cnxml"),
        ];
        assert_eq!(catalog.iter().map(Path::to_path_buf).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_catalog_discovery_with_exclusions() {
        let temp_dir = create_test_workspace().await;
        let discovery = FileDiscovery::new()
            .with_exclude_patterns(vec!["**/nested/**".to_string()])
            .unwrap();
        let catalog = ModuleCatalog::discover_with(&[temp_dir.path().to_path_buf()], &discovery)
            .await
            .unwrap();

        let modules_dir = temp_dir.path().join("modules");
        assert_eq!(
            catalog.iter().map(Path::to_path_buf).collect::<Vec<_>>(),
            vec![
                modules_dir.join("m100/index.cnxml"),
                modules_dir.join("m200/index.cnxml"),
            ]
        );
    }

    #[tokio::test]
    async fn test_catalog_skips_roots_without_modules() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = ModuleCatalog::discover(&[
            temp_dir.path().to_path_buf(),
            PathBuf::from("/nonexistent/workspace"),
        ])
        .await
        .unwrap();

        assert!(catalog.is_empty());
    }

    #[test]
    fn test_find_uses_first_substring_match() {
        let catalog = ModuleCatalog::new(vec![
            PathBuf::from("/book/modules/m1234/index.cnxml"),
            PathBuf::from("/book/modules/m123/index.cnxml"),
        ]);

        // "m123" is a substring of "m1234", so the first entry wins
        assert_eq!(
            catalog.find("m123"),
            Some(Path::new("/book/modules/m1234/index.cnxml"))
        );
        assert_eq!(catalog.find("m999"), None);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_duplicate_file_names() {
        let catalog = ModuleCatalog::new(vec![
            PathBuf::from("/book/modules/m1/index.cnxml"),
            PathBuf::from("/book/modules/M1/index.cnxml"),
            PathBuf::from("/book/modules/m2/index.cnxml"),
        ]);

        let duplicates = catalog.duplicate_file_names();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].0, "/book/modules/m1/index.cnxml");
        assert_eq!(
            duplicates[0].1,
            vec![
                PathBuf::from("/book/modules/m1/index.cnxml"),
                PathBuf::from("/book/modules/M1/index.cnxml"),
            ]
        );
    }
}
