//! Path validation and confined filesystem helpers.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    /// The path is absolute, traverses upwards, or resolves outside the root.
    #[error("path escapes project root")]
    Escape,

    #[error("not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PathError {
    pub(crate) fn from_io(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            PathError::NotFound
        } else {
            PathError::Io(e)
        }
    }
}

/// Confines filesystem access to a project root.
///
/// The absolute form of the root is computed once at construction.
#[derive(Debug, Clone)]
pub struct PathValidator {
    root: PathBuf,
}

impl PathValidator {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a root-relative path to an absolute path strictly below the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, PathError> {
        if relative.contains('\0') || relative.starts_with('\\') {
            return Err(PathError::Escape);
        }
        let normalized = normalize(Path::new(relative)).ok_or(PathError::Escape)?;
        if normalized.as_os_str().is_empty() {
            return Err(PathError::Escape);
        }

        let joined = self.root.join(&normalized);

        // Symlinks may point anywhere; check the real target when it exists.
        match std::fs::canonicalize(&joined) {
            Ok(real) if !self.is_strict_descendant(&real) => Err(PathError::Escape),
            _ if !self.is_strict_descendant(&joined) => Err(PathError::Escape),
            _ => Ok(joined),
        }
    }

    fn is_strict_descendant(&self, path: &Path) -> bool {
        path != self.root && path.starts_with(&self.root)
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, PathError> {
        let path = self.resolve(relative)?;
        tokio::fs::read(path).await.map_err(PathError::from_io)
    }

    pub async fn read_to_string(&self, relative: &str) -> Result<String, PathError> {
        let path = self.resolve(relative)?;
        tokio::fs::read_to_string(path)
            .await
            .map_err(PathError::from_io)
    }

    /// Synchronous read for callers already running on the blocking pool.
    pub fn read_to_string_blocking(&self, relative: &str) -> Result<String, PathError> {
        let path = self.resolve(relative)?;
        std::fs::read_to_string(path).map_err(PathError::from_io)
    }

    pub async fn write(&self, relative: &str, contents: impl AsRef<[u8]>) -> Result<(), PathError> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    pub async fn stat(&self, relative: &str) -> Result<std::fs::Metadata, PathError> {
        let path = self.resolve(relative)?;
        tokio::fs::metadata(path).await.map_err(PathError::from_io)
    }

    pub async fn exists(&self, relative: &str) -> bool {
        self.stat(relative).await.is_ok()
    }

    pub async fn mkdir(&self, relative: &str) -> Result<PathBuf, PathError> {
        let path = self.resolve(relative)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Files directly inside `dir` with the given extension, as root-relative
    /// paths sorted by name. A missing directory yields an empty list.
    pub async fn glob(&self, dir: &str, extension: &str) -> Result<Vec<String>, PathError> {
        let path = self.resolve(dir)?;
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if Path::new(&name).extension().and_then(|e| e.to_str()) == Some(extension) {
                found.push(format!("{}/{}", dir.trim_end_matches('/'), name));
            }
        }
        found.sort();
        Ok(found)
    }

    /// All files below `dir`, recursively, as root-relative paths sorted by name.
    pub async fn walk(&self, dir: &str) -> Result<Vec<String>, PathError> {
        let mut pending = vec![dir.trim_end_matches('/').to_string()];
        let mut found = Vec::new();

        while let Some(current) = pending.pop() {
            let path = self.resolve(&current)?;
            let mut entries = match tokio::fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child = format!("{}/{}", current, name);
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(child);
                } else if file_type.is_file() {
                    found.push(child);
                }
            }
        }

        found.sort();
        Ok(found)
    }
}

/// Lexically normalize a relative path. Returns `None` for absolute paths and
/// for paths that climb above their starting point.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> (tempfile::TempDir, PathValidator) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sites/a.test/public")).unwrap();
        std::fs::write(dir.path().join("sites/a.test/public/app.css"), "body{}").unwrap();
        let v = PathValidator::new(dir.path()).unwrap();
        (dir, v)
    }

    #[test]
    fn resolves_descendants() {
        let (_dir, v) = validator();
        let path = v.resolve("sites/a.test/public/app.css").unwrap();
        assert!(path.starts_with(v.root()));
        assert!(path.ends_with("app.css"));
    }

    #[test]
    fn refuses_absolute_and_traversal() {
        let (_dir, v) = validator();
        assert!(matches!(v.resolve("/etc/passwd"), Err(PathError::Escape)));
        assert!(matches!(v.resolve("../outside"), Err(PathError::Escape)));
        assert!(matches!(
            v.resolve("sites/a.test/public/../../../../etc/passwd"),
            Err(PathError::Escape)
        ));
        assert!(matches!(v.resolve(""), Err(PathError::Escape)));
        assert!(matches!(v.resolve("."), Err(PathError::Escape)));
    }

    #[test]
    fn inner_parent_segments_are_normalized() {
        let (_dir, v) = validator();
        let path = v.resolve("sites/a.test/public/../public/app.css").unwrap();
        assert!(path.ends_with("sites/a.test/public/app.css"));
    }

    #[cfg(unix)]
    #[test]
    fn refuses_symlink_escape() {
        let (dir, v) = validator();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("sites/link")).unwrap();
        assert!(matches!(v.resolve("sites/link/secret"), Err(PathError::Escape)));
    }

    #[tokio::test]
    async fn walk_and_glob() {
        let (dir, v) = validator();
        std::fs::create_dir_all(dir.path().join("sites/a.test/pages/blog")).unwrap();
        std::fs::write(dir.path().join("sites/a.test/pages/index.html"), "").unwrap();
        std::fs::write(dir.path().join("sites/a.test/pages/blog/post.html"), "").unwrap();
        std::fs::write(dir.path().join("sites/a.test/pages/notes.txt"), "").unwrap();

        let all = v.walk("sites/a.test/pages").await.unwrap();
        assert_eq!(
            all,
            vec![
                "sites/a.test/pages/blog/post.html",
                "sites/a.test/pages/index.html",
                "sites/a.test/pages/notes.txt",
            ]
        );

        let html = v.glob("sites/a.test/pages", "html").await.unwrap();
        assert_eq!(html, vec!["sites/a.test/pages/index.html"]);

        assert!(v.glob("sites/a.test/missing", "html").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_creates_parents() {
        let (_dir, v) = validator();
        v.write("sites/a.test/data/out.txt", "hi").await.unwrap();
        assert_eq!(v.read_to_string("sites/a.test/data/out.txt").await.unwrap(), "hi");
        assert!(matches!(
            v.read_to_string("sites/a.test/data/none.txt").await,
            Err(PathError::NotFound)
        ));
    }
}
