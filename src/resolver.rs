//! 资源解析：把请求目标映射为根目录下的文件系统路径、资源类别与内容类型。

use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use log::{debug, warn};
use percent_encoding::percent_decode_str;

use crate::{
    cache::{DirectoryCache, Listing},
    exception::Exception,
    param::get_mime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Root,
    Directory,
    File,
    Missing,
}

/// 一次请求的解析结果，每个请求都重新计算
#[derive(Debug, Clone)]
pub struct Resource {
    pub kind: ResourceKind,
    /// 文件系统中的绝对路径
    pub path: PathBuf,
    /// 解码后的请求路径，用于页面标题与错误信息
    pub display_path: String,
    pub content_type: &'static str,
}

pub struct Resolver {
    root: PathBuf,
    listings: Arc<DirectoryCache>,
}

impl Resolver {
    /// `root` 会被规范化为绝对路径，因此必须存在。
    pub fn new(root: &Path, listings: Arc<DirectoryCache>) -> io::Result<Self> {
        let root = root.canonicalize()?;
        Ok(Self { root, listings })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析请求目标。
    ///
    /// # 步骤
    /// 1. 去掉查询串与片段，百分号解码。
    /// 2. 字面量 `/` 直接视为根目录索引。
    /// 3. 按路径分量规范化，`..` 越过根目录时返回 `PathEscapesRoot`。
    /// 4. 路径存在时取其真实路径（跟随符号链接），仍须位于根目录之内。
    ///
    /// 不存在的路径得到 `ResourceKind::Missing`，而不是错误。
    pub fn resolve(&self, target: &str, id: u128) -> Result<Resource, Exception> {
        let raw_path = target
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default();
        let decoded = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| Exception::ResourceNotFound(raw_path.to_string()))?
            .into_owned();

        if decoded == "/" {
            return Ok(Resource {
                kind: ResourceKind::Root,
                path: self.root.clone(),
                display_path: "/".to_string(),
                content_type: "text/html",
            });
        }

        let relative = normalize(&decoded)
            .ok_or_else(|| Exception::PathEscapesRoot(decoded.clone()))?;
        let candidate = self.root.join(&relative);
        let content_type = get_mime(&candidate);
        debug!("[ID{}]映射物理路径：{} ({})", id, candidate.display(), content_type);

        let real = match candidate.canonicalize() {
            Ok(real) => real,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Resource {
                    kind: ResourceKind::Missing,
                    path: candidate,
                    display_path: decoded,
                    content_type,
                });
            }
            Err(e) => {
                // 例如路径中间某一段是普通文件
                debug!("[ID{}]无法规范化路径{}：{}", id, candidate.display(), e);
                return Ok(Resource {
                    kind: ResourceKind::Missing,
                    path: candidate,
                    display_path: decoded,
                    content_type,
                });
            }
        };

        if !real.starts_with(&self.root) {
            warn!("[ID{}]路径{}指向根目录之外：{}", id, decoded, real.display());
            return Err(Exception::PathEscapesRoot(decoded));
        }

        let kind = match (real == self.root, real.is_dir()) {
            (true, _) => ResourceKind::Root,
            (false, true) => ResourceKind::Directory,
            (false, false) => ResourceKind::File,
        };

        Ok(Resource {
            kind,
            path: real,
            display_path: decoded,
            content_type,
        })
    }

    /// 目录列表，经由注入的目录缓存
    pub fn listing(&self, dir: &Path) -> io::Result<Listing> {
        self.listings.get_or_scan(dir)
    }

    pub fn listings(&self) -> &Arc<DirectoryCache> {
        &self.listings
    }
}

/// 按分量规范化请求路径，得到相对根目录的路径；`..` 越过根目录时返回 `None`
fn normalize(path: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) => parts.push(segment),
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Resolver) {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("a.txt")).unwrap();
        File::create(dir.path().join("sub").join("my page.html")).unwrap();
        let resolver = Resolver::new(dir.path(), Arc::new(DirectoryCache::new())).unwrap();
        (dir, resolver)
    }

    #[test]
    fn test_root() {
        let (_dir, resolver) = setup();
        let r = resolver.resolve("/", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::Root);
        assert_eq!(r.path, resolver.root());

        let r = resolver.resolve("/?x=1", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::Root);
    }

    #[test]
    fn test_file_and_directory() {
        let (_dir, resolver) = setup();
        let r = resolver.resolve("/a.txt", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::File);
        assert_eq!(r.content_type, "text/plain");
        assert_eq!(r.path, resolver.root().join("a.txt"));

        let r = resolver.resolve("/sub/", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::Directory);
        assert_eq!(r.display_path, "/sub/");
    }

    #[test]
    fn test_percent_decoding_and_query() {
        let (_dir, resolver) = setup();
        let r = resolver.resolve("/sub/my%20page.html?v=2#top", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::File);
        assert_eq!(r.content_type, "text/html");
        assert_eq!(r.display_path, "/sub/my page.html");
    }

    #[test]
    fn test_missing() {
        let (_dir, resolver) = setup();
        let r = resolver.resolve("/nope.txt", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::Missing);
        assert_eq!(r.display_path, "/nope.txt");

        let r = resolver.resolve("/a.txt/inner", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::Missing);
    }

    #[test]
    fn test_dot_segments_inside_root() {
        let (_dir, resolver) = setup();
        let r = resolver.resolve("/sub/../a.txt", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::File);
        let r = resolver.resolve("/sub/..", 0).unwrap();
        assert_eq!(r.kind, ResourceKind::Root);
    }

    #[test]
    fn test_traversal_rejected() {
        let (_dir, resolver) = setup();
        for target in [
            "/../etc/passwd",
            "/sub/../../etc/passwd",
            "/%2e%2e/%2e%2e/etc/passwd",
            "/..%2f..%2fetc%2fpasswd",
        ] {
            assert!(
                matches!(resolver.resolve(target, 0), Err(Exception::PathEscapesRoot(_))),
                "{} should be rejected",
                target
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_rejected() {
        let outside = TempDir::new().unwrap();
        File::create(outside.path().join("secret.txt")).unwrap();
        let (dir, resolver) = setup();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        assert!(matches!(
            resolver.resolve("/escape/secret.txt", 0),
            Err(Exception::PathEscapesRoot(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_escape_is_not_found() {
        let (_dir, resolver) = setup();
        assert!(matches!(
            resolver.resolve("/%ff%fe", 0),
            Err(Exception::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_listing_through_resolver_is_cached() {
        let (_dir, resolver) = setup();
        let root = resolver.root().to_path_buf();
        let listing = resolver.listing(&root).unwrap();
        assert_eq!(listing[0].label, "SUB/");
        assert_eq!(listing[1].label, "a.txt");
        assert_eq!(resolver.listings().len(), 1);
    }
}
