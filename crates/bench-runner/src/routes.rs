use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const ROUTE_EXTENSION: &str = "xml";

/// One route file found in a configuration's route directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDescriptor {
    pub path: PathBuf,
    pub file_name: String,
}

impl RouteDescriptor {
    /// Last `_`-delimited token of the file stem, e.g. `7` for `route_7.xml`.
    pub fn suffix(&self) -> &str {
        let stem = Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.file_name);
        stem.rsplit('_').next().unwrap_or(stem)
    }

    /// Suffix left-padded with zeros to `width`. Longer suffixes are kept as is.
    pub fn route_id(&self, width: usize) -> String {
        format!("{:0>width$}", self.suffix(), width = width)
    }
}

/// Lists route files directly under `dir`, sorted by file name bytes.
///
/// Sorting is lexicographic, not numeric: `route_10.xml` comes before
/// `route_2.xml`. Job identity depends on this order staying stable.
pub fn discover_routes(dir: &Path) -> Result<Vec<RouteDescriptor>> {
    if !dir.is_dir() {
        bail!("route directory {} is not a directory", dir.display());
    }
    let mut routes = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry =
            entry.with_context(|| format!("failed to list route directory {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ROUTE_EXTENSION) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %path.display(), "skipping route with non UTF-8 name");
            continue;
        };
        routes.push(RouteDescriptor {
            file_name: file_name.to_string(),
            path: path.to_path_buf(),
        });
    }
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::scratch_dir;
    use std::fs;

    fn route(name: &str) -> RouteDescriptor {
        RouteDescriptor {
            path: PathBuf::from("/routes").join(name),
            file_name: name.to_string(),
        }
    }

    #[test]
    fn discovery_is_lexicographic_and_filters_extension() {
        let dir = scratch_dir("routes_order");
        for name in [
            "route_10.xml",
            "route_2.xml",
            "route_1.xml",
            "notes.txt",
            "route_3.xml.bak",
        ] {
            fs::write(dir.join(name), "<routes/>").expect("write route");
        }
        let routes = discover_routes(&dir).expect("discover");
        let names: Vec<&str> = routes.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["route_1.xml", "route_10.xml", "route_2.xml"]);
        assert_eq!(routes[0].path, dir.join("route_1.xml"));

        let again = discover_routes(&dir).expect("discover again");
        assert_eq!(routes, again);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn discovery_of_empty_directory_is_empty() {
        let dir = scratch_dir("routes_empty");
        assert!(discover_routes(&dir).expect("discover").is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = scratch_dir("routes_missing").join("absent");
        assert!(discover_routes(&dir).is_err());
    }

    #[test]
    fn route_file_instead_of_directory_is_an_error() {
        let dir = scratch_dir("routes_file");
        let file = dir.join("route_1.xml");
        fs::write(&file, "<routes/>").expect("write route");
        let err = discover_routes(&file).expect_err("a file is not a route directory");
        assert!(err.to_string().contains("is not a directory"), "{}", err);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn route_id_takes_last_underscore_token() {
        assert_eq!(route("route_7.xml").route_id(3), "007");
        assert_eq!(route("route_7.xml").route_id(2), "07");
        assert_eq!(route("bench2drive_town05_1711.xml").route_id(3), "1711");
        assert_eq!(route("42.xml").route_id(3), "042");
    }
}
