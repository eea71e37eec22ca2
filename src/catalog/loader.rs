//! Recipe file loading.
//!
//! A recipe is one TOML file describing one package version:
//!
//! ```toml
//! [package]
//! name = "curl"
//! version = "8.8.0"
//! summary = "Command line tool and library for transferring data with URLs"
//! deps = ["zlib@^1.3", "openssl"]
//!
//! [source]
//! url = "https://curl.se/download/curl-8.8.0.tar.gz"
//! blake3 = "..."
//! strip-components = 1
//!
//! [build]
//! options = { ssl = "openssl" }
//! steps = [
//!     "./configure --prefix=$PREFIX",
//!     "make -j$JOBS",
//!     "make install",
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::types::{Blake3Hash, PackageName, PackageSpec, Version};

use super::{
    ArtifactFormat, Catalog, CatalogError, DependencyRef, PackageDescriptor, SourceSpec,
};

#[derive(Deserialize)]
struct RecipeFile {
    package: RecipePackage,
    source: RecipeSource,
    #[serde(default)]
    build: RecipeBuild,
}

#[derive(Deserialize)]
struct RecipePackage {
    name: String,
    version: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    homepage: String,
    /// Dependency specs in declaration order.
    #[serde(default)]
    deps: Vec<String>,
}

#[derive(Deserialize)]
struct RecipeSource {
    url: String,
    blake3: Blake3Hash,
    format: Option<ArtifactFormat>,
    #[serde(default = "default_strip", rename = "strip-components")]
    strip_components: u32,
}

fn default_strip() -> u32 {
    1
}

#[derive(Default, Deserialize)]
struct RecipeBuild {
    #[serde(default)]
    options: BTreeMap<String, String>,
    #[serde(default)]
    steps: Vec<String>,
}

/// Load every `*.toml` recipe under `dir` into a catalog.
///
/// Files are visited in sorted path order so duplicate detection is
/// deterministic. Subdirectories are searched recursively, matching the
/// sharded recipe repositories the descriptors are distributed in.
pub fn load_dir(dir: &Path) -> Result<Catalog, CatalogError> {
    let mut catalog = Catalog::new();

    let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| {
            e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "toml")
        })
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    for path in paths {
        let descriptor = load_file(&path)?;
        catalog.insert(descriptor)?;
    }

    Ok(catalog)
}

/// Load and validate a single recipe file.
pub fn load_file(path: &Path) -> Result<PackageDescriptor, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let recipe: RecipeFile = toml::from_str(&content).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    descriptor_from_recipe(recipe, path)
}

fn descriptor_from_recipe(
    recipe: RecipeFile,
    path: &Path,
) -> Result<PackageDescriptor, CatalogError> {
    let invalid = |reason: String| CatalogError::Invalid {
        path: path.to_path_buf(),
        reason,
    };

    if recipe.package.name.trim().is_empty() {
        return Err(invalid("package.name must not be empty".to_string()));
    }
    if recipe.package.version.trim().is_empty() {
        return Err(invalid("package.version must not be empty".to_string()));
    }
    if recipe.source.url.trim().is_empty() {
        return Err(invalid("source.url must not be empty".to_string()));
    }
    if recipe.build.steps.iter().any(|s| s.trim().is_empty()) {
        return Err(invalid("build.steps must not contain empty steps".to_string()));
    }

    let name = PackageName::new(&recipe.package.name);

    let mut deps = Vec::with_capacity(recipe.package.deps.len());
    for raw in &recipe.package.deps {
        let parsed = PackageSpec::parse(raw)
            .map_err(|e| invalid(format!("invalid dependency '{raw}': {e}")))?;
        if parsed.name == name {
            return Err(invalid(format!("package depends on itself via '{raw}'")));
        }
        deps.push(DependencyRef {
            name: parsed.name,
            constraint: parsed.constraint,
            raw: raw.clone(),
        });
    }

    let format = recipe
        .source
        .format
        .unwrap_or_else(|| ArtifactFormat::infer_from_url(&recipe.source.url));

    Ok(PackageDescriptor {
        name,
        version: Version::new(recipe.package.version.trim()),
        summary: recipe.package.summary,
        homepage: recipe.package.homepage,
        deps,
        source: SourceSpec {
            url: recipe.source.url,
            blake3: recipe.source.blake3,
            format,
            strip_components: recipe.source.strip_components,
        },
        steps: recipe.build.steps,
        options: recipe.build.options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HASH: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";

    fn write_recipe(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    fn sample_recipe(name: &str, version: &str, deps: &str) -> String {
        format!(
            r#"
[package]
name = "{name}"
version = "{version}"

deps = {deps}

[source]
url = "https://example.com/{name}-{version}.tar.gz"
blake3 = "{SAMPLE_HASH}"

[build]
steps = ["make install"]
"#
        )
    }

    #[test]
    fn test_load_dir() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "zlib.toml", &sample_recipe("zlib", "1.3.1", "[]"));
        write_recipe(
            tmp.path(),
            "curl.toml",
            &sample_recipe("curl", "8.8.0", r#"["zlib@^1.3"]"#),
        );

        let catalog = load_dir(tmp.path()).unwrap();
        assert_eq!(catalog.len(), 2);

        let curl = catalog.find(&PackageName::new("curl")).unwrap();
        assert_eq!(curl[0].deps.len(), 1);
        assert_eq!(curl[0].deps[0].name, "zlib");
        assert_eq!(curl[0].source.strip_components, 1);
        assert_eq!(curl[0].source.format, ArtifactFormat::TarGz);
    }

    #[test]
    fn test_parse_error_names_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(tmp.path(), "broken.toml", "not [valid toml");

        let err = load_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_invalid_checksum_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let recipe = sample_recipe("zlib", "1.3.1", "[]").replace(SAMPLE_HASH, "deadbeef");
        write_recipe(tmp.path(), "zlib.toml", &recipe);

        let err = load_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(
            tmp.path(),
            "zlib.toml",
            &sample_recipe("zlib", "1.3.1", r#"["zlib"]"#),
        );

        let err = load_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { .. }));
    }

    #[test]
    fn test_missing_source_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_recipe(
            tmp.path(),
            "meta.toml",
            r#"
[package]
name = "meta"
version = "1.0.0"
"#,
        );

        let err = load_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
    }
}
