//! Resource loader
//!
//! Turns the `--resources` list into effects. Every entry is classified up
//! front, so an unsupported file aborts the run before anything is applied.
//! Declarative manifests are submitted document by document; procedural
//! files select a compiled-in scenario module by their stem.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::resource::from_value;
use crate::scenario::TreeBuilder;
use crate::scenarios::ScenarioCatalog;
use crate::yaml::parse_documents;
use crate::{Error, Result};

const DECLARATIVE_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];
const PROCEDURAL_EXTENSIONS: &[&str] = &["js", "ts"];

/// How a resource file is consumed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// Manifest applied to the cluster
    Declarative,
    /// Scenario module registered into the tree
    Procedural,
}

impl InputKind {
    /// Kind for `path` by its (case-insensitive) extension
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if DECLARATIVE_EXTENSIONS.contains(&ext.as_str()) {
            Some(InputKind::Declarative)
        } else if PROCEDURAL_EXTENSIONS.contains(&ext.as_str()) {
            Some(InputKind::Procedural)
        } else {
            None
        }
    }
}

/// Classified resource files
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadPlan {
    /// Manifests, CRD files first, otherwise in list order
    pub declarative: Vec<PathBuf>,
    /// Scenario sources in list order
    pub procedural: Vec<PathBuf>,
}

impl LoadPlan {
    /// Whether nothing was listed
    pub fn is_empty(&self) -> bool {
        self.declarative.is_empty() && self.procedural.is_empty()
    }
}

/// Whether a manifest holds CustomResourceDefinitions (`*-crd.yaml`, `*-crds.json`, ...)
pub fn is_crd_manifest(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| {
            let stem = stem.to_lowercase();
            stem.ends_with("-crd") || stem.ends_with("-crds")
        })
        .unwrap_or(false)
}

/// Classify a comma-separated resource list.
///
/// Empty entries are skipped and directories are expanded to their entries
/// in name order. Nothing is read or applied here.
pub fn classify(resources: &str) -> Result<LoadPlan> {
    let mut plan = LoadPlan::default();
    for entry in resources.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        classify_path(Path::new(entry), &mut plan)?;
    }
    // stable: CRDs keep their relative order, as does everything else
    plan.declarative.sort_by_key(|p| !is_crd_manifest(p));
    Ok(plan)
}

fn classify_path(path: &Path, plan: &mut LoadPlan) -> Result<()> {
    if path.is_dir() {
        let mut entries = std::fs::read_dir(path)
            .map_err(|e| Error::io(path, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| Error::io(path, e))?;
        entries.sort();
        debug!(dir = %path.display(), entries = entries.len(), "expanding directory");
        for entry in entries {
            classify_path(&entry, plan)?;
        }
        return Ok(());
    }

    match InputKind::of(path) {
        Some(InputKind::Declarative) => plan.declarative.push(path.to_path_buf()),
        Some(InputKind::Procedural) => plan.procedural.push(path.to_path_buf()),
        None => {
            return Err(Error::UnsupportedInput {
                path: path.to_path_buf(),
            })
        }
    }
    Ok(())
}

// =============================================================================
// Declarative
// =============================================================================

/// Result of applying one manifest file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Documents the server accepted
    pub created: usize,
    /// Documents rejected with a Status response
    pub ignored: usize,
}

/// Submit every document of a manifest file, in order.
///
/// Status rejections (already exists, forbidden, ...) are logged and skipped;
/// any other failure stops the file with earlier documents left applied.
pub async fn apply_declarative(cluster: &dyn ClusterApi, path: &Path) -> Result<ApplyReport> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    let documents = parse_documents(&content).map_err(|e| Error::Manifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    info!(file = %path.display(), documents = documents.len(), "applying manifest");

    let mut report = ApplyReport::default();
    for document in documents {
        let object = from_value(document).map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let kind = object
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .unwrap_or_default();
        let name = object
            .metadata
            .name
            .clone()
            .or_else(|| object.metadata.generate_name.clone())
            .unwrap_or_default();

        match cluster.create(object).await {
            Ok(_) => {
                info!("- {} {} created", kind, name);
                report.created += 1;
            }
            Err(e) if e.is_status() => {
                info!("- Ignore error: {}", e.status_message().unwrap_or_default());
                report.ignored += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

/// Apply every declarative file of `plan`, in plan order
pub async fn apply_all(cluster: &dyn ClusterApi, plan: &LoadPlan) -> Result<ApplyReport> {
    let mut total = ApplyReport::default();
    for path in &plan.declarative {
        let report = apply_declarative(cluster, path).await?;
        total.created += report.created;
        total.ignored += report.ignored;
    }
    Ok(total)
}

// =============================================================================
// Procedural
// =============================================================================

/// Register the scenario module named by `path` into `builder`.
///
/// The file must exist; its stem selects the module.
pub fn load_procedural(
    catalog: &ScenarioCatalog,
    builder: &mut TreeBuilder,
    path: &Path,
) -> Result<()> {
    std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::validation(format!("{} has no file name", path.display())))?;
    catalog.load(name, builder)?;
    info!(file = %path.display(), module = name, "loaded scenario module");
    Ok(())
}
