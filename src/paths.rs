//! Path resolution with traversal protection
//!
//! Every path built from caller input (script names, project-relative state
//! files, message files) goes through [`resolve`], which normalizes lexically
//! and refuses anything that ends up outside its base directory. Writers call
//! [`is_path_safe`] again right before touching the filesystem.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::config::Config;
use crate::error::{Result, ValidationError};

/// Lexically normalize a path: drop `.`, apply `..`, keep the root.
///
/// Does not touch the filesystem, so symlinks are not followed.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Join `relative` onto `base` and verify the result stays inside `base`.
///
/// An absolute `relative` replaces the base entirely and is then rejected
/// unless it happens to point inside `base`. Containment is checked
/// component-wise, so `/srv/app2` is not inside `/srv/app`.
pub fn resolve(base: impl AsRef<Path>, relative: impl AsRef<Path>) -> Result<PathBuf> {
    let base = base.as_ref();
    let relative = relative.as_ref();

    if !base.is_absolute() {
        return Err(ValidationError::RelativeBase(base.to_path_buf()).into());
    }

    let base = normalize(base);
    let resolved = normalize(&base.join(relative));

    if resolved.starts_with(&base) {
        Ok(resolved)
    } else {
        warn!(
            "Rejected path traversal: {:?} escapes {:?}",
            relative, base
        );
        Err(ValidationError::PathTraversal {
            base,
            candidate: relative.display().to_string(),
        }
        .into())
    }
}

/// Side-effect free re-check that `candidate` lies within `base`
pub fn is_path_safe(candidate: impl AsRef<Path>, base: impl AsRef<Path>) -> bool {
    let base = base.as_ref();
    if !base.is_absolute() {
        return false;
    }
    let base = normalize(base);
    normalize(&base.join(candidate.as_ref())).starts_with(&base)
}

/// Resolves script and project paths against configured base directories
#[derive(Debug, Clone)]
pub struct PathResolver {
    bundled_scripts_dir: PathBuf,
    scripts_override: Option<PathBuf>,
    projects_dir: PathBuf,
}

impl PathResolver {
    pub fn new(
        bundled_scripts_dir: impl Into<PathBuf>,
        scripts_override: Option<PathBuf>,
        projects_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bundled_scripts_dir: bundled_scripts_dir.into(),
            scripts_override,
            projects_dir: projects_dir.into(),
        }
    }

    /// Build from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.bundled_scripts_dir()?,
            config.scripts_dir.clone(),
            config.projects_dir()?,
        ))
    }

    /// Directory scripts are currently taken from (override wins)
    pub fn scripts_base(&self) -> &Path {
        self.scripts_override
            .as_deref()
            .unwrap_or(&self.bundled_scripts_dir)
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Locate a script by name.
    ///
    /// `override_dir` takes precedence over the configured override, which
    /// takes precedence over the bundled directory. The final candidate is
    /// always resolved against whichever base was chosen.
    pub fn script_path(&self, name: &str, override_dir: Option<&Path>) -> Result<PathBuf> {
        let base = override_dir.unwrap_or_else(|| self.scripts_base());
        resolve(base, name)
    }

    /// Resolve a path relative to the projects directory
    pub fn project_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        resolve(&self.projects_dir, relative)
    }

    /// Whether an absolute path points inside the active scripts directory
    pub fn is_script(&self, candidate: &Path) -> bool {
        candidate.is_absolute() && is_path_safe(candidate, self.scripts_base())
    }
}
