//! Locating effect sources on disk.
//!
//! File-backed effects name their source with a short string. A
//! [`ResourceLookup`] turns that name into a readable path; [`SearchPaths`]
//! is the filesystem implementation used by the viewer, applying `$VAR` and
//! `~` expansion before trying the working directory and then each configured
//! root in order.

use std::env;
use std::path::{Path, PathBuf};

use directories_next::BaseDirs;
use tracing::{debug, warn};

use crate::error::ResourceError;

/// Maps a resource name to a file path, if one exists.
pub trait ResourceLookup {
    fn find(&self, name: &str) -> Option<PathBuf>;
}

/// Reads the effect body named `name` through `lookup`.
pub fn read_shader_source(lookup: &dyn ResourceLookup, name: &str) -> Result<String, ResourceError> {
    if name.trim().is_empty() {
        return Err(ResourceError::InvalidPath {
            name: name.to_string(),
            reason: "name must not be empty".into(),
        });
    }
    let path = lookup
        .find(name)
        .ok_or_else(|| ResourceError::NotFound(name.to_string()))?;
    debug!(name, path = %path.display(), "reading effect source");
    std::fs::read_to_string(&path).map_err(|source| ResourceError::Read { path, source })
}

#[derive(Debug, Clone)]
pub struct SearchPaths {
    cwd: PathBuf,
    roots: Vec<PathBuf>,
}

impl SearchPaths {
    /// Search relative to the process working directory only.
    pub fn new() -> Result<Self, ResourceError> {
        let cwd = env::current_dir().map_err(|source| ResourceError::Read {
            path: PathBuf::from("."),
            source,
        })?;
        Ok(Self::with_cwd(cwd))
    }

    pub fn with_cwd<P: Into<PathBuf>>(cwd: P) -> Self {
        Self {
            cwd: cwd.into(),
            roots: Vec::new(),
        }
    }

    /// Appends a root directory; `$VAR` and `~` are expanded immediately and
    /// relative roots are anchored at the working directory.
    pub fn push_root(&mut self, root: &str) -> Result<(), ResourceError> {
        let expanded = expand_path(root)?;
        let anchored = if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        };
        debug!(root, resolved = %anchored.display(), "added effect search root");
        self.roots.push(anchored);
        Ok(())
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn candidates(&self, name: &str) -> Result<Vec<PathBuf>, ResourceError> {
        let expanded = expand_path(name)?;
        if expanded.is_absolute() {
            return Ok(vec![expanded]);
        }
        let mut candidates = Vec::with_capacity(self.roots.len() + 1);
        candidates.push(self.cwd.join(&expanded));
        candidates.extend(self.roots.iter().map(|root| root.join(&expanded)));
        Ok(candidates)
    }
}

impl ResourceLookup for SearchPaths {
    fn find(&self, name: &str) -> Option<PathBuf> {
        let candidates = match self.candidates(name) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(name, error = %err, "could not expand effect source name");
                return None;
            }
        };
        candidates.into_iter().find(|candidate| {
            let found = candidate.is_file();
            debug!(name, candidate = %candidate.display(), found, "probing effect source");
            found
        })
    }
}

/// Expands `$VAR`, `${VAR}` and a leading `~`.
pub fn expand_path(input: &str) -> Result<PathBuf, ResourceError> {
    let expanded = expand_env_vars(input)?;
    let expanded = expand_home(&expanded)?;
    Ok(PathBuf::from(expanded))
}

fn invalid(name: &str, reason: impl Into<String>) -> ResourceError {
    ResourceError::InvalidPath {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn expand_home(input: &str) -> Result<String, ResourceError> {
    if !input.starts_with('~') {
        return Ok(input.to_string());
    }

    let base_dirs =
        BaseDirs::new().ok_or_else(|| invalid(input, "home directory is unknown"))?;
    let home_dir = base_dirs.home_dir();

    if input == "~" {
        return Ok(home_dir.to_string_lossy().into_owned());
    }
    if let Some(rest) = input.strip_prefix("~/") {
        return Ok(home_dir.join(rest).to_string_lossy().into_owned());
    }

    Err(invalid(input, "only '~' and '~/' home prefixes are supported"))
}

fn expand_env_vars(input: &str) -> Result<String, ResourceError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            output.push(chars.next().unwrap_or('\\'));
            continue;
        }
        if ch != '$' {
            output.push(ch);
            continue;
        }

        let name = match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(invalid(input, "missing closing '}'"));
                }
                if name.is_empty() {
                    return Err(invalid(input, "empty variable name"));
                }
                name
            }
            Some(&c) if is_env_name_char(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_env_name_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                name
            }
            _ => {
                output.push('$');
                continue;
            }
        };

        let value = env::var(&name)
            .map_err(|_| invalid(input, format!("environment variable '{name}' is not set")))?;
        output.push_str(&value);
    }

    Ok(output)
}

fn is_env_name_char(ch: char) -> bool {
    ch == '_' || ch.is_ascii_alphanumeric()
}
