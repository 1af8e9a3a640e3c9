use std::{
    collections::BTreeSet,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::occupancy::Slot;

const EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct LayoutFile {
    #[serde(default)]
    layout_name: String,
    #[serde(default)]
    slots: Vec<Slot>,
}

/// Named slot layouts, one JSON file per layout.
#[derive(Clone, Debug)]
pub struct LayoutStore {
    dir: PathBuf,
}

impl LayoutStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists `slots` under `name`, replacing any previous layout of that name.
    ///
    /// Slot statuses are dropped before writing.
    pub fn save(&self, name: &str, slots: &[Slot]) -> Result<()> {
        let path = self.path(name)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let file = LayoutFile {
            layout_name: name.to_string(),
            slots: slots
                .iter()
                .map(|slot| Slot::new(slot.points.clone()))
                .collect(),
        };
        fs::write(&path, serde_json::to_string(&file)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Loads the slots of `name`, empty if no such layout exists.
    pub fn load(&self, name: &str) -> Result<Vec<Slot>> {
        let path = self.path(name)?;
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let file = serde_json::from_str::<LayoutFile>(&json)
            .with_context(|| format!("malformed layout {}", path.display()))?;

        Ok(file.slots)
    }

    pub fn list_names(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION)
                && let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
            {
                names.insert(stem.to_string());
            }
        }
        Ok(names)
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if name.trim().is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            bail!("invalid layout name {name:?}");
        }
        Ok(self.dir.join(format!("{name}.{EXTENSION}")))
    }
}
