//! Named tensor sets: where pretrained blobs come from, how checkpoints hit the disk, and the
//! all-or-nothing copy onto a module graph.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use log::debug;
use tch::Tensor;

use crate::error::{ParameterLoadError, Result};

pub type NamedTensors = Vec<(String, Tensor)>;

/// Batch-norm step counters written by PyTorch; they hold no parameter value.
const IGNORED_SUFFIXES: [&str; 1] = ["num_batches_tracked"];

fn is_ignored(name: &str) -> bool {
    IGNORED_SUFFIXES
        .iter()
        .any(|suffix| name.rsplit('.').next() == Some(*suffix))
}

/// Anything that can hand over a name -> tensor mapping.
pub trait WeightSource {
    fn fetch(&self) -> Result<NamedTensors>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorFormat {
    SafeTensors,
    Npz,
    /// libtorch multi-tensor archive (`.ot`, `.pt`, ...)
    Torch,
}

impl TensorFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("safetensors") => TensorFormat::SafeTensors,
            Some("npz") => TensorFormat::Npz,
            _ => TensorFormat::Torch,
        }
    }
}

pub fn read_named(path: &Path) -> Result<NamedTensors> {
    let named = match TensorFormat::from_path(path) {
        TensorFormat::SafeTensors => Tensor::read_safetensors(path)?,
        TensorFormat::Npz => Tensor::read_npz(path)?,
        TensorFormat::Torch => Tensor::load_multi(path)?,
    };
    debug!("read {} tensors from {}", named.len(), path.display());
    Ok(named)
}

pub fn write_named(named: &[(String, Tensor)], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match TensorFormat::from_path(path) {
        TensorFormat::SafeTensors => Tensor::write_safetensors(named, path)?,
        TensorFormat::Npz => Tensor::write_npz(named, path)?,
        TensorFormat::Torch => Tensor::save_multi(named, path)?,
    }
    debug!("wrote {} tensors to {}", named.len(), path.display());
    Ok(())
}

#[derive(Debug, Clone)]
pub struct WeightFile {
    pub path: PathBuf,
}

impl WeightFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WeightSource for WeightFile {
    fn fetch(&self) -> Result<NamedTensors> {
        read_named(&self.path)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWeights {
    pub tensors: NamedTensors,
}

impl InMemoryWeights {
    pub fn new(tensors: NamedTensors) -> Self {
        Self { tensors }
    }

    /// Snapshot of a var store (or any name -> tensor map), detached and copied.
    pub fn snapshot<'a>(vars: impl IntoIterator<Item = (&'a String, &'a Tensor)>) -> Self {
        let mut tensors: NamedTensors = vars
            .into_iter()
            .map(|(name, t)| (name.clone(), t.detach().copy()))
            .collect();
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        Self { tensors }
    }

    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.tensors.iter_mut().find(|(name, _)| name == from) {
            Some(entry) => {
                entry.0 = to.to_string();
                true
            }
            None => false,
        }
    }
}

impl WeightSource for InMemoryWeights {
    fn fetch(&self) -> Result<NamedTensors> {
        Ok(self
            .tensors
            .iter()
            .map(|(name, t)| (name.clone(), t.shallow_clone()))
            .collect())
    }
}

/// Checks `named` against `targets` without touching anything.
pub fn check_compatible(
    named: &HashMap<&str, &Tensor>,
    targets: &BTreeMap<String, Tensor>,
) -> std::result::Result<(), ParameterLoadError> {
    let mut err = ParameterLoadError::default();
    for (name, target) in targets {
        match named.get(name.as_str()) {
            None => err.missing.push(name.clone()),
            Some(src) if src.size() != target.size() => {
                err.mismatched
                    .push((name.clone(), target.size(), src.size()))
            }
            Some(_) => {}
        }
    }
    err.unexpected = named
        .keys()
        .filter(|name| !targets.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    err.unexpected.sort();

    if err.is_empty() {
        Ok(())
    } else {
        Err(err)
    }
}

/// Copies `named` onto `targets`. Keys and shapes must match exactly; nothing is written
/// unless everything does.
pub fn load_strict(named: &[(String, Tensor)], targets: &BTreeMap<String, Tensor>) -> Result<()> {
    let named: HashMap<&str, &Tensor> = named
        .iter()
        .filter(|(name, _)| !is_ignored(name))
        .map(|(name, t)| (name.as_str(), t))
        .collect();
    check_compatible(&named, targets)?;

    tch::no_grad(|| -> Result<()> {
        for (name, target) in targets {
            let mut dst = target.shallow_clone();
            dst.f_copy_(named[name.as_str()])?;
        }
        Ok(())
    })?;
    debug!("copied {} tensors", targets.len());
    Ok(())
}
