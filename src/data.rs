//! CIFAR-10 in two shapes: normalised tensors for the network, PNG files for the report.

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use log::info;
use tch::{Device, Kind, Tensor};

use crate::error::{Error, Result};
use crate::resnet::{check_channels, IN_CHANNELS};

pub const IMAGE_SIDE: u32 = 32;
const PLANE: usize = (IMAGE_SIDE * IMAGE_SIDE) as usize;
/// One label byte followed by the red, green and blue planes.
pub const RECORD_LEN: usize = 1 + 3 * PLANE;

pub const CIFAR10_CLASSES: [&str; 10] = [
    "plane", "car", "bird", "cat", "deer", "dog", "frog", "horse", "ship", "truck",
];

const TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_BATCH: &str = "test_batch.bin";

/// CIFAR-10 name of a label index, `"?"` outside the ten classes.
pub fn class_name(label: i64) -> &'static str {
    usize::try_from(label)
        .ok()
        .and_then(|i| CIFAR10_CLASSES.get(i))
        .copied()
        .unwrap_or("?")
}

/// Images `(N, 3, 32, 32)` and integer labels `(N,)`.
#[derive(Debug)]
pub struct Split {
    pub images: Tensor,
    pub labels: Tensor,
}

impl Split {
    pub fn len(&self) -> i64 {
        self.labels.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks the split can be fed to the network: `(N, 3, H, W)` images and `N` labels.
    pub fn validate(&self) -> Result<()> {
        check_channels("dataset", &self.images, IN_CHANNELS)?;
        if self.labels.dim() != 1 {
            return Err(Error::InvalidArgument(format!(
                "labels must be one-dimensional, got shape {:?}",
                self.labels.size()
            )));
        }
        let (images, labels) = (self.images.size()[0], self.labels.size()[0]);
        if images != labels {
            return Err(Error::InvalidArgument(format!(
                "split has {images} images but {labels} labels"
            )));
        }
        Ok(())
    }

    pub fn to_device(&self, device: Device) -> Split {
        Split {
            images: self.images.to_device(device),
            labels: self.labels.to_device(device),
        }
    }
}

/// Per-channel `(x - mean) / std` on a `(N, 3, H, W)` batch.
pub fn normalize(images: &Tensor, mean: [f64; 3], std: [f64; 3]) -> Tensor {
    let device = images.device();
    let per_channel = |v: [f64; 3]| {
        Tensor::from_slice(&v)
            .to_kind(Kind::Float)
            .to_device(device)
            .view([1, 3, 1, 1])
    };
    (images.to_kind(Kind::Float) - per_channel(mean)) / per_channel(std)
}

/// One binary batch file as raw `[0, 1]` images and labels.
fn read_batch(path: &Path) -> Result<Split> {
    if !path.is_file() {
        return Err(Error::Dataset(format!(
            "CIFAR-10 batch not found: {}",
            path.display()
        )));
    }
    let bytes = fs::read(path)?;
    if bytes.len() % RECORD_LEN != 0 {
        return Err(Error::Dataset(format!(
            "{}: length {} is not a multiple of the {RECORD_LEN}-byte record",
            path.display(),
            bytes.len()
        )));
    }
    let n = (bytes.len() / RECORD_LEN) as i64;
    let side = IMAGE_SIDE as i64;
    let records = Tensor::from_slice(&bytes).view([n, RECORD_LEN as i64]);
    let labels = records.narrow(1, 0, 1).squeeze_dim(1).to_kind(Kind::Int64);
    let images = records
        .narrow(1, 1, RECORD_LEN as i64 - 1)
        .view([n, 3, side, side])
        .to_kind(Kind::Float)
        / 255.0;
    Ok(Split { images, labels })
}

fn read_batches(dir: &Path, files: &[&str], mean: [f64; 3], std: [f64; 3]) -> Result<Split> {
    let mut images = Vec::with_capacity(files.len());
    let mut labels = Vec::with_capacity(files.len());
    for file in files {
        let split = read_batch(&dir.join(file))?;
        images.push(split.images);
        labels.push(split.labels);
    }
    Ok(Split {
        images: normalize(&Tensor::cat(&images, 0), mean, std),
        labels: Tensor::cat(&labels, 0),
    })
}

fn require_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::Dataset(format!(
            "CIFAR-10 directory not found: {}",
            dir.display()
        )));
    }
    Ok(())
}

/// The five normalised training batches under `dir`, in file order.
pub fn load_cifar10_train(dir: &Path, mean: [f64; 3], std: [f64; 3]) -> Result<Split> {
    require_dir(dir)?;
    let train = read_batches(dir, &TRAIN_BATCHES, mean, std)?;
    info!("loaded CIFAR-10 train split from {}: {}", dir.display(), train.len());
    Ok(train)
}

/// The normalised test batch under `dir`.
pub fn load_cifar10_test(dir: &Path, mean: [f64; 3], std: [f64; 3]) -> Result<Split> {
    require_dir(dir)?;
    let test = read_batches(dir, &[TEST_BATCH], mean, std)?;
    info!("loaded CIFAR-10 test split from {}: {}", dir.display(), test.len());
    Ok(test)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CifarRecord {
    pub label: u8,
    /// Channel-planar RGB, 3 x 32 x 32.
    pub pixels: Vec<u8>,
}

impl CifarRecord {
    pub fn to_image(&self) -> RgbImage {
        RgbImage::from_fn(IMAGE_SIDE, IMAGE_SIDE, |x, y| {
            let i = (y * IMAGE_SIDE + x) as usize;
            Rgb([
                self.pixels[i],
                self.pixels[PLANE + i],
                self.pixels[2 * PLANE + i],
            ])
        })
    }
}

pub fn parse_records(bytes: &[u8]) -> Result<Vec<CifarRecord>> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(Error::Dataset(format!(
            "batch length {} is not a multiple of the {RECORD_LEN}-byte record",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(RECORD_LEN)
        .map(|chunk| CifarRecord {
            label: chunk[0],
            pixels: chunk[1..].to_vec(),
        })
        .collect())
}

/// Class names from `batches.meta.txt`, one per line.
pub fn parse_class_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub path: PathBuf,
    pub class_name: String,
}

/// Writes every record of a binary batch as `image{i}.png` under `out_dir`.
pub fn extract_images(batch: &Path, meta: &Path, out_dir: &Path) -> Result<Vec<ExtractedImage>> {
    let records = parse_records(&fs::read(batch)?)?;
    let classes = parse_class_names(&fs::read_to_string(meta)?);
    fs::create_dir_all(out_dir)?;

    let mut extracted = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let class_name = classes
            .get(record.label as usize)
            .cloned()
            .ok_or_else(|| {
                Error::Dataset(format!(
                    "record {i} has label {} but only {} classes are known",
                    record.label,
                    classes.len()
                ))
            })?;
        let path = out_dir.join(format!("image{i}.png"));
        record.to_image().save(&path)?;
        extracted.push(ExtractedImage { path, class_name });
    }
    info!(
        "extracted {} images from {} into {}",
        extracted.len(),
        batch.display(),
        out_dir.display()
    );
    Ok(extracted)
}
