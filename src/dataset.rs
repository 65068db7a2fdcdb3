//! IDX (MNIST) dataset reader
//!
//! Image files carry a big-endian header `magic (2051), count, rows, cols` followed
//! by `count · rows · cols` pixel bytes. Label files carry `magic (2049), count`
//! followed by one class byte per sample.

use crate::error::{NetworkError, Result};
use crate::tensor::{Sample, Shape, Tensor3D};
use log::info;
use std::fs;
use std::path::Path;

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;
pub const NUM_CLASSES: usize = 10;

// Read a big-endian u32 and advance the byte offset (IDX format uses BE).
fn read_be_u32(data: &[u8], offset: &mut usize, what: &'static str) -> Result<u32> {
    let bytes = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| NetworkError::format(what, "truncated header"))?;
    *offset += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| NetworkError::io(path, e))
}

#[derive(Debug)]
struct ImageFile {
    /// Record count from the header, before any limit.
    total: usize,
    count: usize,
    rows: usize,
    cols: usize,
    pixels: Vec<u8>,
}

#[derive(Debug)]
struct LabelFile {
    total: usize,
    labels: Vec<u8>,
}

fn overflow(what: &'static str) -> NetworkError {
    NetworkError::format(what, "header sizes overflow")
}

fn parse_images(data: &[u8], limit: Option<usize>) -> Result<ImageFile> {
    const WHAT: &str = "IDX image file";
    let mut offset = 0usize;
    let magic = read_be_u32(data, &mut offset, WHAT)?;
    if magic != IMAGE_MAGIC {
        return Err(NetworkError::format(
            WHAT,
            format!("magic number {} (expected {})", magic, IMAGE_MAGIC),
        ));
    }
    let total = read_be_u32(data, &mut offset, WHAT)? as usize;
    let rows = read_be_u32(data, &mut offset, WHAT)? as usize;
    let cols = read_be_u32(data, &mut offset, WHAT)? as usize;

    let count = limit.map_or(total, |limit| limit.min(total));
    let end = rows
        .checked_mul(cols)
        .and_then(|image_size| image_size.checked_mul(count))
        .and_then(|needed| offset.checked_add(needed))
        .ok_or_else(|| overflow(WHAT))?;
    let pixels = data
        .get(offset..end)
        .ok_or_else(|| {
            NetworkError::format(
                WHAT,
                format!(
                    "expected {} pixel bytes, found {}",
                    end - offset,
                    data.len() - offset
                ),
            )
        })?
        .to_vec();

    Ok(ImageFile {
        total,
        count,
        rows,
        cols,
        pixels,
    })
}

fn parse_labels(data: &[u8], limit: Option<usize>) -> Result<LabelFile> {
    const WHAT: &str = "IDX label file";
    let mut offset = 0usize;
    let magic = read_be_u32(data, &mut offset, WHAT)?;
    if magic != LABEL_MAGIC {
        return Err(NetworkError::format(
            WHAT,
            format!("magic number {} (expected {})", magic, LABEL_MAGIC),
        ));
    }
    let total = read_be_u32(data, &mut offset, WHAT)? as usize;
    let count = limit.map_or(total, |limit| limit.min(total));
    let end = offset.checked_add(count).ok_or_else(|| overflow(WHAT))?;

    let labels = data.get(offset..end).ok_or_else(|| {
        NetworkError::format(
            WHAT,
            format!("expected {} labels, found {}", count, data.len() - offset),
        )
    })?;

    if let Some(bad) = labels.iter().find(|&&label| label as usize >= NUM_CLASSES) {
        return Err(NetworkError::format(WHAT, format!("label {} out of range", bad)));
    }
    Ok(LabelFile {
        total,
        labels: labels.to_vec(),
    })
}

/// Loads every sample of an image/label file pair.
pub fn load_mnist(
    images_path: impl AsRef<Path>,
    labels_path: impl AsRef<Path>,
) -> Result<Vec<Sample>> {
    load_mnist_limited(images_path, labels_path, None)
}

/// Loads at most `limit` samples of an image/label file pair.
///
/// Pixels become `[1, rows, cols]` tensors scaled to `[0, 1]`; labels become
/// one-hot vectors of length 10.
pub fn load_mnist_limited(
    images_path: impl AsRef<Path>,
    labels_path: impl AsRef<Path>,
    limit: Option<usize>,
) -> Result<Vec<Sample>> {
    let images_path = images_path.as_ref();
    let labels_path = labels_path.as_ref();

    let images = parse_images(&read_file(images_path)?, limit)?;
    let labels = parse_labels(&read_file(labels_path)?, limit)?;

    // Header counts must agree even when a limit hides the difference.
    if images.total != labels.total {
        return Err(NetworkError::Consistency(format!(
            "{} has {} images but {} has {} labels",
            images_path.display(),
            images.total,
            labels_path.display(),
            labels.total
        )));
    }

    let shape = Shape::new(1, images.rows, images.cols);
    let image_size = shape.len();
    let mut samples = Vec::with_capacity(images.count);
    for (i, &label) in labels.labels.iter().enumerate() {
        let pixels = images.pixels[i * image_size..(i + 1) * image_size]
            .iter()
            .map(|&p| p as f64 / 255.0)
            .collect();
        let input = Tensor3D::from_vec(shape, pixels)?;
        samples.push(Sample::new(input, one_hot(label as usize, NUM_CLASSES)));
    }

    info!(
        "loaded {} samples of {}x{} from {}",
        samples.len(),
        images.rows,
        images.cols,
        images_path.display()
    );
    Ok(samples)
}

/// Vector of `classes` zeros with a one at `class`. An out-of-range class gives
/// all zeros.
pub fn one_hot(class: usize, classes: usize) -> Vec<f64> {
    let mut encoded = vec![0.0; classes];
    if let Some(slot) = encoded.get_mut(class) {
        *slot = 1.0;
    }
    encoded
}

/// Index of the largest value; ties resolve to the lowest index. Returns 0 for an
/// empty slice.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &value) in values.iter().enumerate() {
        if value > values[best] {
            best = i;
        }
    }
    best
}
