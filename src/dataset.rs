use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataset::{Dataset, InMemDataset};
use csv::StringRecord;
use rand::{prelude::SliceRandom, rngs::StdRng, SeedableRng};

/// Width and height of a digit image.
pub const IMAGE_SIZE: usize = 28;
/// Number of pixel columns in a CSV row.
pub const NUM_PIXELS: usize = IMAGE_SIZE * IMAGE_SIZE;
/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

/// Labeled training file inside a data directory.
pub const TRAIN_FILE: &str = "train.csv";
/// Unlabeled test file inside a data directory.
pub const TEST_FILE: &str = "test.csv";

const LABEL_COLUMN: &str = "label";
const MAX_PIXEL: f32 = 255.0;

/// Errors raised while reading digit CSV files.
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: expected {expected} pixel columns, found {found}")]
    PixelColumns {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("{path}: no `label` column in a labeled dataset")]
    MissingLabels { path: PathBuf },

    #[error("{path}, row {row}: invalid label `{value}`")]
    InvalidLabel {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("{path}, row {row}: invalid pixel `{value}` in column {column}")]
    InvalidPixel {
        path: PathBuf,
        row: usize,
        column: usize,
        value: String,
    },

    #[error("{path} contains no rows")]
    Empty { path: PathBuf },

    #[error("validation ratio must lie strictly between 0 and 1, got {0}")]
    InvalidRatio(f64),
}

/// A single handwritten digit.
#[derive(Clone, Debug, PartialEq)]
pub struct DigitItem {
    /// Pixel intensities scaled to `[0, 1]`, row-major.
    pub image: [[f32; IMAGE_SIZE]; IMAGE_SIZE],

    /// Class id in `0..10`, absent for unlabeled images.
    pub label: Option<u8>,
}

/// Position of the label column among the CSV headers.
struct ColumnLayout {
    label: Option<usize>,
}

impl ColumnLayout {
    fn from_headers(headers: &StringRecord, path: &Path) -> Result<Self, DatasetError> {
        let label = headers
            .iter()
            .position(|header| header.trim() == LABEL_COLUMN);
        let found = headers.len() - usize::from(label.is_some());

        if found != NUM_PIXELS {
            return Err(DatasetError::PixelColumns {
                path: path.to_path_buf(),
                expected: NUM_PIXELS,
                found,
            });
        }

        Ok(Self { label })
    }
}

impl DigitItem {
    fn from_record(
        record: &StringRecord,
        layout: &ColumnLayout,
        path: &Path,
        row: usize,
    ) -> Result<Self, DatasetError> {
        let label = match layout.label {
            Some(column) => {
                let value = record.get(column).unwrap_or_default().trim();
                match value.parse::<u8>() {
                    Ok(label) if (label as usize) < NUM_CLASSES => Some(label),
                    _ => {
                        return Err(DatasetError::InvalidLabel {
                            path: path.to_path_buf(),
                            row,
                            value: value.to_string(),
                        })
                    }
                }
            }
            None => None,
        };

        let mut image = [[0.0; IMAGE_SIZE]; IMAGE_SIZE];
        let pixels = record
            .iter()
            .enumerate()
            .filter(|(column, _)| Some(*column) != layout.label);

        for (index, (column, value)) in pixels.enumerate() {
            let value = value.trim();
            let pixel = match value.parse::<f32>() {
                Ok(pixel) if (0.0..=MAX_PIXEL).contains(&pixel) => pixel,
                _ => {
                    return Err(DatasetError::InvalidPixel {
                        path: path.to_path_buf(),
                        row,
                        column,
                        value: value.to_string(),
                    })
                }
            };
            image[index / IMAGE_SIZE][index % IMAGE_SIZE] = pixel / MAX_PIXEL;
        }

        Ok(Self { image, label })
    }
}

/// Reads every row of a digit CSV file.
///
/// The file must start with a header row. A column named `label` holds the class id; every
/// other column is a raw pixel value in `[0, 255]`.
pub fn read_digits<P: AsRef<Path>>(path: P) -> Result<Vec<DigitItem>, DatasetError> {
    let path = path.as_ref();
    let read_error = |source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(read_error)?;
    let layout = ColumnLayout::from_headers(reader.headers().map_err(read_error)?, path)?;

    let mut items = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(read_error)?;
        items.push(DigitItem::from_record(&record, &layout, path, index + 1)?);
    }

    if items.is_empty() {
        return Err(DatasetError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(items)
}

/// Randomly partitions `items` into a training and a validation part.
///
/// The validation part receives `floor(len * valid_ratio)` items and the training part keeps
/// the remainder. The same seed always yields the same partition.
pub fn split_items(
    mut items: Vec<DigitItem>,
    valid_ratio: f64,
    seed: u64,
) -> Result<(Vec<DigitItem>, Vec<DigitItem>), DatasetError> {
    if !(valid_ratio > 0.0 && valid_ratio < 1.0) {
        return Err(DatasetError::InvalidRatio(valid_ratio));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);

    let num_valid = (items.len() as f64 * valid_ratio).floor() as usize;
    let valid = items.split_off(items.len() - num_valid);

    Ok((items, valid))
}

/// Reads the unlabeled `test.csv` from `dir`, keeping file order.
pub fn test_set<P: AsRef<Path>>(dir: P) -> Result<InMemDataset<DigitItem>, DatasetError> {
    let items = read_digits(dir.as_ref().join(TEST_FILE))?;
    Ok(InMemDataset::new(items))
}

/// Labeled digits split into training and validation parts.
#[derive(Clone)]
pub struct DigitsDataset {
    train: Arc<InMemDataset<DigitItem>>,
    valid: Arc<InMemDataset<DigitItem>>,
}

impl DigitsDataset {
    /// Loads `train.csv` from `dir`.
    pub fn from_dir<P: AsRef<Path>>(
        dir: P,
        valid_ratio: f64,
        seed: u64,
    ) -> Result<Self, DatasetError> {
        Self::from_csv(dir.as_ref().join(TRAIN_FILE), valid_ratio, seed)
    }

    pub fn from_csv<P: AsRef<Path>>(
        train_path: P,
        valid_ratio: f64,
        seed: u64,
    ) -> Result<Self, DatasetError> {
        let train_path = train_path.as_ref();
        let labeled = read_digits(train_path)?;
        if labeled.iter().any(|item| item.label.is_none()) {
            return Err(DatasetError::MissingLabels {
                path: train_path.to_path_buf(),
            });
        }

        Self::from_items(labeled, valid_ratio, seed)
    }

    pub fn from_items(
        labeled: Vec<DigitItem>,
        valid_ratio: f64,
        seed: u64,
    ) -> Result<Self, DatasetError> {
        let (train, valid) = split_items(labeled, valid_ratio, seed)?;

        Ok(Self {
            train: Arc::new(InMemDataset::new(train)),
            valid: Arc::new(InMemDataset::new(valid)),
        })
    }

    pub fn train(&self) -> Arc<InMemDataset<DigitItem>> {
        self.train.clone()
    }

    pub fn valid(&self) -> Arc<InMemDataset<DigitItem>> {
        self.valid.clone()
    }
}

impl core::fmt::Debug for DigitsDataset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DigitsDataset")
            .field("train", &self.train.len())
            .field("valid", &self.valid.len())
            .finish()
    }
}
