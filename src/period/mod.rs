use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::record::{InterviewRecord, RecordError, parse_jsonl_records, serialize_jsonl_records};
use crate::store::atomic::atomic_write;
use crate::wave::Wave;

pub const PERIOD_SUFFIX: &str = ".jsonl.zst";
pub const DEFLATED_SUFFIX: &str = ".deflated.jsonl.zst";

#[derive(Debug)]
pub enum PeriodError {
    Io(io::Error),
    Record(RecordError),
    Json(serde_json::Error),
    WaveMismatch { expected: Wave, found: Wave },
}

impl std::fmt::Display for PeriodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Record(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::WaveMismatch { expected, found } => write!(
                f,
                "record belongs to {} but the period file is {}",
                found.label(),
                expected.label()
            ),
        }
    }
}

impl std::error::Error for PeriodError {}

impl From<io::Error> for PeriodError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RecordError> for PeriodError {
    fn from(value: RecordError) -> Self {
        Self::Record(value)
    }
}

impl From<serde_json::Error> for PeriodError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

pub fn compress_jsonl(input: &str) -> io::Result<Vec<u8>> {
    zstd::stream::encode_all(input.as_bytes(), 0)
}

pub fn decompress_jsonl(input: &[u8]) -> io::Result<String> {
    let decompressed = zstd::stream::decode_all(input)?;
    String::from_utf8(decompressed)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}

pub fn period_path(dir: &Path, wave: Wave) -> PathBuf {
    dir.join(format!("{}{PERIOD_SUFFIX}", wave.label()))
}

pub fn deflated_period_path(dir: &Path, wave: Wave) -> PathBuf {
    dir.join(format!("{}{DEFLATED_SUFFIX}", wave.label()))
}

pub fn wave_from_path(path: &Path) -> Option<Wave> {
    let file_name = path.file_name()?.to_str()?;
    let label = file_name
        .strip_suffix(DEFLATED_SUFFIX)
        .or_else(|| file_name.strip_suffix(PERIOD_SUFFIX))?;
    Wave::parse_label(label).ok()
}

pub fn read_period(path: &Path) -> Result<Vec<InterviewRecord>, PeriodError> {
    let bytes = fs::read(path)?;
    let content = decompress_jsonl(&bytes)?;
    Ok(parse_jsonl_records(&content)?)
}

pub fn write_period(
    path: &Path,
    wave: Wave,
    records: &[InterviewRecord],
) -> Result<(), PeriodError> {
    for record in records {
        if record.wave() != wave {
            return Err(PeriodError::WaveMismatch {
                expected: wave,
                found: record.wave(),
            });
        }
    }
    let content = serialize_jsonl_records(records)?;
    let compressed = compress_jsonl(&content)?;
    atomic_write(path, &compressed)?;
    Ok(())
}

pub fn list_periods(dir: &Path) -> io::Result<Vec<(Wave, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.ends_with(DEFLATED_SUFFIX) {
            continue;
        }
        if let Some(wave) = wave_from_path(&path) {
            out.push((wave, path));
        }
    }
    out.sort_by_key(|(wave, _)| *wave);
    Ok(out)
}
