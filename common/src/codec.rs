//! On-disk record format shared by partitions, reduce outputs and anything
//! that consumes them.
//!
//! A file is a stream of JSON objects of the form `{"Key":..,"Value":..}`,
//! one per line. The decoder accepts any whitespace between objects.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::KeyValue;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed record #{record} in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        record: usize,
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// How an output file is opened when it is (re)written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputDiscipline {
    /// Write a temporary file next to the target and rename it into place.
    /// A retried task replaces the previous output and a failed write never
    /// leaves a partial file behind.
    #[default]
    Replace,

    /// Create the file if absent and overwrite it from the start without
    /// truncating. If a retry writes fewer bytes than an earlier attempt the
    /// earlier attempt's tail survives: stale trailing records may still
    /// decode, or the file may fail to decode at all.
    InPlace,
}

/// Decode every record in `reader`.
///
/// On failure returns the index of the first record that did not decode.
pub fn decode_records<R: Read>(reader: R) -> Result<Vec<KeyValue>, (usize, serde_json::Error)> {
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<KeyValue>();

    let mut records = Vec::new();
    for (index, kv) in stream.enumerate() {
        records.push(kv.map_err(|e| (index, e))?);
    }

    Ok(records)
}

/// Encode `records` into `writer`, one object per line.
pub fn encode_records<'a, W, I>(mut writer: W, records: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a KeyValue>,
{
    for kv in records {
        serde_json::to_writer(&mut writer, kv)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Read a record file.
///
/// Returns `Ok(None)` if the file does not exist: an absent file is a
/// legitimate empty input, not an error.
pub fn read_records(path: &Path) -> Result<Option<Vec<KeyValue>>, CodecError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} is absent, treating it as empty", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(CodecError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    decode_records(BufReader::new(file))
        .map(Some)
        .map_err(|(record, source)| {
            if source.is_io() {
                CodecError::Read {
                    path: path.to_path_buf(),
                    source: source.into(),
                }
            } else {
                CodecError::Decode {
                    path: path.to_path_buf(),
                    record,
                    source,
                }
            }
        })
}

/// Write `records` to `path` following `discipline`.
pub fn write_records(
    path: &Path,
    records: &[KeyValue],
    discipline: OutputDiscipline,
) -> Result<(), CodecError> {
    let write_err = |source: io::Error| CodecError::Write {
        path: path.to_path_buf(),
        source,
    };

    match discipline {
        OutputDiscipline::Replace => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
            encode_records(BufWriter::new(tmp.as_file_mut()), records).map_err(write_err)?;
            tmp.persist(path).map_err(|e| write_err(e.error))?;
        }
        OutputDiscipline::InPlace => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(path)
                .map_err(write_err)?;
            encode_records(BufWriter::new(file), records).map_err(write_err)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn absent_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let res = read_records(&dir.path().join("missing")).unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn reads_back_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let records = vec![
            KeyValue::new("a", "1"),
            KeyValue::new("line\nbreak", "\"quoted\" \u{e9}"),
        ];

        write_records(&path, &records, OutputDiscipline::Replace).unwrap();

        assert_eq!(read_records(&path).unwrap(), Some(records));
    }

    #[test]
    fn decoder_accepts_any_whitespace_between_records() {
        let input = r#"{"Key":"a","Value":"1"} {"Key":"b","Value":"2"}

            {"Key":"c","Value":"3"}"#;
        let records = decode_records(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], KeyValue::new("c", "3"));
    }

    #[test]
    fn malformed_record_reports_its_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad");
        fs::write(&path, "{\"Key\":\"a\",\"Value\":\"1\"}\n{\"Key\":").unwrap();

        match read_records(&path) {
            Err(CodecError::Decode { record, .. }) => assert_eq!(record, 1),
            other => panic!("expected a decode error, got {other:?}"),
        }
    }

    #[test]
    fn replace_truncates_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let long = vec![KeyValue::new("a", "1"), KeyValue::new("b", "2")];
        let short = vec![KeyValue::new("a", "1")];

        write_records(&path, &long, OutputDiscipline::Replace).unwrap();
        write_records(&path, &short, OutputDiscipline::Replace).unwrap();

        assert_eq!(read_records(&path).unwrap(), Some(short));
    }

    #[test]
    fn in_place_keeps_stale_tail_of_a_longer_previous_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let long = vec![KeyValue::new("a", "1"), KeyValue::new("b", "2")];
        let short = vec![KeyValue::new("c", "3")];

        write_records(&path, &long, OutputDiscipline::InPlace).unwrap();
        write_records(&path, &short, OutputDiscipline::InPlace).unwrap();

        let records = read_records(&path).unwrap().unwrap();
        assert_eq!(records[0], KeyValue::new("c", "3"));
        assert_eq!(records[1], KeyValue::new("b", "2"));
    }
}
