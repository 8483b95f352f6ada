//! Combines the output of every reduce task into the final job output.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use common::codec::read_records;
use common::{ans_name, merge_name, reduce_name};

/// Read every reduce output of `job_name`, sort the records by key and write
/// them to [`ans_name`] as `key: value` lines.
///
/// A missing reduce output contributes nothing. Returns the path written.
pub fn merge_outputs(work_dir: &Path, job_name: &str, n_reduce: usize) -> Result<PathBuf> {
    debug!("Merge phase for {}", job_name);

    let mut records = Vec::new();
    for reduce_task in 0..n_reduce {
        let path = work_dir.join(merge_name(job_name, reduce_task));
        if let Some(kvs) = read_records(&path)? {
            records.extend(kvs);
        }
    }

    records.sort_by(|a, b| a.key.cmp(&b.key));

    let out_path = work_dir.join(ans_name(job_name));
    let file = File::create(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut writer = BufWriter::new(file);
    for kv in &records {
        writeln!(writer, "{kv}")?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", out_path.display()))?;

    info!(
        "Merged {} records from {} reducers into {}",
        records.len(),
        n_reduce,
        out_path.display()
    );
    Ok(out_path)
}

/// Remove the intermediate partitions and reduce outputs of a job.
pub fn cleanup_intermediate(
    work_dir: &Path,
    job_name: &str,
    n_map: usize,
    n_reduce: usize,
) -> Result<()> {
    for reduce_task in 0..n_reduce {
        for map_task in 0..n_map {
            remove_if_present(&work_dir.join(reduce_name(job_name, map_task, reduce_task)))?;
        }
        remove_if_present(&work_dir.join(merge_name(job_name, reduce_task)))?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}
