use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Error};
use tracing::{debug, info};

use common::codec::{read_records, write_records, OutputDiscipline};
use common::{reduce_name, KeyValue, ReduceFn};

/// What one reduce task consumed and produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceSummary {
    /// Partitions that existed and were read.
    pub partitions_read: usize,
    pub records_in: usize,
    pub keys_out: usize,
}

/// Run one reduce task.
///
/// Reads the partition for `reduce_task` written by each of the `n_map` map
/// tasks, in ascending map order, groups the values by key and writes one
/// record per key to `output`. An absent partition contributes nothing.
///
/// Any unreadable or malformed partition, failing reduce call or failed
/// write aborts the task before `output` is touched (with
/// [`OutputDiscipline::Replace`]), so a failed attempt can be rerun from
/// scratch. The order of records in `output` is unspecified; the values
/// passed to `reduce_fn` for a key are always in map-task order, then file
/// order.
pub fn do_reduce(
    work_dir: &Path,
    job_name: &str,
    reduce_task: usize,
    output: &Path,
    n_map: usize,
    reduce_fn: ReduceFn,
    discipline: OutputDiscipline,
) -> Result<ReduceSummary, Error> {
    info!("Starting reduce task {} of job {}", reduce_task, job_name);

    let mut partitions_read = 0;
    let mut records = Vec::new();
    for map_task in 0..n_map {
        let path = work_dir.join(reduce_name(job_name, map_task, reduce_task));
        let Some(kvs) = read_records(&path)? else {
            continue;
        };
        debug!("Read {} records from {}", kvs.len(), path.display());
        partitions_read += 1;
        records.extend(kvs);
    }
    let records_in = records.len();

    let groups = group_by_key(records);

    let mut out = Vec::with_capacity(groups.len());
    for (key, values) in groups {
        let value = reduce_fn(&key, &values)
            .with_context(|| format!("reduce function failed on key {key:?}"))?;
        out.push(KeyValue::new(key, value));
    }

    write_records(output, &out, discipline)?;

    info!(
        "Reduce task {} wrote {} keys to {}",
        reduce_task,
        out.len(),
        output.display()
    );

    Ok(ReduceSummary {
        partitions_read,
        records_in,
        keys_out: out.len(),
    })
}

/// Collect the values of every key, keeping their relative order.
fn group_by_key(records: Vec<KeyValue>) -> HashMap<String, Vec<String>> {
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for kv in records {
        groups.entry(kv.key).or_default().push(kv.value);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use anyhow::anyhow;
    use common::codec::read_records;

    fn concat(_key: &str, values: &[String]) -> anyhow::Result<String> {
        Ok(values.join(","))
    }

    fn reject_b(key: &str, values: &[String]) -> anyhow::Result<String> {
        if key == "b" {
            return Err(anyhow!("no b allowed"));
        }
        concat(key, values)
    }

    fn write_partition(dir: &Path, map_task: usize, reduce_task: usize, kvs: &[(&str, &str)]) {
        let records: Vec<KeyValue> = kvs.iter().map(|(k, v)| KeyValue::new(*k, *v)).collect();
        write_records(
            &dir.join(reduce_name("job", map_task, reduce_task)),
            &records,
            OutputDiscipline::Replace,
        )
        .unwrap();
    }

    /// Output record order is unspecified, so compare as a sorted list.
    fn sorted_output(path: &Path) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = read_records(path)
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn groups_values_in_map_order() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 0, 0, &[("a", "1"), ("b", "2")]);
        write_partition(dir.path(), 1, 0, &[("a", "3")]);
        let output = dir.path().join("out");

        let summary = do_reduce(
            dir.path(),
            "job",
            0,
            &output,
            2,
            concat,
            OutputDiscipline::Replace,
        )
        .unwrap();

        assert_eq!(
            sorted_output(&output),
            vec![("a".into(), "1,3".into()), ("b".into(), "2".into())]
        );
        assert_eq!(
            summary,
            ReduceSummary {
                partitions_read: 2,
                records_in: 3,
                keys_out: 2
            }
        );
    }

    #[test]
    fn file_order_is_kept_within_a_partition() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 0, 1, &[("k", "x"), ("k", "y")]);
        write_partition(dir.path(), 2, 1, &[("k", "z"), ("k", "w")]);
        let output = dir.path().join("out");

        do_reduce(dir.path(), "job", 1, &output, 3, concat, OutputDiscipline::Replace).unwrap();

        assert_eq!(sorted_output(&output), vec![("k".into(), "x,y,z,w".into())]);
    }

    #[test]
    fn one_record_per_distinct_key() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 0, 0, &[("a", "1"), ("b", "1"), ("a", "1")]);
        write_partition(dir.path(), 1, 0, &[("c", "1"), ("b", "1")]);
        let output = dir.path().join("out");

        do_reduce(dir.path(), "job", 0, &output, 2, concat, OutputDiscipline::Replace).unwrap();

        let keys: Vec<String> = sorted_output(&output).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn absent_partitions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 1, 0, &[("a", "1")]);
        let output = dir.path().join("out");

        let summary =
            do_reduce(dir.path(), "job", 0, &output, 3, concat, OutputDiscipline::Replace)
                .unwrap();

        assert_eq!(summary.partitions_read, 1);
        assert_eq!(sorted_output(&output), vec![("a".into(), "1".into())]);
    }

    #[test]
    fn no_partitions_at_all_writes_an_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");

        do_reduce(dir.path(), "job", 0, &output, 4, concat, OutputDiscipline::Replace).unwrap();

        assert_eq!(read_records(&output).unwrap(), Some(vec![]));
    }

    #[test]
    fn malformed_partition_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 0, 0, &[("a", "1")]);
        fs::write(dir.path().join(reduce_name("job", 1, 0)), "{\"Key\": 7}").unwrap();
        let output = dir.path().join("out");

        let res = do_reduce(dir.path(), "job", 0, &output, 2, concat, OutputDiscipline::Replace);

        assert!(res.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn failing_reduce_function_leaves_previous_output_intact() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        write_records(&output, &[KeyValue::new("old", "1")], OutputDiscipline::Replace).unwrap();
        write_partition(dir.path(), 0, 0, &[("a", "1"), ("b", "2")]);

        let res = do_reduce(dir.path(), "job", 0, &output, 1, reject_b, OutputDiscipline::Replace);

        assert!(res.is_err());
        assert_eq!(sorted_output(&output), vec![("old".into(), "1".into())]);
    }

    #[test]
    fn rerun_produces_an_equivalent_result() {
        let dir = tempfile::tempdir().unwrap();
        write_partition(dir.path(), 0, 0, &[("a", "1"), ("b", "2"), ("c", "3")]);
        write_partition(dir.path(), 1, 0, &[("a", "4")]);
        let output = dir.path().join("out");

        do_reduce(dir.path(), "job", 0, &output, 2, concat, OutputDiscipline::Replace).unwrap();
        let first = sorted_output(&output);
        do_reduce(dir.path(), "job", 0, &output, 2, concat, OutputDiscipline::Replace).unwrap();

        assert_eq!(sorted_output(&output), first);
    }
}
