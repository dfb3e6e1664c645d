mod common;

use assert_matches::assert_matches;

use idseq_cli::domain::SourceKind;
use idseq_cli::error::IdseqError;
use idseq_cli::pairing::detect_samples;
use idseq_cli::scan::{AwsCliLister, PathScanner};

use common::{MockLister, write_file};

fn local_scanner() -> PathScanner<AwsCliLister> {
    PathScanner::new(AwsCliLister::new())
}

fn basenames(files: &[idseq_cli::domain::SequenceFile]) -> Vec<&str> {
    files.iter().map(|file| file.basename()).collect()
}

#[test]
fn flat_folder_pairs_mates_by_label() {
    let temp = tempfile::tempdir().unwrap();
    write_file(temp.path(), "x_R2_001.fastq.gz", b"@r2\nACGT\n+\nIIII\n");
    write_file(temp.path(), "x_R1_001.fastq.gz", b"@r1\nACGT\n+\nIIII\n");
    write_file(temp.path(), "y.fa", b">y\nACGT\n");
    write_file(temp.path(), "notes.txt", b"not a sequence");

    let root = temp.path().to_str().unwrap();
    let samples = detect_samples(&local_scanner(), root).unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].name, "x");
    assert_eq!(
        basenames(&samples[0].files),
        vec!["x_R1_001.fastq.gz", "x_R2_001.fastq.gz"]
    );
    assert_eq!(samples[1].name, "y");
    assert_eq!(basenames(&samples[1].files), vec!["y.fa"]);
    assert!(samples[0].files.iter().all(|file| file.kind() == SourceKind::Local));
}

#[test]
fn third_file_with_same_name_drops_the_sample() {
    let temp = tempfile::tempdir().unwrap();
    write_file(temp.path(), "x_R1.fastq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "x_R2.fastq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "x.fastq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "z.fq", b"@a\nA\n+\nI\n");

    let root = temp.path().to_str().unwrap();
    let samples = detect_samples(&local_scanner(), root).unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name, "z");
}

#[test]
fn subfolders_become_samples_when_top_level_is_empty() {
    let temp = tempfile::tempdir().unwrap();
    write_file(temp.path(), "s1/reads_R1.fq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "s1/reads_R2.fq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "s2/only.fasta.gz", b">a\nA\n");
    write_file(temp.path(), "s3/a.fq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "s3/b.fq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "s3/c.fq", b"@a\nA\n+\nI\n");

    let root = temp.path().to_str().unwrap();
    let samples = detect_samples(&local_scanner(), root).unwrap();

    let names: Vec<_> = samples.iter().map(|sample| sample.name.as_str()).collect();
    assert_eq!(names, vec!["s1", "s2"]);
    assert_eq!(
        basenames(&samples[0].files),
        vec!["reads_R1.fq", "reads_R2.fq"]
    );
}

#[test]
fn empty_and_hidden_files_are_not_samples() {
    let temp = tempfile::tempdir().unwrap();
    write_file(temp.path(), "empty.fastq", b"");
    write_file(temp.path(), ".hidden.fastq", b"@a\nA\n+\nI\n");
    write_file(temp.path(), "archive.fastq.gz.md5", b"d41d8cd9");

    let root = temp.path().to_str().unwrap();
    let err = detect_samples(&local_scanner(), root).unwrap_err();
    assert_matches!(err, IdseqError::NoSamplesFound { .. });
}

#[test]
fn missing_folder_is_a_discovery_error() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("missing");
    let err = detect_samples(&local_scanner(), root.to_str().unwrap()).unwrap_err();
    assert_matches!(err, IdseqError::Discovery { .. });
}

#[test]
fn remote_prefix_is_grouped_like_a_folder() {
    let lister = MockLister::with_objects(&[
        "s3://bucket/run/a_R1.fastq.gz",
        "s3://bucket/run/a_R2.fastq.gz",
        "s3://bucket/run/nested/b.fq",
        "s3://bucket/other/c.fq",
    ]);
    let scanner = PathScanner::new(lister);

    let samples = detect_samples(&scanner, "s3://bucket/run/").unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].name, "a");
    assert!(samples[0].files.iter().all(|file| file.kind() == SourceKind::S3));
    assert_eq!(samples[0].files[0].locator(), "s3://bucket/run/a_R1.fastq.gz");
}

#[test]
fn remote_prefix_falls_back_to_subfolders() {
    let lister = MockLister::with_objects(&[
        "s3://bucket/run/s1/x_R1.fq",
        "s3://bucket/run/s1/x_R2.fq",
        "s3://bucket/run/s2/y.fa",
    ]);
    let scanner = PathScanner::new(lister);

    let samples = detect_samples(&scanner, "s3://bucket/run").unwrap();

    let names: Vec<_> = samples.iter().map(|sample| sample.name.as_str()).collect();
    assert_eq!(names, vec!["s1", "s2"]);
}
