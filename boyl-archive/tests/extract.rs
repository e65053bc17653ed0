use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use boyl_archive::*;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        let raw = name.as_bytes();
        header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

fn write_7z(path: &Path, entries: &[(&str, &[u8])]) {
    let staging = tempfile::tempdir().unwrap();
    let mut writer = sevenz_rust::SevenZWriter::create(path).unwrap();
    for (i, (name, data)) in entries.iter().enumerate() {
        let source = staging.path().join(i.to_string());
        fs::write(&source, data).unwrap();
        writer
            .push_archive_entry(
                sevenz_rust::SevenZArchiveEntry::from_path(&source, name.to_string()),
                Some(File::open(&source).unwrap()),
            )
            .unwrap();
    }
    writer.finish().unwrap();
}

/// A stored (uncompressed) rar with `readme.txt` and `bin/game.sh`.
fn rar_fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/stored.rar")
}

/// Runs an extraction, recording every progress value observed.
fn extract_recording(
    extractor: &dyn Extractor,
    base: &Path,
    cancel: &CancellationToken,
) -> (Result<(), ArchiveError>, Vec<u64>) {
    let seen = Mutex::new(Vec::new());
    let record = |n: u64| seen.lock().unwrap().push(n);
    let result = extractor.extract(base, cancel, &record);
    (result, seen.into_inner().unwrap())
}

fn assert_monotonic(values: &[u64]) {
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {values:?}"
    );
}

struct Fixture {
    _dir: tempfile::TempDir,
    archive: PathBuf,
    out: PathBuf,
}

fn fixture(file_name: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join(file_name);
    let out = dir.path().join("out");
    Fixture {
        _dir: dir,
        archive,
        out,
    }
}

#[test]
fn zip_progress_size_and_extraction() {
    let f = fixture("game.zip");
    write_zip(&f.archive, &[("a/b.txt", &[b'b'; 10]), ("a/c.txt", &[b'c'; 20])]);

    let extractor = new_extractor("game.zip", &f.archive).unwrap();
    assert_eq!(extractor.progress_size().unwrap(), 30);

    let (result, progress) = extract_recording(extractor.as_ref(), &f.out, &CancellationToken::new());
    result.unwrap();

    assert_eq!(fs::read(f.out.join("a/b.txt")).unwrap(), vec![b'b'; 10]);
    assert_eq!(fs::read(f.out.join("a/c.txt")).unwrap(), vec![b'c'; 20]);
    assert_monotonic(&progress);
    assert_eq!(progress.last(), Some(&30));
}

#[test]
fn zip_with_many_entries_reports_strictly_increasing_totals() {
    let f = fixture("many.zip");
    let names: Vec<String> = (0..64).map(|i| format!("dir{}/file{i}.bin", i % 4)).collect();
    let data = vec![0xABu8; 1000];
    let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), data.as_slice())).collect();
    write_zip(&f.archive, &entries);

    let extractor = new_extractor("many.zip", &f.archive).unwrap();
    let (result, progress) = extract_recording(extractor.as_ref(), &f.out, &CancellationToken::new());
    result.unwrap();

    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&64_000));
    for name in &names {
        assert_eq!(fs::read(f.out.join(name)).unwrap().len(), 1000);
    }
}

#[test]
fn zip_directory_entries_are_created() {
    let f = fixture("dirs.zip");
    let mut zip = zip::ZipWriter::new(File::create(&f.archive).unwrap());
    zip.add_directory("empty/", SimpleFileOptions::default()).unwrap();
    zip.finish().unwrap();

    new_extractor("dirs.zip", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap();

    assert!(f.out.join("empty").is_dir());
}

#[test]
fn zip_parent_entry_is_illegal() {
    let f = fixture("evil.zip");
    write_zip(&f.archive, &[("../evil.txt", b"nope")]);

    let err = new_extractor("evil.zip", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::IllegalPath(_)), "{err:?}");
    assert!(!f.out.parent().unwrap().join("evil.txt").exists());
}

#[test]
fn zip_absolute_entry_is_illegal() {
    let f = fixture("abs.zip");
    write_zip(&f.archive, &[("/absolute.txt", b"nope")]);

    let err = new_extractor("abs.zip", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::IllegalPath(_)), "{err:?}");
}

#[test]
fn tar_absolute_entry_is_illegal() {
    let f = fixture("abs.tar");
    fs::write(&f.archive, tar_bytes(&[("/absolute.txt", b"nope")])).unwrap();

    let err = new_extractor("abs.tar", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::IllegalPath(_)), "{err:?}");
}

#[test]
fn zip_cancelled_before_start() {
    let f = fixture("game.zip");
    write_zip(&f.archive, &[("a.txt", b"data")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = new_extractor("game.zip", &f.archive)
        .unwrap()
        .extract(&f.out, &cancel, &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Cancelled));
    assert!(!f.out.join("a.txt").exists());
}

#[test]
fn zip_cancelled_mid_extraction_stops() {
    let f = fixture("big.zip");
    let data = vec![1u8; DEFAULT_BUFFER_SIZE * 8];
    write_zip(&f.archive, &[("one.bin", &data), ("two.bin", &data)]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let err = new_extractor("big.zip", &f.archive)
        .unwrap()
        .extract(&f.out, &cancel, &move |_| trigger.cancel())
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Cancelled));
}

#[test]
fn tar_extraction_reports_compressed_progress() {
    let f = fixture("game.tar");
    fs::write(&f.archive, tar_bytes(&[("bin/game", b"#!/bin/sh\n"), ("README", b"read me")])).unwrap();

    let extractor = new_extractor("game.tar", &f.archive).unwrap();
    let size = extractor.progress_size().unwrap();
    assert_eq!(size, fs::metadata(&f.archive).unwrap().len());

    let (result, progress) = extract_recording(extractor.as_ref(), &f.out, &CancellationToken::new());
    result.unwrap();

    assert_eq!(fs::read(f.out.join("bin/game")).unwrap(), b"#!/bin/sh\n");
    assert_eq!(fs::read(f.out.join("README")).unwrap(), b"read me");
    assert!(!progress.is_empty());
    assert_monotonic(&progress);
    assert!(progress.iter().all(|p| *p <= size));
}

#[test]
fn tar_gz_extraction() {
    let f = fixture("game.tar.gz");
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes(&[("data/level.dat", &[9u8; 5000])])).unwrap();
    fs::write(&f.archive, encoder.finish().unwrap()).unwrap();

    let extractor = new_extractor("Game (v1.0) (2020).TAR.GZ", &f.archive).unwrap();
    let size = extractor.progress_size().unwrap();
    let (result, progress) = extract_recording(extractor.as_ref(), &f.out, &CancellationToken::new());
    result.unwrap();

    assert_eq!(fs::read(f.out.join("data/level.dat")).unwrap(), vec![9u8; 5000]);
    assert_monotonic(&progress);
    assert!(progress.iter().all(|p| *p > 0 && *p <= size));
}

#[test]
fn tar_zst_extraction() {
    let f = fixture("game.tar.zst");
    let compressed = zstd::stream::encode_all(&tar_bytes(&[("a.txt", b"zstd")])[..], 3).unwrap();
    fs::write(&f.archive, compressed).unwrap();

    new_extractor("game.tar.zst", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap();

    assert_eq!(fs::read(f.out.join("a.txt")).unwrap(), b"zstd");
}

#[test]
fn tar_xz_extraction() {
    let f = fixture("game.tar.xz");
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&tar_bytes(&[("a.txt", b"xz")])).unwrap();
    fs::write(&f.archive, encoder.finish().unwrap()).unwrap();

    new_extractor("game.tar.xz", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap();

    assert_eq!(fs::read(f.out.join("a.txt")).unwrap(), b"xz");
}

#[test]
fn tar_parent_entry_is_illegal() {
    let f = fixture("evil.tar");
    fs::write(&f.archive, tar_bytes(&[("../evil.txt", b"nope")])).unwrap();

    let err = new_extractor("evil.tar", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::IllegalPath(_)), "{err:?}");
    assert!(!f.out.parent().unwrap().join("evil.txt").exists());
}

#[test]
fn seven_zip_progress_size_and_extraction() {
    let f = fixture("game.7z");
    write_7z(&f.archive, &[("a/b.txt", &[b'b'; 10]), ("a/c.txt", &[b'c'; 20])]);

    let extractor = new_extractor("Game (v1) (2001).7z", &f.archive).unwrap();
    assert_eq!(extractor.progress_size().unwrap(), 30);

    let (result, progress) = extract_recording(extractor.as_ref(), &f.out, &CancellationToken::new());
    result.unwrap();

    assert_eq!(fs::read(f.out.join("a/b.txt")).unwrap(), vec![b'b'; 10]);
    assert_eq!(fs::read(f.out.join("a/c.txt")).unwrap(), vec![b'c'; 20]);
    assert_monotonic(&progress);
    assert_eq!(progress.last(), Some(&30));
}

#[test]
fn seven_zip_parent_entry_is_illegal() {
    let f = fixture("evil.7z");
    write_7z(&f.archive, &[("../evil.txt", b"nope")]);

    let err = new_extractor("evil.7z", &f.archive)
        .unwrap()
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::IllegalPath(_)), "{err:?}");
    assert!(!f.out.parent().unwrap().join("evil.txt").exists());
}

#[test]
fn seven_zip_cancelled_before_start() {
    let f = fixture("game.7z");
    write_7z(&f.archive, &[("a.txt", b"data")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = new_extractor("game.7z", &f.archive)
        .unwrap()
        .extract(&f.out, &cancel, &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Cancelled));
    assert!(!f.out.join("a.txt").exists());
}

#[test]
fn rar_extraction_reports_archive_sized_progress() {
    let archive = rar_fixture();
    let f = fixture("stored.rar");

    let extractor = new_extractor("Game (v1) (2001).rar", &archive).unwrap();
    let size = extractor.progress_size().unwrap();
    assert_eq!(size, fs::metadata(&archive).unwrap().len());

    let (result, progress) = extract_recording(extractor.as_ref(), &f.out, &CancellationToken::new());
    result.unwrap();

    assert_eq!(fs::read(f.out.join("readme.txt")).unwrap(), b"stored in rar\n");
    assert_eq!(fs::read(f.out.join("bin/game.sh")).unwrap(), b"#!/bin/sh\necho hi\n");
    assert_monotonic(&progress);
    assert_eq!(progress.last(), Some(&size));
}

#[test]
fn rar_cancelled_before_start() {
    let f = fixture("stored.rar");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = new_extractor("game.rar", &rar_fixture())
        .unwrap()
        .extract(&f.out, &cancel, &|_| {})
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Cancelled));
    assert!(!f.out.join("readme.txt").exists());
}

#[test]
fn empty_archives_never_succeed() {
    for name in ["empty.tar", "empty.tar.gz", "empty.zip", "empty.7z", "empty.rar"] {
        let f = fixture(name);
        fs::write(&f.archive, b"").unwrap();
        let result = new_extractor(name, &f.archive)
            .and_then(|e| e.extract(&f.out, &CancellationToken::new(), &|_| {}));
        match result {
            Err(ArchiveError::Decode(_)) | Err(ArchiveError::Io(_)) => {}
            other => panic!("{name}: expected decode or I/O error, got {other:?}"),
        }
    }
}

#[test]
fn unsupported_extension() {
    let err = new_extractor("notes.txt", Path::new("/nonexistent")).err().unwrap();
    assert!(matches!(err, ArchiveError::UnsupportedArchive(ref n) if n == "notes.txt"));
}

#[test]
fn extractor_is_chosen_from_name_not_disk_path() {
    let f = fixture("abc123.tmp");
    write_zip(&f.archive, &[("x.txt", b"x")]);

    let extractor = new_extractor("Some Game (v1) (2001).zip", &f.archive).unwrap();
    extractor
        .extract(&f.out, &CancellationToken::new(), &|_| {})
        .unwrap();

    assert_eq!(fs::read(f.out.join("x.txt")).unwrap(), b"x");
}
