use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use boyl_client::*;
use boyl_db::*;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

// ── Fakes ───────────────────────────────────────────────────────────────────

/// Serves the first chunk immediately, then waits for a release signal.
struct GatedReader {
    data: Cursor<Vec<u8>>,
    started: Option<Sender<()>>,
    release: Receiver<()>,
}

impl Read for GatedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.started.take() {
            Some(started) => {
                let n = buf.len().min(4096);
                let read = self.data.read(&mut buf[..n])?;
                let _ = started.send(());
                Ok(read)
            }
            None => {
                let _ = self.release.recv();
                self.data.read(buf)
            }
        }
    }
}

#[derive(Default)]
struct FakeRemote {
    games: HashMap<String, (RemoteGame, Vec<u8>)>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    lookup_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl FakeRemote {
    fn with_game(mut self, game: RemoteGame, archive: Vec<u8>) -> Self {
        self.games.insert(game.id.clone(), (game, archive));
        self
    }

    fn gated(self, started: Sender<()>, release: Receiver<()>) -> Self {
        *self.gate.lock().unwrap() = Some((started, release));
        self
    }

    /// Pause the next game lookup: signal `looked_up`, then wait for
    /// `proceed`.
    fn lookup_gated(self, looked_up: Sender<()>, proceed: Receiver<()>) -> Self {
        *self.lookup_gate.lock().unwrap() = Some((looked_up, proceed));
        self
    }
}

impl Remote for FakeRemote {
    fn get_game(&self, id: &str) -> Result<RemoteGame, RemoteError> {
        if let Some((looked_up, proceed)) = self.lookup_gate.lock().unwrap().take() {
            looked_up.send(()).unwrap();
            proceed.recv().unwrap();
        }
        self.games
            .get(id)
            .map(|(game, _)| game.clone())
            .ok_or_else(|| RemoteError::Status {
                code: 404,
                body: "not found".to_string(),
            })
    }

    fn download(
        &self,
        game_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<RemoteDownload, RemoteError> {
        let (_, archive) = &self.games[game_id];
        let total = Some(archive.len() as u64);
        let data = Cursor::new(archive.clone());
        let reader: Box<dyn Read + Send> = match self.gate.lock().unwrap().take() {
            Some((started, release)) => Box::new(GatedReader {
                data,
                started: Some(started),
                release,
            }),
            None => Box::new(data),
        };
        Ok(RemoteDownload { reader, total })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Incompressible bytes, so archive size tracks payload size.
fn noise(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x9e37_79b9;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

fn game(id: &str, name: &str, path: &str) -> RemoteGame {
    RemoteGame {
        id: id.to_string(),
        name: name.to_string(),
        path: path.to_string(),
        executable: String::new(),
    }
}

struct Env {
    _dir: tempfile::TempDir,
    games: PathBuf,
    db: Db,
    manager: Arc<Manager>,
}

fn env(remote: FakeRemote) -> Env {
    let dir = tempfile::tempdir().unwrap();
    let games = dir.path().join("games");
    let db = Db::memory_client().unwrap();
    let settings = Settings::new(db.clone());
    settings
        .set_string(SettingKey::GamesDirectory, &games.to_string_lossy())
        .unwrap();
    let manager = Arc::new(Manager::new(db.clone(), Arc::new(remote), settings));
    Env {
        _dir: dir,
        games,
        db,
        manager,
    }
}

impl Env {
    fn insert(&self, game: &str) -> DownloadRecord {
        insert_download(&self.db.lock(), game).unwrap()
    }

    fn set_status(&self, record: &DownloadRecord, status: DownloadStatus) -> DownloadRecord {
        let mut record = record.clone();
        record.status = status;
        save_download(&self.db.lock(), &mut record).unwrap();
        record
    }

    fn record(&self, id: &str) -> Option<DownloadRecord> {
        find_download(&self.db.lock(), id).unwrap()
    }

    fn installed(&self, game: &str) -> Option<ClientGame> {
        find_client_game_by_remote(&self.db.lock(), game).unwrap()
    }

    /// Run the worker on this thread over `records`.
    fn work(&self, records: Vec<DownloadRecord>) {
        let (tx, rx) = queue();
        for record in records {
            tx.send(record).unwrap();
        }
        drop(tx);
        self.manager.worker(rx);
    }
}

fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(20));
    }
}

// ── Full runs ───────────────────────────────────────────────────────────────

#[test]
fn starting_record_runs_to_completion() {
    let text: Vec<u8> = b"All work and no play makes Jack a dull boy.\n"
        .iter()
        .copied()
        .cycle()
        .take(5 * 1024 * 1024)
        .collect();
    let archive = zip_bytes(&[("manual.txt", text.as_slice())]);
    let env = env(FakeRemote::default().with_game(
        game("g1", "Anno 1404", "/srv/games/Anno 1404 (v2.01) (2010).zip"),
        archive,
    ));

    let record = env.insert("g1");
    env.work(vec![record.clone()]);

    let done = env.record(&record.id).unwrap();
    assert_eq!(done.status, DownloadStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert!(!done.active);
    assert!(done.text.is_empty());

    let base = env.games.join("Anno 1404");
    assert!(!base.join("g1.tmp").exists());
    assert_eq!(std::fs::read(base.join("manual.txt")).unwrap(), text);

    let installed = env.installed("g1").unwrap();
    assert_eq!(Path::new(&installed.path), base);
    assert_eq!(installed.executable, "");
}

#[test]
fn launcher_is_discovered_when_server_names_none() {
    let archive = zip_bytes(&[
        ("setup.exe", b"MZ"),
        ("Balatro/bin/Balatro.exe", b"MZ"),
        ("Balatro/readme.txt", b"hi"),
    ]);
    let env = env(FakeRemote::default().with_game(game("g2", "Balatro", "Balatro (v1.0) (2024).zip"), archive));

    let record = env.insert("g2");
    env.work(vec![record]);

    let installed = env.installed("g2").unwrap();
    let expected = env.games.join("Balatro/Balatro/bin/Balatro.exe");
    assert_eq!(Path::new(&installed.executable), expected);
}

#[test]
fn server_executable_is_kept() {
    let mut remote_game = game("g3", "Quake", "quake.zip");
    remote_game.executable = "/opt/quake/quake".to_string();
    let env = env(FakeRemote::default().with_game(remote_game, zip_bytes(&[("deep/er/q.exe", b"MZ")])));

    let record = env.insert("g3");
    env.work(vec![record]);

    assert_eq!(env.installed("g3").unwrap().executable, "/opt/quake/quake");
}

#[test]
fn reinstall_updates_the_existing_game() {
    let env = env(FakeRemote::default().with_game(game("g4", "Doom", "doom.zip"), zip_bytes(&[("doom.exe", b"MZ")])));

    env.work(vec![env.insert("g4")]);
    let first = env.installed("g4").unwrap();
    env.work(vec![env.insert("g4")]);
    let second = env.installed("g4").unwrap();

    assert_eq!(first.id, second.id);
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn unknown_game_fails_with_status_text() {
    let env = env(FakeRemote::default());
    let record = env.insert("nope");
    env.work(vec![record.clone()]);

    let failed = env.record(&record.id).unwrap();
    assert_eq!(failed.status, DownloadStatus::Failed);
    assert_eq!(failed.text, "unexpected status code: 404, body: not found");
    assert!(env.installed("nope").is_none());
}

#[test]
fn unsupported_archive_fails_and_worker_continues() {
    let env = env(
        FakeRemote::default()
            .with_game(game("bad", "Disc", "disc.iso"), b"not an archive".to_vec())
            .with_game(game("good", "Good", "good.zip"), zip_bytes(&[("good.exe", b"MZ")])),
    );
    let bad = env.insert("bad");
    let good = env.insert("good");
    env.work(vec![bad.clone(), good.clone()]);

    let bad = env.record(&bad.id).unwrap();
    assert_eq!(bad.status, DownloadStatus::Failed);
    assert!(bad.text.contains("unsupported archive"), "{}", bad.text);
    assert_eq!(env.record(&good.id).unwrap().status, DownloadStatus::Completed);
}

#[test]
fn missing_games_directory_fails_the_record() {
    let db = Db::memory_client().unwrap();
    let manager = Manager::new(db.clone(), Arc::new(FakeRemote::default()), Settings::new(db.clone()));
    let record = insert_download(&db.lock(), "g1").unwrap();

    let (tx, rx) = queue();
    tx.send(record.clone()).unwrap();
    drop(tx);
    manager.worker(rx);

    let failed = find_download(&db.lock(), &record.id).unwrap().unwrap();
    assert_eq!(failed.status, DownloadStatus::Failed);
    assert!(failed.text.contains("gamesDirectory"));
}

// ── Replay ──────────────────────────────────────────────────────────────────

#[test]
fn interrupted_record_is_replayed_from_the_start() {
    let env = env(FakeRemote::default().with_game(game("g5", "Myst", "myst.zip"), zip_bytes(&[("myst.exe", b"MZ")])));
    let record = env.insert("g5");
    env.set_status(&record, DownloadStatus::Extracting);

    let (tx, rx) = queue();
    assert_eq!(env.manager.replay(&tx).unwrap(), 1);
    drop(tx);
    env.manager.worker(rx);

    assert_eq!(env.record(&record.id).unwrap().status, DownloadStatus::Completed);
    assert!(env.games.join("Myst/myst.exe").exists());
}

#[test]
fn failed_record_replays_as_noop() {
    let env = env(FakeRemote::default().with_game(game("g6", "Thief", "thief.zip"), zip_bytes(&[("t.exe", b"MZ")])));
    let record = env.set_status(&env.insert("g6"), DownloadStatus::Failed);

    env.work(vec![record.clone()]);

    assert_eq!(env.record(&record.id).unwrap().status, DownloadStatus::Failed);
    assert!(env.installed("g6").is_none());
    assert!(!env.games.join("Thief").exists());
}

#[test]
fn completed_record_replays_without_downloading() {
    let env = env(FakeRemote::default().with_game(game("g7", "Hexen", "hexen.zip"), Vec::new()));
    let mut record = env.insert("g7");
    record.progress = 1.0;
    let record = env.set_status(&record, DownloadStatus::Completed);
    let exe = env.games.join("Hexen/hexen.exe");
    std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
    std::fs::write(&exe, b"MZ").unwrap();

    env.work(vec![record.clone()]);

    let after = env.record(&record.id).unwrap();
    assert_eq!(after.status, DownloadStatus::Completed);
    assert_eq!(after.updated, record.updated);
    assert_eq!(Path::new(&env.installed("g7").unwrap().executable), exe);
}

// ── Cancellation and telemetry ──────────────────────────────────────────────

#[test]
fn progress_is_persisted_while_downloading() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let archive = zip_bytes(&[("big.bin", noise(256 * 1024).as_slice())]);
    let env = env(
        FakeRemote::default()
            .with_game(game("g8", "Slow", "slow.zip"), archive)
            .gated(started_tx, release_rx),
    );
    let record = env.insert("g8");

    let (tx, rx) = queue();
    tx.send(record.clone()).unwrap();
    drop(tx);
    let worker = {
        let manager = env.manager.clone();
        thread::spawn(move || manager.worker(rx))
    };

    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    wait_for("download progress", || {
        env.record(&record.id)
            .is_some_and(|r| r.status == DownloadStatus::Downloading && r.progress > 0.0)
    });
    let during = env.record(&record.id).unwrap();
    assert!(during.active);
    assert!(during.total > 0);
    assert!(during.progress < 1.0);

    release_tx.send(()).unwrap();
    worker.join().unwrap();
    assert_eq!(env.record(&record.id).unwrap().status, DownloadStatus::Completed);
}

#[test]
fn cancel_twice_fails_then_deletes() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let archive = zip_bytes(&[("big.bin", noise(256 * 1024).as_slice())]);
    let env = env(
        FakeRemote::default()
            .with_game(game("g9", "Cancelled", "c.zip"), archive)
            .gated(started_tx, release_rx),
    );
    let record = env.insert("g9");

    let (tx, rx) = queue();
    tx.send(record.clone()).unwrap();
    drop(tx);
    let worker = {
        let manager = env.manager.clone();
        thread::spawn(move || manager.worker(rx))
    };
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(env.manager.cancel(&record.id).unwrap(), CancelOutcome::Cancelled);
    assert_eq!(env.record(&record.id).unwrap().status, DownloadStatus::Failed);

    assert_eq!(env.manager.cancel(&record.id).unwrap(), CancelOutcome::Deleted);
    assert!(env.record(&record.id).is_none());

    let _ = release_tx.send(());
    worker.join().unwrap();

    assert!(env.record(&record.id).is_none());
    assert!(env.installed("g9").is_none());
    assert!(matches!(
        env.manager.cancel(&record.id),
        Err(DownloadError::NotFound(_))
    ));
}

#[test]
fn cancel_frees_the_worker_from_a_stalled_download() {
    let (started_tx, started_rx) = mpsc::channel();
    // Never released: the body stalls like a server that stopped sending.
    let (_release_tx, release_rx) = mpsc::channel();
    let env = env(
        FakeRemote::default()
            .with_game(game("g12", "Stalled", "s.zip"), zip_bytes(&[("big.bin", noise(256 * 1024).as_slice())]))
            .with_game(game("g13", "Next", "next.zip"), zip_bytes(&[("next.exe", b"MZ")]))
            .gated(started_tx, release_rx),
    );
    let stalled = env.insert("g12");
    let next = env.insert("g13");

    let (tx, rx) = queue();
    tx.send(stalled.clone()).unwrap();
    tx.send(next.clone()).unwrap();
    drop(tx);
    let (done_tx, done_rx) = mpsc::channel();
    {
        let manager = env.manager.clone();
        thread::spawn(move || {
            manager.worker(rx);
            let _ = done_tx.send(());
        });
    }
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(env.manager.cancel(&stalled.id).unwrap(), CancelOutcome::Cancelled);
    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("worker still blocked in the stalled read");

    let failed = env.record(&stalled.id).unwrap();
    assert_eq!(failed.status, DownloadStatus::Failed);
    assert_eq!(failed.text, "download cancelled");
    assert!(!failed.active);
    assert_eq!(env.record(&next.id).unwrap().status, DownloadStatus::Completed);
    assert!(env.installed("g12").is_none());
}

#[test]
fn cancel_during_extraction_persists_no_progress() {
    let (looked_up_tx, looked_up_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let archive = zip_bytes(&[("big.bin", noise(256 * 1024).as_slice())]);
    let env = env(
        FakeRemote::default()
            .with_game(game("g14", "Halfway", "halfway.zip"), archive.clone())
            .lookup_gated(looked_up_tx, proceed_rx),
    );
    // Downloaded already; the job picks up at extraction.
    let record = env.set_status(&env.insert("g14"), DownloadStatus::Extracting);
    let temp = env.games.join("Halfway/g14.tmp");
    std::fs::create_dir_all(temp.parent().unwrap()).unwrap();
    std::fs::write(&temp, &archive).unwrap();

    let (tx, rx) = queue();
    tx.send(record.clone()).unwrap();
    drop(tx);
    let worker = {
        let manager = env.manager.clone();
        thread::spawn(move || manager.worker(rx))
    };

    // Holding the store parks the job on its first extraction-phase write.
    looked_up_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let store = env.db.lock();
    proceed_tx.send(()).unwrap();
    wait_for("extraction to size the archive", || {
        env.manager.live(&record.id).is_some_and(|r| r.total > 0)
    });

    let canceller = {
        let manager = env.manager.clone();
        let id = record.id.clone();
        thread::spawn(move || manager.cancel(&id).unwrap())
    };
    wait_for("the cancel to reach the job", || {
        env.manager
            .live(&record.id)
            .is_some_and(|r| r.status == DownloadStatus::Failed)
    });
    drop(store);

    assert_eq!(canceller.join().unwrap(), CancelOutcome::Cancelled);
    worker.join().unwrap();

    let failed = env.record(&record.id).unwrap();
    assert_eq!(failed.status, DownloadStatus::Failed);
    assert_eq!(failed.progress, 0.0);
    assert_eq!(failed.text, "download cancelled");
    assert!(!env.games.join("Halfway/big.bin").exists());
    assert!(env.installed("g14").is_none());

    assert_eq!(env.manager.cancel(&record.id).unwrap(), CancelOutcome::Deleted);
    assert!(env.record(&record.id).is_none());
}

#[test]
fn untracked_cancel_uses_the_stored_record() {
    let env = env(FakeRemote::default());
    let record = env.set_status(&env.insert("g10"), DownloadStatus::Downloading);

    assert_eq!(env.manager.cancel(&record.id).unwrap(), CancelOutcome::Cancelled);
    assert_eq!(env.record(&record.id).unwrap().status, DownloadStatus::Failed);
    assert_eq!(env.manager.cancel(&record.id).unwrap(), CancelOutcome::Deleted);
    assert!(env.record(&record.id).is_none());
}

#[test]
fn shutdown_clears_active_flags() {
    let env = env(FakeRemote::default());
    let mut record = env.insert("g11");
    record.active = true;
    save_download(&env.db.lock(), &mut record).unwrap();

    assert_eq!(env.manager.shutdown().unwrap(), 1);
    assert!(!env.record(&record.id).unwrap().active);
}
