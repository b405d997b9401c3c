//! Batch orchestrator tests against an in-process engine
//!
//! The mock engine writes stem files into the work directory and returns a
//! fixed result. File names steer its behavior: `broken*` fails, `panic*`
//! panics, `slowrender*` never finishes rendering, `badresult*` returns
//! unsorted beats, `lagging*` takes longer to analyze, `dirstem*` reports a
//! directory as its bass stem.

use async_trait::async_trait;
use mdx_batch::{
    AnalysisEngine, BatchError, BatchOptions, BatchOrchestrator, EngineError, EngineOutput,
    FailureKind, FileOutcome, RenderRequest, ResourcePolicy,
};
use mdx_common::events::{BatchEvent, EventBus};
use mdx_common::store::{ArtifactKind, ResultEncoding, Storage};
use mdx_common::{AnalysisResult, Segment, SegmentLabel, Stem, StorageLayout, TrackId};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockEngine {
    calls: Mutex<Vec<String>>,
    /// `start:<name>` and `end:<name>` in the order they happened
    timeline: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

fn scenario_result() -> AnalysisResult {
    AnalysisResult {
        file_name: String::new(),
        file_path: String::new(),
        bpm: 120.0,
        beats: vec![0.5, 1.0, 1.5, 2.0],
        downbeats: vec![0.5, 2.0],
        beat_positions: vec![],
        segments: vec![
            Segment { start: 0.0, end: 8.0, label: SegmentLabel::Intro },
            Segment { start: 8.0, end: 32.0, label: SegmentLabel::Verse },
        ],
        total_duration: 240.5,
    }
}

fn stem_of(input: &Path) -> String {
    input.file_stem().unwrap().to_string_lossy().into_owned()
}

#[async_trait]
impl AnalysisEngine for MockEngine {
    async fn analyze(&self, input: &Path, workdir: &Path) -> Result<EngineOutput, EngineError> {
        let name = stem_of(input);
        self.calls.lock().unwrap().push(name.clone());
        self.timeline.lock().unwrap().push(format!("start:{}", name));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if name.starts_with("lagging") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        if name.starts_with("broken") {
            return Err(EngineError::Failed {
                code: Some(1),
                stderr: "cannot decode audio".to_string(),
            });
        }
        if name.starts_with("panic") {
            panic!("engine crashed on {}", name);
        }

        let mut result = scenario_result();
        if name.starts_with("badresult") {
            result.beats = vec![1.0, 0.5];
        }

        let mut stems = Vec::new();
        for stem in Stem::ALL {
            let path = workdir.join(format!("{}.mp3", stem.file_stem()));
            if name.starts_with("dirstem") && stem == Stem::Bass {
                std::fs::create_dir(&path).unwrap();
            } else {
                std::fs::write(&path, format!("{}-{}", name, stem.file_stem())).unwrap();
            }
            stems.push((stem, path));
        }
        let embedding = workdir.join("e.npy");
        std::fs::write(&embedding, b"embed").unwrap();

        self.timeline.lock().unwrap().push(format!("end:{}", name));
        Ok(EngineOutput {
            result,
            mixdown: Some(input.to_path_buf()),
            stems,
            artifacts: vec![(ArtifactKind::Embedding, embedding)],
        })
    }

    async fn render(
        &self,
        input: &Path,
        request: &RenderRequest,
        workdir: &Path,
    ) -> Result<Vec<(ArtifactKind, PathBuf)>, EngineError> {
        if stem_of(input).starts_with("slowrender") {
            std::future::pending::<()>().await;
        }
        assert_eq!(request.backend, "Agg");
        let mut out = Vec::new();
        if request.visualization {
            let path = workdir.join("viz.pdf");
            std::fs::write(&path, b"%PDF").unwrap();
            out.push((ArtifactKind::Visualization, path));
        }
        Ok(out)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    inputs: PathBuf,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let inputs = dir.path().join("inputs");
        let root = dir.path().join("out");
        std::fs::create_dir_all(&inputs).unwrap();
        Self { _dir: dir, inputs, root }
    }

    fn input(&self, name: &str) -> PathBuf {
        let path = self.inputs.join(name);
        std::fs::write(&path, b"mix").unwrap();
        path
    }

    fn storage(&self) -> Storage {
        Storage::new(StorageLayout::standard(&self.root), ResultEncoding::Gzip)
    }
}

fn pool(workers: usize) -> ResourcePolicy {
    ResourcePolicy {
        cpu_count: workers,
        accelerator_memory_mb: None,
        memory_per_job_mb: None,
        max_workers: None,
    }
}

fn track(name: &str) -> TrackId {
    TrackId::new(name).unwrap()
}

#[tokio::test]
async fn tc_batch_001_failure_isolated_to_one_index() {
    // Given: five inputs, the third of which the engine cannot analyze
    let fx = Fixture::new();
    let files = vec![
        fx.input("a.mp3"),
        fx.input("b.mp3"),
        fx.input("broken.mp3"),
        fx.input("d.mp3"),
        fx.input("e.mp3"),
    ];
    let storage = fx.storage();
    let orchestrator = BatchOrchestrator::new(storage.clone(), Arc::new(MockEngine::default()));

    // When: the batch runs
    let report = orchestrator.run_batch(files.clone(), &BatchOptions::default()).await.unwrap();

    // Then: exactly index 2 failed, the rest were published, order preserved
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 4);
    for (i, outcome) in report.outcomes.iter().enumerate() {
        assert_eq!(outcome.input(), files[i].as_path());
        assert_eq!(outcome.is_failure(), i == 2);
    }
    match &report.outcomes[2] {
        FileOutcome::Failure { kind, message, track: t, .. } => {
            assert_eq!(*kind, FailureKind::Analysis);
            assert!(message.contains("cannot decode audio"));
            assert_eq!(t.as_ref(), Some(&track("broken")));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!storage.results.exists(&track("broken")));
    for name in ["a", "b", "d", "e"] {
        assert_eq!(storage.results.get(&track(name)).unwrap().bpm, 120.0);
    }
}

#[tokio::test]
async fn tc_batch_002_sequential_follows_input_order() {
    let fx = Fixture::new();
    let files = vec![fx.input("c.mp3"), fx.input("a.mp3"), fx.input("b.mp3")];
    let engine = Arc::new(MockEngine::default());
    let orchestrator = BatchOrchestrator::new(fx.storage(), engine.clone());

    let options = BatchOptions {
        multiprocess: false,
        ..BatchOptions::default()
    };
    let report = orchestrator.run_batch(files, &options).await.unwrap();

    assert_eq!(report.strategy, "sequential");
    assert_eq!(*engine.calls.lock().unwrap(), vec!["c", "a", "b"]);
}

#[tokio::test]
async fn tc_batch_003_worker_pool_keeps_report_order() {
    let fx = Fixture::new();
    let files: Vec<PathBuf> = (0..8).map(|i| fx.input(&format!("t{}.mp3", i))).collect();
    let engine = Arc::new(MockEngine {
        delay: Some(Duration::from_millis(10)),
        ..MockEngine::default()
    });
    let orchestrator =
        BatchOrchestrator::new(fx.storage(), engine).with_resource_policy(pool(4));

    let options = BatchOptions {
        multiprocess: true,
        ..BatchOptions::default()
    };
    let report = orchestrator.run_batch(files.clone(), &options).await.unwrap();

    assert_eq!(report.strategy, "worker_pool(4)");
    assert_eq!(report.succeeded(), 8);
    let order: Vec<&Path> = report.outcomes.iter().map(|o| o.input()).collect();
    let expected: Vec<&Path> = files.iter().map(|p| p.as_path()).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn tc_batch_004_panicking_worker_recorded_as_failure() {
    let fx = Fixture::new();
    let files = vec![fx.input("a.mp3"), fx.input("panic.mp3"), fx.input("c.mp3")];
    let orchestrator = BatchOrchestrator::new(fx.storage(), Arc::new(MockEngine::default()))
        .with_resource_policy(pool(2));

    let options = BatchOptions {
        multiprocess: true,
        ..BatchOptions::default()
    };
    let report = orchestrator.run_batch(files, &options).await.unwrap();

    assert_eq!(report.succeeded(), 2);
    match &report.outcomes[1] {
        FileOutcome::Failure { kind, message, .. } => {
            assert_eq!(*kind, FailureKind::WorkerPanic);
            assert!(message.contains("engine crashed"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn tc_batch_005_existing_result_skipped_unless_overwrite() {
    let fx = Fixture::new();
    let files = vec![fx.input("song.mp3")];
    let engine = Arc::new(MockEngine::default());
    let orchestrator = BatchOrchestrator::new(fx.storage(), engine.clone());

    let first = orchestrator.run_batch(files.clone(), &BatchOptions::default()).await.unwrap();
    assert_eq!(first.succeeded(), 1);

    let second = orchestrator.run_batch(files.clone(), &BatchOptions::default()).await.unwrap();
    assert!(matches!(&second.outcomes[0], FileOutcome::Skipped { track: t, .. } if *t == track("song")));

    let options = BatchOptions {
        overwrite: true,
        ..BatchOptions::default()
    };
    let third = orchestrator.run_batch(files, &options).await.unwrap();
    assert_eq!(third.succeeded(), 1);
    assert_eq!(engine.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn tc_batch_006_unwritable_root_fails_fast() {
    // Given: an output root that is a regular file
    let fx = Fixture::new();
    std::fs::write(&fx.root, b"not a directory").unwrap();
    let engine = Arc::new(MockEngine::default());
    let orchestrator = BatchOrchestrator::new(fx.storage(), engine.clone());

    let err = orchestrator
        .run_batch(vec![fx.input("a.mp3")], &BatchOptions::default())
        .await
        .unwrap_err();

    // Then: nothing was analyzed
    assert!(matches!(err, BatchError::StorageUnavailable { .. }));
    assert!(engine.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn tc_batch_007_missing_input_and_invalid_result() {
    let fx = Fixture::new();
    let files = vec![
        fx.inputs.join("missing.mp3"),
        fx.input("badresult.mp3"),
        fx.input("ok.mp3"),
    ];
    let storage = fx.storage();
    let orchestrator = BatchOrchestrator::new(storage.clone(), Arc::new(MockEngine::default()));

    let report = orchestrator.run_batch(files, &BatchOptions::default()).await.unwrap();

    let kinds: Vec<Option<FailureKind>> = report
        .outcomes
        .iter()
        .map(|o| match o {
            FileOutcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![Some(FailureKind::InputNotFound), Some(FailureKind::InvalidResult), None]
    );
    // Nothing from the rejected analysis reached the stores
    assert!(storage.media.available(&track("badresult")).is_empty());
}

#[tokio::test]
async fn tc_batch_008_published_media_and_artifacts() {
    let fx = Fixture::new();
    let storage = fx.storage();
    let orchestrator = BatchOrchestrator::new(storage.clone(), Arc::new(MockEngine::default()));

    let options = BatchOptions {
        include_visualization: true,
        ..BatchOptions::default()
    };
    let report = orchestrator.run_batch(vec![fx.input("song.mp3")], &options).await.unwrap();

    match &report.outcomes[0] {
        FileOutcome::Success { metadata, .. } => {
            assert_eq!(metadata.beat_count, 4);
            assert_eq!(metadata.segment_count, 2);
            assert_eq!(metadata.stem_count, 4);
            assert_eq!(metadata.artifact_count, 2);
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let song = track("song");
    assert_eq!(storage.media.available(&song).len(), 5);
    let drums = std::fs::read_to_string(storage.layout.stem_path(&song, Stem::Drums)).unwrap();
    assert_eq!(drums, "song-drums");
    assert_eq!(storage.artifacts.get(&song, ArtifactKind::Visualization).unwrap(), b"%PDF");
    let stored = storage.results.get(&song).unwrap();
    assert_eq!(stored.file_name, "song.mp3");
    assert_eq!(stored.file_path, fx.inputs.join("song.mp3").display().to_string());
}

#[tokio::test]
async fn tc_batch_009_render_timeout_does_not_block_publication() {
    let fx = Fixture::new();
    let storage = fx.storage();
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let orchestrator = BatchOrchestrator::new(storage.clone(), Arc::new(MockEngine::default()))
        .with_event_bus(bus);

    let options = BatchOptions {
        include_visualization: true,
        render_timeout: Duration::from_millis(50),
        ..BatchOptions::default()
    };
    let report = orchestrator
        .run_batch(vec![fx.input("slowrender.mp3")], &options)
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    assert!(storage.results.exists(&track("slowrender")));

    let mut saw_render_failure = false;
    while let Ok(event) = rx.try_recv() {
        if let BatchEvent::RenderFailed { track, .. } = event {
            assert_eq!(track, "slowrender");
            saw_render_failure = true;
        }
    }
    assert!(saw_render_failure);
}

#[tokio::test]
async fn tc_batch_010_events_bracket_the_batch() {
    let fx = Fixture::new();
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let orchestrator = BatchOrchestrator::new(fx.storage(), Arc::new(MockEngine::default()))
        .with_event_bus(bus);

    orchestrator
        .run_batch(vec![fx.input("a.mp3"), fx.input("broken.mp3")], &BatchOptions::default())
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(match event {
            BatchEvent::BatchStarted { total_files, .. } => format!("started:{}", total_files),
            BatchEvent::FileStarted { index, .. } => format!("file:{}", index),
            BatchEvent::FileCompleted { index, .. } => format!("done:{}", index),
            BatchEvent::FileFailed { index, .. } => format!("failed:{}", index),
            BatchEvent::BatchCompleted { succeeded, failed, .. } => {
                format!("completed:{}/{}", succeeded, failed)
            }
            other => format!("{:?}", other),
        });
    }
    assert_eq!(
        names,
        vec!["started:2", "file:0", "done:0", "file:1", "failed:1", "completed:1/1"]
    );
}

#[tokio::test]
async fn tc_batch_011_storage_write_failure_isolated_to_one_index() {
    // Given: the second file's engine output names a directory as a stem
    let fx = Fixture::new();
    let files = vec![fx.input("a.mp3"), fx.input("dirstem.mp3"), fx.input("c.mp3")];
    let storage = fx.storage();
    let orchestrator = BatchOrchestrator::new(storage.clone(), Arc::new(MockEngine::default()));

    // When: the batch runs
    let report = orchestrator.run_batch(files, &BatchOptions::default()).await.unwrap();

    // Then: only that file failed, as a storage write, and left no result
    match &report.outcomes[1] {
        FileOutcome::Failure { kind, track: t, .. } => {
            assert_eq!(*kind, FailureKind::StorageWrite);
            assert_eq!(t.as_ref(), Some(&track("dirstem")));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(&report.outcomes[0], FileOutcome::Success { .. }));
    assert!(matches!(&report.outcomes[2], FileOutcome::Success { .. }));
    assert!(!storage.results.exists(&track("dirstem")));
    assert!(storage.results.exists(&track("c")));
}

#[tokio::test]
async fn tc_batch_012_same_track_from_two_inputs_has_one_writer() {
    for multiprocess in [true, false] {
        // Given: two inputs in different folders that map to the same track
        let fx = Fixture::new();
        let first = fx.inputs.join("a").join("song.mp3");
        let second = fx.inputs.join("b").join("song.wav");
        for path in [&first, &second] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"mix").unwrap();
        }
        let storage = fx.storage();
        let engine = Arc::new(MockEngine {
            delay: Some(Duration::from_millis(50)),
            ..MockEngine::default()
        });
        let orchestrator = BatchOrchestrator::new(storage.clone(), engine.clone())
            .with_resource_policy(pool(2));

        // When: the batch runs
        let options = BatchOptions {
            multiprocess,
            ..BatchOptions::default()
        };
        let report = orchestrator
            .run_batch(vec![first.clone(), second.clone()], &options)
            .await
            .unwrap();

        // Then: the first input owns the track, the second is refused
        assert!(matches!(&report.outcomes[0], FileOutcome::Success { .. }), "{}", multiprocess);
        match &report.outcomes[1] {
            FileOutcome::Failure { kind, track: t, message, .. } => {
                assert_eq!(*kind, FailureKind::DuplicateTrack);
                assert_eq!(t.as_ref(), Some(&track("song")));
                assert!(message.contains("song.mp3"), "{}", message);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(engine.calls.lock().unwrap().len(), 1);
        assert_eq!(storage.results.get(&track("song")).unwrap().file_name, "song.mp3");
    }
}

#[tokio::test]
async fn tc_batch_013_slow_first_file_does_not_hold_back_the_pool() {
    // Given: a pool of two where the first file takes much longer
    let fx = Fixture::new();
    let files = vec![fx.input("lagging.mp3"), fx.input("b.mp3"), fx.input("c.mp3")];
    let engine = Arc::new(MockEngine::default());
    let orchestrator =
        BatchOrchestrator::new(fx.storage(), engine.clone()).with_resource_policy(pool(2));

    let options = BatchOptions {
        multiprocess: true,
        ..BatchOptions::default()
    };
    let report = orchestrator.run_batch(files.clone(), &options).await.unwrap();

    // Then: the third file starts in the freed slot before the first ends,
    // and the report is still in input order
    let timeline = engine.timeline.lock().unwrap().clone();
    let position = |entry: &str| timeline.iter().position(|e| e == entry).unwrap();
    assert!(position("start:c") < position("end:lagging"), "{:?}", timeline);
    let order: Vec<&Path> = report.outcomes.iter().map(|o| o.input()).collect();
    let expected: Vec<&Path> = files.iter().map(|p| p.as_path()).collect();
    assert_eq!(order, expected);
}
