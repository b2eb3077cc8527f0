//! End-to-end training runs on small corpora.

use std::fs;
use std::path::{Path, PathBuf};

use sememe2vec::*;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn abc_corpus() -> String {
    "a b a c a b </s>\n".repeat(1000)
}

/// A small, fast, single-threaded configuration.
fn small_config(dir: &TempDir, corpus: &str, semantic: &str) -> TrainConfig {
    TrainConfig {
        train_file: write(dir.path(), "corpus.txt", corpus),
        output_file: Some(dir.path().join("vectors.txt")),
        projection: Some(ProjectionSource::Text(write(
            dir.path(),
            "semantic.txt",
            semantic,
        ))),
        dim: 10,
        window: 2,
        negative: 5,
        min_count: 1,
        threads: 1,
        iter: 5,
        basis_count: 4,
        table_size: 1_000_000,
        hash_size: 1 << 12,
        ..TrainConfig::default()
    }
}

fn output_lines(path: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .collect()
}

fn row(line: &[String]) -> Vec<real> {
    line.iter().map(|f| f.parse().unwrap()).collect()
}

#[test]
fn abc_corpus_builds_vocabulary_and_well_formed_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(&dir, &abc_corpus(), "");
    let output = config.output_file.clone().unwrap();

    let mut trainer = Trainer::new(config).unwrap();
    let vocab = trainer.vocab();
    let words: Vec<&[u8]> = vocab.words().iter().map(|vw| &vw.word[..]).collect();
    assert_eq!(words[0], b"</s>");
    assert_eq!(words[1], b"a");
    assert_eq!(vocab.len(), 4);
    assert!(words.contains(&&b"b"[..]) && words.contains(&&b"c"[..]));
    assert_eq!(trainer.projections().present_count(), 0);

    let trained = trainer.train().unwrap();
    trainer.save(&trained).unwrap();

    let lines = output_lines(&output);
    assert_eq!(lines[0], ["4", "10", "0.025"]);
    for (i, line) in lines[1..5].iter().enumerate() {
        assert_eq!(line[0].as_bytes(), trainer.vocab().word(i));
        assert_eq!(line.len(), 11);
        assert!(row(&line[1..]).iter().all(|v| v.is_finite()));
    }
    for line in &lines[5..9] {
        assert_eq!(line.len(), 10);
    }
    assert_eq!(lines[9].len(), 4 * 10);
    assert_eq!(lines.len(), 10);

    let vectors = Vectors::load(&output).unwrap();
    assert_eq!(vectors.num_words(), 4);
    assert_eq!(vectors.size(), 10);
}

#[test]
fn single_thread_runs_are_reproducible() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    for dir in [&first, &second] {
        run(small_config(dir, &abc_corpus(), "")).unwrap();
    }
    let a = fs::read(first.path().join("vectors.txt")).unwrap();
    let b = fs::read(second.path().join("vectors.txt")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn words_sharing_contexts_end_up_closer() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = "x p y\nx q y\nz r w\n".repeat(1000);
    let config = TrainConfig {
        sample: 0.0,
        ..small_config(&dir, &corpus, "")
    };
    let mut trainer = Trainer::new(config).unwrap();
    let trained = trainer.train().unwrap();

    let vocab = trainer.vocab();
    let vector = |w: &str| trained.embeddings.syn0.row_values(vocab.search(w).unwrap());
    let (p, q, r) = (vector("p"), vector("q"), vector("r"));
    assert!(
        cosine(&p, &q) > cosine(&p, &r),
        "cos(p, q) = {}, cos(p, r) = {}",
        cosine(&p, &q),
        cosine(&p, &r)
    );
}

#[test]
fn projected_words_are_blends_of_the_basis() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(&dir, &abc_corpus(), "b 4 0 -2 1\nzebra 1 1 1 1\n");
    let output = config.output_file.clone().unwrap();
    run(config).unwrap();

    let lines = output_lines(&output);
    let b_line = lines[1..5].iter().find(|line| line[0] == "b").unwrap();
    let b = row(&b_line[1..]);
    let basis: Vec<Vec<real>> = lines[5..9].iter().map(|line| row(line)).collect();

    let weights: [real; 4] = [4.0 / 20.0, 0.0, -2.0 / 20.0, 1.0 / 20.0];
    let mut expected = vec![0.0 as real; 10];
    for (w, basis_row) in weights.iter().zip(&basis) {
        for c in 0..10 {
            expected[c] += w * basis_row[c];
        }
    }
    for c in 0..10 {
        assert!((b[c] - expected[c]).abs() < 1e-6, "{b:?} vs {expected:?}");
    }
}

#[test]
fn missing_projection_source_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig {
        projection: None,
        ..small_config(&dir, &abc_corpus(), "")
    };
    let err = run(config).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NoProjectionSource)
    ));
}

#[test]
fn duplicate_projection_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(&dir, &abc_corpus(), "c 1 0 0 0\na 0 0 0 1\nc 0 1 0 0\n");
    let err = run(config).unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::DuplicateProjection { word }) => assert_eq!(word, "c"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn training_resumes_from_its_own_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig {
        alpha: Some(0.01),
        ..small_config(&dir, &abc_corpus(), "a 1 2 3 4\n")
    };
    let first_output = config.output_file.clone().unwrap();
    run(config.clone()).unwrap();

    let resumed = TrainConfig {
        alpha: None,
        iter: 1,
        checkpoint: Some(first_output.clone()),
        output_file: Some(dir.path().join("resumed.txt")),
        ..config
    };
    let mut trainer = Trainer::new(resumed).unwrap();
    let trained = trainer.train().unwrap();
    assert_eq!(trained.alpha, 0.01);
    trainer.save(&trained).unwrap();

    let lines = output_lines(&dir.path().join("resumed.txt"));
    assert_eq!(lines[0], ["4", "10", "0.01"]);
}

#[test]
fn checkpoint_of_another_shape_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(&dir, &abc_corpus(), "");
    let checkpoint = write(dir.path(), "narrow.txt", "4 3 0.025\n");
    let config = TrainConfig {
        checkpoint: Some(checkpoint),
        ..config
    };
    let err = run(config).unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::CheckpointMismatch { field, found, .. }) => {
            assert_eq!(*field, "dim");
            assert_eq!(found, "3");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn without_output_only_the_vocabulary_is_processed() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_file = dir.path().join("vocab.txt");
    let config = TrainConfig {
        output_file: None,
        save_vocab_file: Some(vocab_file.clone()),
        ..small_config(&dir, &abc_corpus(), "")
    };
    run(config).unwrap();

    let saved = fs::read_to_string(&vocab_file).unwrap();
    let lines: Vec<&str> = saved.lines().collect();
    assert_eq!(lines, ["</s> 2000", "a 3000", "b 2000", "c 1000"]);
    assert!(!dir.path().join("vectors.txt").exists());

    let reread = TrainConfig {
        output_file: None,
        read_vocab_file: Some(vocab_file),
        ..small_config(&dir, &abc_corpus(), "")
    };
    let trainer = Trainer::new(reread).unwrap();
    assert_eq!(trainer.vocab().train_words(), 8000);
}

#[test]
fn several_threads_share_the_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig {
        threads: 3,
        ..small_config(&dir, &abc_corpus(), "a 1 0 0 0\n")
    };
    let output = config.output_file.clone().unwrap();
    run(config).unwrap();
    let lines = output_lines(&output);
    assert_eq!(lines.len(), 10);
}

#[test]
fn hierarchical_softmax_and_early_stop() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainConfig {
        hs: true,
        negative: 0,
        early_stop: Some(10.0),
        ..small_config(&dir, &abc_corpus(), "")
    };
    let output = config.output_file.clone().unwrap();
    run(config).unwrap();
    assert_eq!(output_lines(&output).len(), 10);
}

#[test]
fn binary_projections_with_snapshot_and_bincode_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut semantic = b"c ".to_vec();
    for v in [0.5f32, -1.0, 2.0, 8.0] {
        semantic.extend_from_slice(&v.to_le_bytes());
    }
    semantic.push(b'\n');
    let semantic = write(dir.path(), "semantic.bin", semantic);
    let snapshot = dir.path().join("snapshot.bin");
    let model_file = dir.path().join("model.bin");

    let config = TrainConfig {
        projection: Some(ProjectionSource::Binary(semantic.clone())),
        projection_snapshot: Some(snapshot.clone()),
        output_file: Some(model_file.clone()),
        output_format: OutputFormat::Bincode,
        ..small_config(&dir, &abc_corpus(), "")
    };
    run(config).unwrap();

    assert_eq!(fs::read(&snapshot).unwrap(), fs::read(&semantic).unwrap());
    let model = Model::load(&model_file).unwrap();
    assert_eq!(model.dim, 10);
    assert_eq!(model.basis_count, 4);
    assert_eq!(model.vocab.len(), 4);
    assert_eq!(model.output.len(), 40);
    let c = model.vocab.iter().position(|vw| vw.word == b"c").unwrap();
    let mut expected = vec![0.0 as real; 10];
    for (p, w) in [0.5f32, -1.0, 2.0, 8.0].iter().enumerate() {
        for d in 0..10 {
            expected[d] += w / 20.0 * model.semantic[p * 10 + d];
        }
    }
    assert_eq!(model.embedding(c), &expected[..]);
}
