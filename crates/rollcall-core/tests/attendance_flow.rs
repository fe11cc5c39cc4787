use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollcall_core::extractor::from_fn;
use rollcall_core::{
    enroll, AttendanceSession, CachedStore, CaptureOutcome, Embedding, EmbeddingStore, ExtractError,
    FileStore, MemoryStore, SqliteStore, StudentId,
};
use std::sync::Arc;

const DIM: usize = 128;
const THRESHOLD: f32 = 0.6;

fn random_unit(rng: &mut StdRng) -> Vec<f32> {
    let v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    Embedding::new(v).normalized().unwrap().values
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Two faces 120 degrees apart on the unit sphere.
fn two_faces(rng: &mut StdRng) -> (Vec<f32>, Vec<f32>) {
    let e1 = random_unit(rng);
    let raw = random_unit(rng);
    let along = dot(&raw, &e1);
    let ortho: Vec<f32> = raw.iter().zip(&e1).map(|(r, e)| r - along * e).collect();
    let u = Embedding::new(ortho).normalized().unwrap().values;
    let e2: Vec<f32> = e1
        .iter()
        .zip(&u)
        .map(|(a, b)| -0.5 * a + 0.75f32.sqrt() * b)
        .collect();
    (e1, e2)
}

/// Raw vectors stand in for images; an empty vector has no face.
fn vector_extractor() -> impl rollcall_core::FaceExtractor<Vec<f32>> {
    from_fn(|image: &Vec<f32>| {
        if image.is_empty() {
            Err(ExtractError::NoFaceDetected)
        } else {
            Ok(Embedding::new(image.clone()))
        }
    })
}

fn run_scenario(store: &dyn EmbeddingStore) {
    let mut rng = StdRng::seed_from_u64(7);
    let (e1, e2) = two_faces(&mut rng);
    let mut extractor = vector_extractor();

    enroll(store, &"S1".into(), [&e1], &mut extractor).unwrap();
    enroll(store, &"S2".into(), [&e2], &mut extractor).unwrap();

    let noisy: Vec<f32> = e1.iter().map(|v| v + rng.gen_range(-0.03f32..0.03)).collect();
    let midpoint: Vec<f32> = e1.iter().zip(&e2).map(|(a, b)| (a + b) / 2.0).collect();

    let mut session = AttendanceSession::open();
    assert_eq!(
        session.capture(&noisy, &mut extractor, store, THRESHOLD).unwrap(),
        CaptureOutcome::Marked(StudentId::from("S1"))
    );
    assert_eq!(
        session.capture(&midpoint, &mut extractor, store, THRESHOLD).unwrap(),
        CaptureOutcome::Unrecognized
    );
    assert_eq!(
        session.capture(&e1, &mut extractor, store, THRESHOLD).unwrap(),
        CaptureOutcome::AlreadyMarked(StudentId::from("S1"))
    );

    let report = session.close().unwrap();
    let roster: Vec<StudentId> = store.all().unwrap().ids().cloned().collect();
    let tally = report.tally(&roster);
    assert_eq!(tally.present, vec![StudentId::from("S1")]);
    assert_eq!(tally.absent, vec![StudentId::from("S2")]);
}

#[test]
fn test_scenario_memory_store() {
    run_scenario(&MemoryStore::new());
}

#[test]
fn test_scenario_cached_sqlite_store() {
    run_scenario(&CachedStore::new(SqliteStore::open_in_memory().unwrap()));
}

#[test]
fn test_scenario_file_store() {
    let dir = std::env::temp_dir().join(format!("rollcall-flow-{}", uuid::Uuid::new_v4()));
    run_scenario(&FileStore::open(&dir).unwrap());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_enrollment_partial_and_total_failure() {
    let store = MemoryStore::new();
    let mut rng = StdRng::seed_from_u64(11);
    let a = random_unit(&mut rng);
    let b: Vec<f32> = a.iter().map(|v| v + rng.gen_range(-0.01f32..0.01)).collect();
    let mut extractor = vector_extractor();

    let images = vec![a.clone(), Vec::new(), b];
    let enrolled = enroll(&store, &"S1".into(), &images, &mut extractor).unwrap();
    assert_eq!(enrolled.used, 2);
    assert_eq!(enrolled.skipped.len(), 1);

    let before = store.get(&"S1".into()).unwrap();
    let blanks: Vec<Vec<f32>> = vec![Vec::new(), Vec::new(), Vec::new()];
    assert!(enroll(&store, &"S1".into(), &blanks, &mut extractor).is_err());
    assert_eq!(store.get(&"S1".into()).unwrap(), before);
}

/// Writers alternate between two constant vectors; readers must never see a mix.
fn hammer(store: Arc<dyn EmbeddingStore>) {
    let ones = Embedding::new(vec![1.0; DIM]);
    let twos = Embedding::new(vec![2.0; DIM]);
    store.put(&"X".into(), &ones).unwrap();

    std::thread::scope(|scope| {
        for writer in 0..2 {
            let store = Arc::clone(&store);
            let (ones, twos) = (ones.clone(), twos.clone());
            scope.spawn(move || {
                for i in 0..50 {
                    let e = if (i + writer) % 2 == 0 { &ones } else { &twos };
                    store.put(&"X".into(), e).unwrap();
                    store.put(&StudentId::new(format!("W{writer}-{i}")), e).unwrap();
                }
            });
        }
        for _ in 0..2 {
            let store = Arc::clone(&store);
            let (ones, twos) = (ones.clone(), twos.clone());
            scope.spawn(move || {
                for _ in 0..50 {
                    let snapshot = store.all().unwrap();
                    for (_, e) in &snapshot {
                        assert_eq!(e.dim(), DIM);
                        assert!(e.values.iter().all(|&v| v == e.values[0]));
                    }
                    let x = store.get(&"X".into()).unwrap();
                    assert!(x == ones || x == twos);
                }
            });
        }
    });

    assert_eq!(store.len().unwrap(), 1 + 2 * 50);
}

#[test]
fn test_concurrent_access_memory_store() {
    hammer(Arc::new(MemoryStore::new()));
}

#[test]
fn test_concurrent_access_cached_file_store() {
    let dir = std::env::temp_dir().join(format!("rollcall-hammer-{}", uuid::Uuid::new_v4()));
    hammer(Arc::new(CachedStore::new(FileStore::open(&dir).unwrap())));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_concurrent_enroll_same_student_is_last_writer_wins() {
    let store: Arc<dyn EmbeddingStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let left = vec![1.0f32, 0.0, 0.0];
    let right = vec![0.0f32, 1.0, 0.0];

    std::thread::scope(|scope| {
        for face in [&left, &right] {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                let mut extractor = vector_extractor();
                enroll(store.as_ref(), &"S".into(), [face], &mut extractor).unwrap();
            });
        }
    });

    let stored = store.get(&"S".into()).unwrap();
    assert!(stored.values == left || stored.values == right);
}
