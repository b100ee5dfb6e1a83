use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use shipment_import::pipeline::engine::{run_chunked, ChunkOptions, EngineRun, ValidationOutcome};

fn all_valid(chunk: &[u32], offset: usize) -> Vec<ValidationOutcome<u32>> {
    chunk
        .iter()
        .enumerate()
        .map(|(i, v)| ValidationOutcome::pass(offset + i, *v))
        .collect()
}

#[tokio::test]
async fn test_visits_ceil_n_over_c_chunks() {
    for (n, c) in [(0usize, 3usize), (1, 1), (7, 3), (9, 3), (250, 100), (1000, 333), (5, 50)] {
        let items: Vec<u32> = (0..n as u32).collect();
        let mut calls = 0;

        let run = run_chunked(
            &items,
            &ChunkOptions::new(c),
            None,
            |chunk, offset| {
                calls += 1;
                let outcomes = all_valid(chunk, offset);
                async move { Ok::<_, String>(outcomes) }
            },
            |_| {},
        )
        .await
        .unwrap();

        let EngineRun::Completed(report) = run else {
            panic!("run should complete for n={n} c={c}");
        };
        assert_eq!(calls, n.div_ceil(c), "n={n} c={c}");
        assert_eq!(report.chunks.len(), n.div_ceil(c));
        assert_eq!(report.chunks.iter().map(|ch| ch.processed).sum::<usize>(), n);
        assert_eq!(report.total_processed, n);
        assert_eq!(report.total_valid, n);
    }
}

#[tokio::test]
async fn test_cancel_before_chunk_k_stops_short() {
    let items: Vec<u32> = (0..100).collect();
    let token = CancellationToken::new();
    let mut progress_events = 0;

    let run = run_chunked(
        &items,
        &ChunkOptions::new(10),
        Some(&token),
        |chunk, offset| {
            // Cancel while the fourth chunk is being validated
            if offset == 30 {
                token.cancel();
            }
            let outcomes = all_valid(chunk, offset);
            async move { Ok::<_, String>(outcomes) }
        },
        |_| progress_events += 1,
    )
    .await
    .unwrap();

    match run {
        EngineRun::Cancelled { processed } => {
            assert_eq!(processed, 30);
            assert!(processed < items.len());
        }
        EngineRun::Completed(_) => panic!("run should be cancelled"),
    }
    assert_eq!(progress_events, 3);
}

#[tokio::test]
async fn test_delay_applies_between_chunks_without_outcomes() {
    let items: Vec<u32> = (0..4).collect();
    let started = Instant::now();

    let run = run_chunked(
        &items,
        &ChunkOptions::new(1).with_delay(Duration::from_millis(25)),
        None,
        |_, _| async { Ok::<Vec<ValidationOutcome<u32>>, String>(Vec::new()) },
        |_| {},
    )
    .await
    .unwrap();

    assert!(!run.is_cancelled());
    // Three gaps between four chunks
    assert!(started.elapsed() >= Duration::from_millis(75));
}

#[tokio::test]
async fn test_cancel_during_delay_returns_promptly() {
    let items: Vec<u32> = (0..3).collect();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let run = run_chunked(
        &items,
        &ChunkOptions::new(1).with_delay(Duration::from_secs(5)),
        Some(&token),
        |chunk, offset| {
            let outcomes = all_valid(chunk, offset);
            async move { Ok::<_, String>(outcomes) }
        },
        |_| {},
    )
    .await
    .unwrap();

    assert!(matches!(run, EngineRun::Cancelled { processed: 1 }));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_chunk_error_aborts_whole_run() {
    let items: Vec<u32> = (0..30).collect();
    let result = run_chunked(
        &items,
        &ChunkOptions::new(10),
        None,
        |chunk, offset| {
            let outcomes = all_valid(chunk, offset);
            async move {
                if offset == 10 {
                    Err("lookup backend down".to_string())
                } else {
                    Ok(outcomes)
                }
            }
        },
        |_| {},
    )
    .await;

    assert_eq!(result.unwrap_err(), "lookup backend down");
}
