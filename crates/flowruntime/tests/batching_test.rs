use flowcore::NodeError;
use flowruntime::{
    batch_by_size, batch_with_timeout, chunk_stream, process_batches_parallel,
    process_batches_sequential,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_batches_respect_the_limit() {
    let items: Vec<u32> = (0..40).collect();
    let batches = batch_by_size(&items, 5);
    assert_eq!(batches.len(), 8);

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let (a, p, t) = (active.clone(), peak.clone(), total.clone());

    process_batches_parallel(batches, 3, move |batch: Vec<u32>| {
        let (active, peak, total) = (a.clone(), p.clone(), t.clone());
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            total.fetch_add(batch.len(), Ordering::SeqCst);
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .await
    .unwrap();

    assert_eq!(total.load(Ordering::SeqCst), 40);
    assert!(peak.load(Ordering::SeqCst) <= 3, "peak was {}", peak.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_batches_report_the_first_failure() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let batches = vec![vec![1u32], vec![2], vec![3], vec![4]];

    let err = process_batches_parallel(batches, usize::MAX, move |batch: Vec<u32>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            // the later failure finishes first
            let delay = if batch[0] == 2 { 40 } else { 0 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if matches!(batch[0], 2 | 4) {
                return Err(NodeError::ExecutionFailed(format!("batch {}", batch[0])));
            }
            Ok(())
        }
    })
    .await
    .unwrap_err();

    assert_eq!(err, NodeError::ExecutionFailed("batch 2".to_string()));
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_sequential_batches_stop_at_the_first_failure() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let batches = vec![vec!["a"], vec!["b"], vec!["c"]];

    let err = process_batches_sequential(batches, |batch: Vec<&str>| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().push(batch[0]);
            if batch[0] == "b" {
                return Err(NodeError::ExecutionFailed("b".to_string()));
            }
            Ok(())
        }
    })
    .await
    .unwrap_err();

    assert!(matches!(err, NodeError::ExecutionFailed(_)));
    assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_batch_timeout() {
    let slow = batch_with_timeout(vec![1, 2], Duration::from_millis(30), |_| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    })
    .await;
    assert_eq!(slow, Err(NodeError::Timeout { millis: 30 }));

    let fast = batch_with_timeout(vec![1, 2], Duration::from_secs(1), |batch| async move {
        assert_eq!(batch.len(), 2);
        Ok(())
    })
    .await;
    assert_eq!(fast, Ok(()));
}

#[tokio::test]
async fn test_chunk_stream_matches_batch_by_size() {
    let items: Vec<u32> = (0..11).collect();
    let streamed: Vec<Vec<u32>> = chunk_stream(items.clone(), 4).collect().await;
    assert_eq!(streamed, batch_by_size(&items, 4));

    let whole: Vec<Vec<u32>> = chunk_stream(items.clone(), 0).collect().await;
    assert_eq!(whole, vec![items]);
}
