//! The saneitize loop walking a whole wiki, loop after loop.

use sanity_jobs::{JobOutcome, WorkOutcome, WorkerReport, loop_status, push_jobs};
use sanity_tests::{Pipeline, it_profile};
use sanity_types::queues;

fn small_chunks() -> Pipeline {
    let mut profile = it_profile();
    profile.jobs_chunk_size = Some(25);
    profile.max_checker_jobs = Some(3);
    let p = Pipeline::with_profile(&["eqiad", "codfw"], profile);
    p.add_pages(1..=100);
    p
}

fn checked_ranges(reports: &[WorkerReport]) -> usize {
    reports
        .iter()
        .filter(|r| {
            matches!(
                r.outcome,
                WorkOutcome::Completed(JobOutcome::Checker(_))
            )
        })
        .count()
}

#[tokio::test]
async fn test_loop_covers_every_page() {
    let p = small_chunks();
    let ctx = p.worker().context();

    let first = push_jobs(ctx, "full", None, 600).await.unwrap();
    assert_eq!(first.jobs.len(), 3);
    assert_eq!(first.state.id_offset, 76);
    let reports = p.settle().await;
    assert_eq!(checked_ranges(&reports), 3);
    assert_eq!(p.divergent_pages(1..=100), (76..=100).collect::<Vec<_>>());

    // Finishes the first loop and wraps straight into the second one.
    let second = push_jobs(ctx, "full", None, 600).await.unwrap();
    assert_eq!(second.jobs.len(), 3);
    assert_eq!(second.state.loop_id, 1);
    assert_eq!(second.state.id_offset, 51);
    p.settle().await;
    p.assert_converged(1..=100);

    // A converged wiki only runs the checkers.
    push_jobs(ctx, "full", None, 600).await.unwrap();
    let reports = p.settle().await;
    assert_eq!(checked_ranges(&reports), 3);
    assert_eq!(reports.len(), 3);
    assert_eq!(p.queue.len(queues::LINKS_UPDATE).unwrap(), 0);
}

#[tokio::test]
async fn test_loop_respects_checker_backlog() {
    let p = small_chunks();
    let ctx = p.worker().context();

    push_jobs(ctx, "full", None, 600).await.unwrap();
    assert!(push_jobs(ctx, "full", None, 600).await.is_err());
    assert_eq!(p.queue.len(queues::CHECKER).unwrap(), 3);

    let status = loop_status(ctx, "full").await.unwrap();
    assert_eq!(status.state.jobs_sent, 3);
    assert_eq!(status.ids_todo, 24);
}

#[tokio::test]
async fn test_cluster_scoped_loop_only_repairs_that_cluster() {
    let p = small_chunks();
    let ctx = p.worker().context();

    push_jobs(ctx, "eqiad-only", Some("eqiad"), 600)
        .await
        .unwrap();
    p.settle().await;
    push_jobs(ctx, "eqiad-only", Some("eqiad"), 600)
        .await
        .unwrap();
    p.settle().await;

    assert_eq!(p.index("eqiad").len(), 100);
    assert!(p.index("codfw").is_empty());
}
