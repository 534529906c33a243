//! End-to-end repair: check a range, run every corrective and write job,
//! and verify the indices match the page store afterwards.

use sanity_jobs::{CheckerState, WorkOutcome};
use sanity_tests::Pipeline;
use sanity_types::{IndexDocument, PageRecord};

/// 40 pages covering every kind of divergence across two clusters.
fn diverged_pipeline() -> Pipeline {
    let p = Pipeline::new(&["eqiad", "codfw"]);
    p.add_pages(1..=40);

    // 1–10: sane everywhere.
    for id in 1..=10 {
        p.index_correctly(&p.pages.page(id).unwrap());
    }
    // 11–15: missing from eqiad only.
    for id in 11..=15 {
        let doc = p.expected_document(&p.pages.page(id).unwrap());
        p.index("codfw").put(doc);
    }
    // 16–18: stale everywhere.
    for id in 16..=18 {
        let mut doc = p.expected_document(&p.pages.page(id).unwrap());
        doc.version = Some(id * 10 - 1);
        for index in p.indices.values() {
            index.put(doc.clone());
        }
    }
    // 19: became a redirect but is still indexed.
    let page19 = p.pages.page(19).unwrap();
    p.index_correctly(&page19);
    p.pages.insert(PageRecord {
        is_redirect: true,
        ..page19
    });
    // 20: deleted but still indexed.
    p.index_correctly(&p.pages.page(20).unwrap());
    p.pages.delete(20);
    // 21: indexed in the general index instead of content.
    let doc = p.expected_document(&p.pages.page(21).unwrap());
    for index in p.indices.values() {
        index.put(IndexDocument {
            index: "wiki_general_1".to_string(),
            ..doc.clone()
        });
    }
    // 22: a redirect that is correctly absent.
    p.pages.insert(PageRecord {
        is_redirect: true,
        ..p.pages.page(22).unwrap()
    });
    // 23–40: never indexed.
    p
}

#[tokio::test]
async fn test_check_then_settle_converges() {
    let p = diverged_pipeline();
    assert_eq!(
        p.divergent_pages(1..=40),
        [11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21]
            .into_iter()
            .chain(23..=40)
            .collect::<Vec<_>>()
    );

    let report = p.check(1, 40).await;
    assert_eq!(report.state, CheckerState::Done);
    assert_eq!(report.checked, 40);
    assert!(report.fixed > 0);

    let reports = p.settle().await;
    assert!(
        reports
            .iter()
            .all(|r| matches!(r.outcome, WorkOutcome::Completed(_))),
        "{reports:?}"
    );
    p.assert_converged(1..=40);
}

#[tokio::test]
async fn test_second_pass_finds_nothing() {
    let p = diverged_pipeline();
    p.check(1, 40).await;
    p.settle().await;

    let again = p.check(1, 40).await;
    assert_eq!(again.state, CheckerState::Done);
    assert_eq!(again.fixed, 0);
    assert_eq!(p.backlog(), 0);
    p.assert_converged(1..=40);
}

#[tokio::test]
async fn test_unreachable_cluster_is_caught_up_later() {
    let p = diverged_pipeline();
    p.index("codfw").set_fail_reads(true);

    let report = p.check(1, 40).await;
    assert_eq!(report.state, CheckerState::Requeued);
    assert_eq!(report.dropped, vec!["codfw"]);
    assert_eq!(report.requeued.len(), 1);
    assert_eq!(report.requeued[0].cluster.as_deref(), Some("codfw"));

    // Only eqiad has been repaired so far.
    p.worker()
        .drain(&sanity_tests::ALL_QUEUES)
        .await
        .unwrap();
    for id in 1..=40 {
        let expected: Vec<_> = p.expected_for(id).into_iter().collect();
        assert_eq!(p.copies(id)["eqiad"], expected, "page {id} on eqiad");
    }
    assert!(!p.divergent_pages(11..=40).is_empty());

    p.index("codfw").set_fail_reads(false);
    p.settle().await;
    p.assert_converged(1..=40);
}

#[tokio::test]
async fn test_frozen_cluster_catches_up_after_thaw() {
    let p = diverged_pipeline();
    p.index("codfw").freeze();

    p.check(1, 40).await;
    for _ in 0..3 {
        p.worker()
            .drain(&sanity_tests::ALL_QUEUES)
            .await
            .unwrap();
        p.clock.advance(2048);
    }
    // Writes to codfw are parked in the queue, eqiad is done.
    assert!(p.backlog() > 0);
    assert!(p.index("codfw").applied_writes().is_empty());
    assert!(!p.index("eqiad").applied_writes().is_empty());

    p.index("codfw").thaw();
    p.settle().await;
    p.assert_converged(1..=40);
}
