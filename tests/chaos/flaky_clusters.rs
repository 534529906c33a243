//! Repair against clusters that drop reads, reject writes and freeze at
//! random. Repeated check rounds must still converge.

use std::sync::Arc;

use sanity_store::FlakyIndex;
use sanity_tests::{Pipeline, it_profile};

const PAGES: u64 = 200;
const MAX_PASSES: usize = 10;

fn flaky_pipeline(seed: u64) -> Pipeline {
    let p = Pipeline::build(&["eqiad", "codfw"], it_profile(), |name, inner| {
        let salt = if name == "eqiad" { 1 } else { 2 };
        Arc::new(
            FlakyIndex::new(inner)
                .read_failure_rate(0.2)
                .write_failure_rate(0.3)
                .frozen_rate(0.1)
                .seed(seed * 10 + salt),
        )
    });
    p.add_pages(1..=PAGES);
    // A quarter of the wiki is indexed but stale.
    for id in (1..=PAGES).step_by(4) {
        let mut doc = p.expected_document(&p.pages.page(id).unwrap());
        doc.version = Some(1);
        for index in p.indices.values() {
            index.put(doc.clone());
        }
    }
    p
}

async fn converge(p: &Pipeline) -> usize {
    for pass in 1..=MAX_PASSES {
        p.check(1, PAGES).await;
        p.settle().await;
        if p.divergent_pages(1..=PAGES).is_empty() {
            return pass;
        }
    }
    panic!(
        "still divergent after {MAX_PASSES} passes: {:?}",
        p.divergent_pages(1..=PAGES)
    );
}

#[tokio::test]
async fn test_flaky_clusters_converge() {
    for seed in [1, 7, 42] {
        let p = flaky_pipeline(seed);
        let passes = converge(&p).await;
        assert!(passes <= MAX_PASSES);
        p.assert_converged(1..=PAGES);
        assert_eq!(p.backlog(), 0);
    }
}

#[tokio::test]
async fn test_converged_wiki_stays_quiet() {
    let p = flaky_pipeline(3);
    converge(&p).await;
    let writes_before = p.index("eqiad").applied_writes().len();

    // Read failures may requeue a checker, but nothing is left to fix.
    p.check(1, PAGES).await;
    p.settle().await;

    assert_eq!(p.index("eqiad").applied_writes().len(), writes_before);
    p.assert_converged(1..=PAGES);
}
