//! Tests for the sanity-cluster crate.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use sanity_store::MemoryIndex;
    use sanity_types::IndexConfig;

    use crate::{
        BackoffConfig, ClusterAssignment, ClusterConfig, ClusterError, ExternalIndex, JobDelay,
        SelectionOptions, backoff_delay, backoff_delay_with,
    };

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn cluster(name: &str, writable: bool, private: bool) -> ClusterConfig {
        ClusterConfig {
            name: name.to_string(),
            writable,
            private,
        }
    }

    /// eqiad (writable, private), codfw (writable), cloud (read-only).
    fn assignment() -> ClusterAssignment {
        let assignment = ClusterAssignment::new(Duration::from_secs(30));
        for config in [
            cluster("eqiad", true, true),
            cluster("codfw", true, false),
            cluster("cloud", false, false),
        ] {
            let client = Arc::new(MemoryIndex::new(IndexConfig::default()));
            assignment.add_cluster(config, client);
        }
        assignment
    }

    fn names<V>(map: &std::collections::BTreeMap<String, V>) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    // -----------------------------------------------------------------------
    // decide_clusters
    // -----------------------------------------------------------------------

    #[test]
    fn test_none_targets_all_writable() {
        let assignment = assignment();
        let resolved = assignment
            .decide_clusters(None, &SelectionOptions::default())
            .unwrap();
        assert_eq!(names(&resolved), vec!["codfw", "eqiad"]);
        assert!(
            resolved
                .values()
                .all(|c| c.write_timeout == Duration::from_secs(30))
        );
    }

    #[test]
    fn test_named_writable_cluster() {
        let assignment = assignment();
        let resolved = assignment
            .decide_clusters(Some("codfw"), &SelectionOptions::default())
            .unwrap();
        assert_eq!(names(&resolved), vec!["codfw"]);
    }

    #[test]
    fn test_named_read_only_cluster_is_an_error() {
        let assignment = assignment();
        let err = assignment
            .decide_clusters(Some("cloud"), &SelectionOptions::default())
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotWritable(name) if name == "cloud"));
    }

    #[test]
    fn test_unknown_cluster_is_an_error() {
        let assignment = assignment();
        assert!(matches!(
            assignment.decide_clusters(Some("ulsfo"), &SelectionOptions::default()),
            Err(ClusterError::NotWritable(_))
        ));
    }

    #[test]
    fn test_private_only() {
        let assignment = assignment();
        let options = SelectionOptions {
            private_only: true,
            external_index: None,
        };
        let resolved = assignment.decide_clusters(None, &options).unwrap();
        assert_eq!(names(&resolved), vec!["eqiad"]);
    }

    #[test]
    fn test_external_index_blacklist_and_replica_group() {
        let assignment = assignment();
        let options = SelectionOptions {
            private_only: false,
            external_index: Some(ExternalIndex {
                name: "commonswiki_file".to_string(),
                cluster_blacklist: BTreeSet::from(["codfw".to_string()]),
                replica_group: Some("psi".to_string()),
            }),
        };
        let resolved = assignment.decide_clusters(None, &options).unwrap();
        assert_eq!(names(&resolved), vec!["eqiad"]);
        assert_eq!(resolved["eqiad"].replica_group.as_deref(), Some("psi"));

        // The override applies to that call only.
        let plain = assignment
            .decide_clusters(None, &SelectionOptions::default())
            .unwrap();
        assert!(plain.values().all(|c| c.replica_group.is_none()));
    }

    #[test]
    fn test_live_config_changes_apply() {
        let assignment = assignment();
        assert!(assignment.set_writable("codfw", false));
        assert!(!assignment.set_writable("nowhere", true));
        assert_eq!(
            assignment.writable_clusters(),
            BTreeSet::from(["eqiad".to_string()])
        );
        assert!(
            assignment
                .decide_clusters(Some("codfw"), &SelectionOptions::default())
                .is_err()
        );

        assignment.remove_cluster("eqiad");
        let resolved = assignment
            .decide_clusters(None, &SelectionOptions::default())
            .unwrap();
        assert!(resolved.is_empty());
    }

    // -----------------------------------------------------------------------
    // Backoff
    // -----------------------------------------------------------------------

    #[test]
    fn test_backoff_first_retry_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let delay = backoff_delay_with(&mut rng, 0, 6);
            assert_eq!(delay, 64);
            let delay = backoff_delay_with(&mut rng, 1, 6);
            assert!(delay == 64 || delay == 128, "unexpected delay {delay}");
        }
    }

    #[test]
    fn test_backoff_later_retries_skip_minimum() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut seen = BTreeSet::new();
        for _ in 0..500 {
            seen.insert(backoff_delay_with(&mut rng, 3, 6));
        }
        assert_eq!(seen, BTreeSet::from([128, 256, 512]));
    }

    #[test]
    fn test_backoff_window_is_capped() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            let delay = backoff_delay_with(&mut rng, 50, 6);
            assert!((128..=1024).contains(&delay), "unexpected delay {delay}");
        }
        assert!(backoff_delay(9, 6) <= 1024);
    }

    #[test]
    fn test_backoff_config_overrides() {
        let mut config = BackoffConfig::default();
        config.exponents.insert("elastica_write".to_string(), 2);
        assert_eq!(config.exponent_for("elastica_write"), 2);
        assert_eq!(config.exponent_for("checker_job"), 6);
        assert_eq!(config.delay("elastica_write", 0), 4);
    }

    #[test]
    fn test_job_delay() {
        assert_eq!(JobDelay::after(1_000, 64).release_at, 1_064);
        assert_eq!(JobDelay::after(u64::MAX, 64).release_at, u64::MAX);
    }
}
