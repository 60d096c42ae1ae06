//! Cluster naming for test runs.

use uuid::Uuid;

/// Environment variable carrying the CI build identifier
pub const BUILD_ID_ENV: &str = "BUILD_ID";

const RANDOM_SUFFIX_LEN: usize = 10;

/// `k1-<BUILD_ID>`, or `k1-<10 random chars>` outside CI.
pub fn cluster_name() -> String {
    cluster_name_from(std::env::var(BUILD_ID_ENV).ok().as_deref())
}

pub fn cluster_name_from(build_id: Option<&str>) -> String {
    match build_id {
        Some(id) => format!("k1-{}", id),
        None => {
            let suffix: String = Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(RANDOM_SUFFIX_LEN)
                .collect();
            format!("k1-{}", suffix)
        }
    }
}
