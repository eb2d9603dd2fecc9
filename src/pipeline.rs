//! The ingestion pipeline's trigger graph.
//!
//! Each stage lists the tasks it is allowed to enqueue while it runs.
//! [`crate::WorkerContext::add_job`] refuses anything else, so a chain that is
//! not written down here cannot happen.

/// A task and the successors it may enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub task: &'static str,
    pub successors: &'static [&'static str],
}

pub const PIPELINE: &[Stage] = &[
    Stage {
        task: "scrape-channel",
        successors: &["consume"],
    },
    Stage {
        task: "consume",
        successors: &["process-details", "process-tags"],
    },
    Stage {
        task: "consume-artist",
        successors: &["process-details"],
    },
    Stage {
        task: "process-details",
        successors: &["process-cover", "process-tags", "attribute-url"],
    },
    Stage {
        task: "process-cover",
        successors: &[],
    },
    Stage {
        task: "process-tags",
        successors: &[],
    },
    Stage {
        task: "check-url",
        successors: &["check-url"],
    },
    Stage {
        task: "attribute-url",
        successors: &[],
    },
    Stage {
        task: "restore-from-csv",
        successors: &["add-new-album-details"],
    },
    Stage {
        task: "add-new-album-details",
        successors: &["process-cover", "process-tags", "check-url"],
    },
    Stage {
        task: "delete",
        successors: &[],
    },
    Stage {
        task: "clear-cache",
        successors: &[],
    },
    Stage {
        task: "add-user",
        successors: &["consume", "add-user"],
    },
    Stage {
        task: "remove-user",
        successors: &[],
    },
    Stage {
        task: "process-all-details",
        successors: &["process-details"],
    },
    Stage {
        task: "process-all-covers",
        successors: &["process-cover"],
    },
    Stage {
        task: "process-all-tags",
        successors: &["process-tags"],
    },
    Stage {
        task: "check-all-urls",
        successors: &["check-url"],
    },
    Stage {
        task: "attribute-all-urls",
        successors: &["attribute-url"],
    },
    Stage {
        task: "album-of-the-day",
        successors: &[],
    },
];

pub fn stage(task: &str) -> Option<&'static Stage> {
    PIPELINE.iter().find(|stage| stage.task == task)
}

/// Whether a running `from` task may enqueue `to`.
pub fn is_declared_edge(from: &str, to: &str) -> bool {
    stage(from).is_some_and(|stage| stage.successors.contains(&to))
}
