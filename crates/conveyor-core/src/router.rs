//! Queue router: static task-name -> queue mapping with a default fallback.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named logical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub description: String,
}

/// Static route table, read-only after warm-up. Pure function of
/// configuration: no locking, no side effects.
pub struct QueueRouter {
    queues: Vec<QueueInfo>,
    routes: BTreeMap<String, String>,
    default_queue: String,
}

impl QueueRouter {
    pub fn new(default_queue: impl Into<String>) -> Self {
        let default_queue = default_queue.into();
        let mut router = Self {
            queues: Vec::new(),
            routes: BTreeMap::new(),
            default_queue: default_queue.clone(),
        };
        router.declare_queue(default_queue, "Fallback queue for unrouted tasks");
        router
    }

    /// Declare a queue. Re-declaring an existing name updates its description.
    pub fn declare_queue(&mut self, name: impl Into<String>, description: impl Into<String>) {
        let name = name.into();
        let description = description.into();
        match self.queues.iter_mut().find(|q| q.name == name) {
            Some(existing) => existing.description = description,
            None => self.queues.push(QueueInfo { name, description }),
        }
    }

    /// Route `task_name` to `queue`. The queue is declared implicitly if it
    /// was not declared up front.
    pub fn add_route(&mut self, task_name: impl Into<String>, queue: impl Into<String>) {
        let queue = queue.into();
        if !self.queues.iter().any(|q| q.name == queue) {
            self.declare_queue(queue.clone(), "");
        }
        self.routes.insert(task_name.into(), queue);
    }

    /// Destination queue for a task name; unrouted names fall back to the
    /// default queue.
    pub fn route_for(&self, task_name: &str) -> &str {
        self.routes
            .get(task_name)
            .map(String::as_str)
            .unwrap_or(&self.default_queue)
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// All declared queues, in declaration order.
    pub fn list_queues(&self) -> &[QueueInfo] {
        &self.queues
    }

    /// The full route table, for introspection callers.
    pub fn list_routes(&self) -> &BTreeMap<String, String> {
        &self.routes
    }

    /// Names of all declared queues (what a worker pool typically subscribes
    /// to in a single-process deployment).
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn demo_router() -> QueueRouter {
        let mut router = QueueRouter::new("default");
        router.declare_queue("calculations", "Arithmetic demo tasks");
        router.declare_queue("documents", "PDF loading and chunking");
        router.add_route("tasks.add_numbers", "calculations");
        router.add_route("tasks.divide_numbers", "calculations");
        router.add_route("tasks.load_pdf", "documents");
        router
    }

    #[rstest]
    #[case("tasks.add_numbers", "calculations")]
    #[case("tasks.divide_numbers", "calculations")]
    #[case("tasks.load_pdf", "documents")]
    #[case("tasks.not_routed", "default")]
    fn routing(#[case] task: &str, #[case] queue: &str) {
        let router = demo_router();
        assert_eq!(router.route_for(task), queue);
    }

    #[test]
    fn list_queues_keeps_declaration_order() {
        let router = demo_router();
        let names: Vec<&str> = router.list_queues().iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["default", "calculations", "documents"]);
    }

    #[test]
    fn list_routes_exposes_every_route() {
        let router = demo_router();
        let routes = router.list_routes();
        assert_eq!(routes.len(), 3);
        assert_eq!(routes["tasks.add_numbers"], "calculations");
    }

    #[test]
    fn routing_to_an_undeclared_queue_declares_it() {
        let mut router = QueueRouter::new("default");
        router.add_route("tasks.query_vectorstore", "rag");
        assert!(router.list_queues().iter().any(|q| q.name == "rag"));
    }
}
